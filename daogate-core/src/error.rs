/// Structured error types for daogate-core.
///
/// Uses `thiserror` for better API surface and error composition.
/// Every failure surfaces to the caller as an explicit `Err`; the only
/// locally recovered condition in the crate is double-close, which is a
/// no-op by contract.

use thiserror::Error;

/// Main error type for daogate operations
#[derive(Error, Debug)]
pub enum DaoError {
    /// Could not acquire or release an underlying connection
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    /// Operation attempted on a session whose connection was already released
    #[error("Session is closed")]
    SessionClosed,

    /// Statement execution failed
    #[error("Query error in {context}: {reason}")]
    Query { context: String, reason: String },

    /// Supplied parameter count does not match the statement's placeholders
    #[error("Parameter arity mismatch for '{sql}': statement has {expected} placeholder(s), {supplied} parameter(s) supplied")]
    ParameterArity {
        sql: String,
        expected: usize,
        supplied: usize,
    },

    /// `begin_transaction` while a transaction is already active
    #[error("Transaction already active on this session")]
    TransactionActive,

    /// `commit` or `rollback` outside a transaction
    #[error("No active transaction on this session")]
    NoTransaction,

    /// Underlying begin/commit/rollback failure
    #[error("Transaction {op} failed: {reason}")]
    Transaction { op: &'static str, reason: String },

    /// No DAO instance available under the configured pool bound
    #[error("DAO pool for {dao_type} exhausted (limit {limit})")]
    PoolExhausted { dao_type: &'static str, limit: usize },

    /// Operation through a DAO that is not bound to a session
    #[error("DAO is not bound to a session")]
    Unbound,

    /// A DAO instance was returned for a type with no known pool
    #[error("No pool registered for DAO type {dao_type}")]
    UnknownPool { dao_type: &'static str },

    /// Configuration loading or validation failed
    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

/// Result type alias for daogate operations
pub type Result<T> = std::result::Result<T, DaoError>;

impl DaoError {
    /// Create a connection error
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Create a query error with context
    pub fn query(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Query {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Create a transaction error for the given operation
    pub fn transaction(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Transaction {
            op,
            reason: reason.into(),
        }
    }

    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// True for failures to acquire/release a connection or to use a closed session
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::SessionClosed)
    }

    /// True for statement execution failures, including arity mismatches
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::ParameterArity { .. })
    }

    /// True for transaction misuse or underlying transaction failures
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            Self::TransactionActive | Self::NoTransaction | Self::Transaction { .. }
        )
    }

    /// True for protocol misuse (unbound DAO, untracked pool type)
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Unbound | Self::UnknownPool { .. })
    }
}
