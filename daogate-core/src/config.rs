//! Configuration for the manager and its DAO pools.
//!
//! Plain serde structs with defaults, loadable from TOML:
//!
//! ```toml
//! [pool]
//! max_active = 16
//! on_exhausted = "block"
//! max_idle = 8
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DaoError, Result};

/// What a borrow does when a bounded pool has no free capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Fail immediately with a pool-exhausted error.
    #[default]
    Fail,
    /// Suspend until an instance is returned.
    Block,
}

/// Per-type DAO pool settings. One config applies to every pool the
/// manager creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum simultaneously borrowed instances per DAO type.
    /// `None` means unbounded.
    pub max_active: Option<usize>,
    /// Behavior when `max_active` is reached.
    pub on_exhausted: ExhaustionPolicy,
    /// Maximum idle instances retained per DAO type; surplus returns are
    /// dropped. `None` means keep everything.
    pub max_idle: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: None,
            on_exhausted: ExhaustionPolicy::Fail,
            max_idle: None,
        }
    }
}

impl PoolConfig {
    pub fn bounded(max_active: usize) -> Self {
        Self {
            max_active: Some(max_active),
            ..Default::default()
        }
    }

    pub fn blocking(mut self) -> Self {
        self.on_exhausted = ExhaustionPolicy::Block;
        self
    }

    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = Some(max_idle);
        self
    }
}

/// Top-level manager configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub pool: PoolConfig,
}

impl ManagerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| DaoError::config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaoError::config(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&raw)
    }
}
