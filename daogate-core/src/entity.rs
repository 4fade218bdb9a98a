//! Entity-to-table mapping registry.
//!
//! A mapping is a declarative description of how a record type lands in a
//! table: table name, field-to-column pairs, and a designated primary-key
//! field. Mappings are built from explicit configuration (no field
//! introspection), resolved once, and cached in a process-wide registry
//! keyed by type identity. This module maps; it does not hydrate entities
//! or build queries beyond the cached SELECT/INSERT skeletons.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::value::{SqlValue, UpdateOutcome};

static REGISTRY: Lazy<RwLock<HashMap<TypeId, Arc<EntityMapping>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// One field-to-column pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub field: String,
    pub column: String,
}

/// Resolved mapping for one entity type, with its SQL skeletons cached.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    table: String,
    columns: Vec<ColumnMapping>,
    primary_key: Option<String>,
    select_sql: String,
    insert_sql: String,
}

impl EntityMapping {
    pub fn builder(table: impl Into<String>) -> EntityMappingBuilder {
        EntityMappingBuilder {
            table: table.into(),
            columns: Vec::new(),
            primary_key: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    /// Field name of the primary key, if one was designated.
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.column.as_str())
    }

    /// `SELECT col AS field, ... FROM table`, resolved once at build time.
    pub fn select_sql(&self) -> &str {
        &self.select_sql
    }

    /// `INSERT INTO table (cols...) VALUES (?...)` over the non-key
    /// columns, resolved once at build time.
    pub fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    /// The first generated key of an insert, for the caller to assign to
    /// the mapped primary-key field. `None` when no key was designated or
    /// the driver produced none.
    pub fn apply_generated_key(&self, outcome: &UpdateOutcome) -> Option<SqlValue> {
        self.primary_key.as_ref()?;
        outcome.first_key().cloned()
    }
}

/// Explicit configuration for an [`EntityMapping`].
pub struct EntityMappingBuilder {
    table: String,
    columns: Vec<ColumnMapping>,
    primary_key: Option<String>,
}

impl EntityMappingBuilder {
    /// Map `field` to a column of the snake_case form of the field name.
    pub fn field(self, field: impl Into<String>) -> Self {
        let field = field.into();
        let column = snake_case(&field);
        self.column(field, column)
    }

    /// Map `field` to an explicit column name.
    pub fn column(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push(ColumnMapping {
            field: field.into(),
            column: column.into(),
        });
        self
    }

    /// Designate `field` as the primary key (adding its mapping if it was
    /// not declared yet).
    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.columns.iter().any(|c| c.field == field) {
            self = self.field(field.clone());
        }
        self.primary_key = Some(field);
        self
    }

    pub fn build(self) -> EntityMapping {
        let select_cols = self
            .columns
            .iter()
            .map(|c| format!("{} AS {}", c.column, c.field))
            .collect::<Vec<_>>()
            .join(", ");
        let select_sql = format!("SELECT {select_cols} FROM {}", self.table);

        let insert_cols: Vec<&ColumnMapping> = self
            .columns
            .iter()
            .filter(|c| Some(&c.field) != self.primary_key.as_ref())
            .collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            insert_cols
                .iter()
                .map(|c| c.column.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            insert_cols.iter().map(|_| "?").collect::<Vec<_>>().join(", "),
        );

        EntityMapping {
            table: self.table,
            columns: self.columns,
            primary_key: self.primary_key,
            select_sql,
            insert_sql,
        }
    }
}

/// Register (or replace) the mapping for `T`.
pub fn register_entity<T: 'static>(mapping: EntityMapping) {
    REGISTRY
        .write()
        .expect("entity registry poisoned")
        .insert(TypeId::of::<T>(), Arc::new(mapping));
}

/// The cached mapping for `T`, if registered.
pub fn mapping_of<T: 'static>() -> Option<Arc<EntityMapping>> {
    REGISTRY
        .read()
        .expect("entity registry poisoned")
        .get(&TypeId::of::<T>())
        .cloned()
}

fn snake_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for (i, c) in field.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
