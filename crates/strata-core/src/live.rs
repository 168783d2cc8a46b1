//! Snapshots of what a live database actually contains.
//!
//! These records are produced by catalog introspection during one
//! synchronization run and compared against the declared score. They are
//! never persisted.

use crate::score::FkRule;

/// A live column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbColumnInfo {
    /// Column name.
    pub name: String,
    /// Type as spelled by the engine catalog.
    pub type_name: String,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Default expression text, if any.
    pub default: Option<String>,
}

/// A live primary key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbPkInfo {
    /// Constraint name, where the engine keeps one.
    pub name: Option<String>,
    /// Key columns in key order.
    pub columns: Vec<String>,
}

impl DbPkInfo {
    /// Returns true when no primary key exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A live foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbForeignKeyInfo {
    /// Constraint name, where the engine keeps one.
    pub name: Option<String>,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Physical name of the referenced table.
    pub ref_table: String,
    /// Referenced columns.
    pub ref_columns: Vec<String>,
    /// Update action.
    pub on_update: FkRule,
    /// Delete action.
    pub on_delete: FkRule,
}

/// A live index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbIndexInfo {
    /// Physical index name.
    pub name: String,
    /// Logical name of the indexed table.
    pub table: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
}

/// A live trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTriggerInfo {
    /// Trigger name.
    pub name: String,
    /// Physical name of the table it fires on.
    pub table: String,
    /// Stored definition, where the engine keeps one.
    pub definition: Option<String>,
}

/// A live view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbViewInfo {
    /// Logical view name.
    pub name: String,
    /// Stored definition or fingerprint.
    pub definition: Option<String>,
}

/// Everything known about one live table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbTableInfo {
    /// Logical table name.
    pub name: String,
    /// Columns in catalog order.
    pub columns: Vec<DbColumnInfo>,
    /// Primary key.
    pub primary_key: DbPkInfo,
    /// Outgoing foreign keys.
    pub foreign_keys: Vec<DbForeignKeyInfo>,
}

impl DbTableInfo {
    /// Looks up a live column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&DbColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns true when the live table has the column.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}
