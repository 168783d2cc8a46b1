//! Tables, columns and their keys.

use serde::{Deserialize, Serialize};

/// Name of the hidden revision column carried by writable tables.
pub const REVISION_COLUMN: &str = "recversion";

/// Semantic column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit integer.
    Integer,
    /// Floating point (double precision).
    Real,
    /// Variable-length string with a maximum length.
    Varchar(usize),
    /// Unbounded text.
    Text,
    /// Exact decimal with precision and scale.
    Decimal(u8, u8),
    /// Boolean.
    Boolean,
    /// Date and time.
    DateTime,
    /// Binary large object.
    Binary,
}

impl ColumnType {
    /// Returns true for types on which `SUM` is defined.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real | Self::Decimal(..))
    }
}

/// Default value of a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// Current date and time at insert.
    CurrentTimestamp,
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FkRule {
    /// Reject changes that would orphan rows.
    #[default]
    NoAction,
    /// Propagate the change to referencing rows.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
}

impl FkRule {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
        }
    }

    /// Parses the spelling used by engine catalogs.
    #[must_use]
    pub fn from_sql(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "NO ACTION" | "RESTRICT" => Some(Self::NoAction),
            "CASCADE" => Some(Self::Cascade),
            "SET NULL" => Some(Self::SetNull),
            _ => None,
        }
    }
}

fn yes() -> bool {
    true
}

/// A column of a table or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    #[serde(default = "yes")]
    pub nullable: bool,
    /// Default value, if any.
    #[serde(default)]
    pub default: Option<DefaultValue>,
}

impl Column {
    /// Creates a nullable column without default.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    /// The hidden revision column.
    #[must_use]
    pub fn revision() -> Self {
        Self::new(REVISION_COLUMN, ColumnType::Integer)
            .not_null()
            .default(DefaultValue::Integer(1))
    }
}

/// A named, ordered list of indexed columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name, unique within the grain.
    pub name: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
}

impl Index {
    /// Creates an index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// A foreign key from some columns of a table to another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Target grain; the owning grain when absent.
    #[serde(default)]
    pub grain: Option<String>,
    /// Target table.
    pub table: String,
    /// Target columns; the target primary key when empty.
    #[serde(default)]
    pub ref_columns: Vec<String>,
    /// Action on update of the referenced key.
    #[serde(default)]
    pub on_update: FkRule,
    /// Action on delete of the referenced row.
    #[serde(default)]
    pub on_delete: FkRule,
}

impl ForeignKey {
    /// References `table` in the same grain through its primary key.
    #[must_use]
    pub fn new(columns: &[&str], table: impl Into<String>) -> Self {
        Self {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            grain: None,
            table: table.into(),
            ref_columns: Vec::new(),
            on_update: FkRule::NoAction,
            on_delete: FkRule::NoAction,
        }
    }

    /// Targets a table of another grain.
    #[must_use]
    pub fn in_grain(mut self, grain: impl Into<String>) -> Self {
        self.grain = Some(grain.into());
        self
    }

    /// Sets the delete action.
    #[must_use]
    pub const fn on_delete(mut self, rule: FkRule) -> Self {
        self.on_delete = rule;
        self
    }

    /// Sets the update action.
    #[must_use]
    pub const fn on_update(mut self, rule: FkRule) -> Self {
        self.on_update = rule;
        self
    }

    /// Target grain name. Resolved for every key of a finalized score.
    #[must_use]
    pub fn target_grain(&self) -> &str {
        self.grain.as_deref().unwrap_or_default()
    }
}

/// A table declared in a grain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name, unique within the grain.
    pub name: String,
    /// Declared columns in order.
    pub columns: Vec<Column>,
    /// Primary key columns in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Outgoing foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Indices on this table.
    #[serde(default)]
    pub indices: Vec<Index>,
    /// Whether updates are checked against the row revision.
    #[serde(default = "yes")]
    pub versioned: bool,
    /// Whether the table is read-only for data accessors.
    #[serde(default)]
    pub read_only: bool,
    #[serde(skip)]
    pub(crate) grain: String,
}

impl Table {
    /// Creates a versioned table without keys.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indices: Vec::new(),
            versioned: true,
            read_only: false,
            grain: String::new(),
        }
    }

    /// Sets the primary key.
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indices.push(index);
        self
    }

    /// Turns revision checking on or off.
    #[must_use]
    pub const fn versioned(mut self, enabled: bool) -> Self {
        self.versioned = enabled;
        self
    }

    /// Marks the table read-only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Owning grain, set when the score is finalized.
    #[must_use]
    pub fn grain(&self) -> &str {
        &self.grain
    }

    /// Looks up a declared column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns true when updates carry a revision check.
    #[must_use]
    pub const fn is_versioned(&self) -> bool {
        self.versioned && !self.read_only
    }

    /// Columns that exist physically: declared ones, then hidden ones.
    #[must_use]
    pub fn physical_columns(&self) -> Vec<Column> {
        let mut columns = self.columns.clone();
        if !self.read_only {
            columns.push(Column::revision());
        }
        columns
    }

    /// Returns true for columns the engine maintains on its own.
    #[must_use]
    pub fn is_hidden_column(&self, name: &str) -> bool {
        !self.read_only && name == REVISION_COLUMN
    }
}
