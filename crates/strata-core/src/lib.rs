//! # strata-core
//!
//! Declarative schema model, dialect-specific DDL generation and query
//! term building for strata.
//!
//! This crate performs no I/O. It provides:
//! - [`Score`]: grains of tables and views, validated and finalized on
//!   construction
//! - [`DdlGenerator`]: per-engine translation of schema operations into
//!   statements, returned as a tri-state [`DdlPlan`]
//! - [`TermBuilder`]: parameterized statements for reading and writing one
//!   table or view, keyed by a value-free [`StatementShape`]
//!
//! ## Building a score
//!
//! ```rust
//! use strata_core::{Column, ColumnType, Grain, Score, Table};
//!
//! let score = Score::new(vec![Grain::new("billing", "1.0").table(
//!     Table::new(
//!         "invoice",
//!         vec![
//!             Column::new("id", ColumnType::Integer).not_null(),
//!             Column::new("total", ColumnType::Decimal(12, 2)),
//!         ],
//!     )
//!     .primary_key(&["id"]),
//! )])
//! .unwrap();
//!
//! assert!(score.element("billing", "invoice").is_some());
//! ```
//!
//! ## Generating DDL
//!
//! ```rust
//! use strata_core::{Column, ColumnType, DdlGenerator, DialectKind, Grain, Score, Table};
//!
//! let score = Score::new(vec![Grain::new("billing", "1.0").table(
//!     Table::new("invoice", vec![Column::new("id", ColumnType::Integer).not_null()])
//!         .primary_key(&["id"]),
//! )])
//! .unwrap();
//! let table = score.grain("billing").unwrap().find_table("invoice").unwrap();
//!
//! let generator = DialectKind::Sqlite.generator();
//! let plan = generator.create_table(table);
//! assert!(plan.statements()[0].starts_with("CREATE TABLE \"billing__invoice\""));
//! ```

pub mod dialect;
pub mod error;
pub mod expr;
pub mod live;
pub mod score;
pub mod term;
pub mod value;

pub use dialect::{
    Capabilities, DdlGenerator, DdlPlan, Dialect, DialectKind, FirebirdDialect, PostgresDialect,
    SqliteDialect, VERSION_CHECK_FAILURE,
};
pub use error::{ArgumentContractError, ModelError};
pub use expr::{AggregateFunc, BinaryOp, Expr};
pub use live::{
    DbColumnInfo, DbForeignKeyInfo, DbIndexInfo, DbPkInfo, DbTableInfo, DbTriggerInfo, DbViewInfo,
};
pub use score::{
    Column, ColumnType, DefaultValue, FkRule, ForeignKey, Grain, Index, JoinKind, Score, Table,
    TableElement, TableRef, View, ViewColumn, ViewKind, ViewParam, REVISION_COLUMN,
    SURROGATE_COUNT,
};
pub use term::{
    Binder, CompiledStatement, Condition, ConditionKind, Filter, ParameterSetter, StatementKind,
    StatementShape, TermBuilder, WhereTerm,
};
pub use value::{SqlValue, ToSqlValue};
