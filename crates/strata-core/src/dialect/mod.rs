//! Dialect adapters and DDL generators.
//!
//! A [`Dialect`] knows how one engine spells types, identifiers, literals
//! and placeholders. A [`DdlGenerator`] turns schema operations into the
//! literal statements that engine needs. Every generator operation returns
//! a [`DdlPlan`], which separates "nothing to do" from "cannot be done".

mod firebird;
mod postgres;
mod sqlite;

use std::fmt;
use std::str::FromStr;

pub use firebird::FirebirdDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::expr::ExprContext;
use crate::live::{DbColumnInfo, DbForeignKeyInfo, DbIndexInfo, DbTableInfo};
use crate::score::{Column, ColumnType, DefaultValue, ForeignKey, Grain, Index, Table, View};
use crate::value::SqlValue;

/// Message raised when an update carries a stale record revision.
pub const VERSION_CHECK_FAILURE: &str = "record version check failure";

/// Maximum width of a rendered view select list line.
const WRAP_WIDTH: usize = 80;

/// Outcome of asking a generator for one schema operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum DdlPlan {
    /// Statements to execute in order.
    Statements(Vec<String>),
    /// The live state already satisfies the request.
    NoOp,
    /// The engine has no way to express the operation.
    Unsupported {
        /// Name of the requested operation.
        operation: &'static str,
    },
}

impl DdlPlan {
    /// Wraps statements, collapsing an empty list to [`DdlPlan::NoOp`].
    pub fn of(statements: Vec<String>) -> Self {
        if statements.is_empty() {
            Self::NoOp
        } else {
            Self::Statements(statements)
        }
    }

    /// Returns the statements, or an empty slice for the other variants.
    #[must_use]
    pub fn statements(&self) -> &[String] {
        match self {
            Self::Statements(s) => s,
            Self::NoOp | Self::Unsupported { .. } => &[],
        }
    }

    /// Returns true for [`DdlPlan::Unsupported`].
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Feature flags of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Row-level triggers exist.
    pub native_triggers: bool,
    /// Sequence objects exist.
    pub sequences: bool,
    /// Parameterized views can be created.
    pub parameterized_views: bool,
    /// Materialized views can be maintained.
    pub materialized_views: bool,
    /// Grains map to database schemas.
    pub schemas: bool,
    /// DDL takes part in transactions and is visible before commit.
    pub transactional_ddl: bool,
    /// Column type and nullability can be altered in place.
    pub alter_column: bool,
    /// Constraints can be added to an existing table.
    pub alter_constraints: bool,
}

/// Per-engine spelling rules.
pub trait Dialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the engine's feature flags.
    fn capabilities(&self) -> Capabilities;

    /// Returns the SQL type for a semantic column type.
    fn type_name(&self, column_type: ColumnType) -> String;

    /// Unquoted physical name of a grain-owned object.
    fn physical_name(&self, grain: &str, name: &str) -> String;

    /// Quotes an identifier, doubling embedded quotes.
    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Fully qualified, quoted name of a grain-owned table or view.
    fn table_name(&self, grain: &str, name: &str) -> String {
        self.quote(&self.physical_name(grain, name))
    }

    /// Physical name of a declared index.
    fn index_name(&self, grain: &str, index: &str) -> String {
        format!("{grain}__{index}")
    }

    /// Placeholder for the 1-based parameter `position`.
    fn placeholder(&self, _position: usize) -> String {
        String::from("?")
    }

    /// Renders a value as an inline literal.
    fn render_literal(&self, value: &SqlValue) -> String {
        value.to_sql_inline()
    }

    /// Renders a column default.
    fn render_default(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Bool(b) => self.render_literal(&SqlValue::Bool(*b)),
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::String(s) => self.render_literal(&SqlValue::Text(s.clone())),
            DefaultValue::CurrentTimestamp => String::from("CURRENT_TIMESTAMP"),
        }
    }

    /// Generates a column definition.
    fn column_definition(&self, column: &Column) -> String {
        let mut parts = vec![self.quote(&column.name), self.type_name(column.column_type)];
        if !column.nullable {
            parts.push(String::from("NOT NULL"));
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", self.render_default(default)));
        }
        parts.join(" ")
    }

    /// Returns true when a live column already has the declared shape.
    fn column_matches(&self, column: &Column, live: &DbColumnInfo) -> bool {
        let declared_default = column.default.as_ref().map(|d| self.render_default(d));
        normalize_type(&self.type_name(column.column_type)) == normalize_type(&live.type_name)
            && column.nullable == live.nullable
            && declared_default.as_deref().map(str::trim) == live.default.as_deref().map(str::trim)
    }

    /// Returns true when a live foreign key enforces the declared one.
    fn foreign_key_matches(&self, fk: &ForeignKey, live: &DbForeignKeyInfo) -> bool {
        fk.columns == live.columns
            && self.physical_name(fk.target_grain(), &fk.table) == live.ref_table
            && fk.ref_columns == live.ref_columns
            && fk.on_update == live.on_update
            && fk.on_delete == live.on_delete
    }
}

/// Quoted, comma separated column list.
pub(crate) fn column_list(dialect: &dyn Dialect, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| dialect.quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn normalize_type(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Schema operations of one engine.
///
/// Tables and views passed in belong to a finalized score, so they know
/// their grain. Operations that depend on live state take the live table
/// snapshot; none of them touch a database.
pub trait DdlGenerator: Dialect {
    /// Returns this generator as its spelling rules.
    fn dialect(&self) -> &dyn Dialect;

    /// Creates the namespace of a grain.
    fn create_schema(&self, grain: &Grain) -> DdlPlan;

    /// Creates a table: columns in declared order, primary key last.
    fn create_table(&self, table: &Table) -> DdlPlan;

    /// Drops a table.
    fn drop_table(&self, grain: &str, name: &str) -> DdlPlan;

    /// Adds a declared column missing from the live table.
    fn add_column(&self, table: &Table, column: &Column, live: &DbTableInfo) -> DdlPlan;

    /// Brings a live column to its declared shape; [`DdlPlan::NoOp`] when it
    /// already matches.
    fn update_column(&self, table: &Table, column: &Column, live: &DbTableInfo) -> DdlPlan;

    /// Drops a live column that is no longer declared.
    fn drop_column(&self, table: &Table, column: &str, live: &DbTableInfo) -> DdlPlan;

    /// Brings the live primary key to the declared one.
    fn update_primary_key(&self, table: &Table, live: &DbTableInfo) -> DdlPlan;

    /// Creates a declared foreign key.
    fn create_foreign_key(&self, table: &Table, fk: &ForeignKey, live: &DbTableInfo) -> DdlPlan;

    /// Drops a live foreign key that is no longer declared.
    fn drop_foreign_key(&self, table: &Table, fk: &DbForeignKeyInfo, live: &DbTableInfo) -> DdlPlan;

    /// Creates a declared index.
    fn create_index(&self, table: &Table, index: &Index) -> DdlPlan;

    /// Drops a live index.
    fn drop_index(&self, grain: &str, index: &DbIndexInfo) -> DdlPlan;

    /// Name of the revision-check trigger of a table.
    fn versioning_trigger_name(&self, table: &Table) -> String;

    /// Creates the revision-check trigger of a versioned table that lacks
    /// one, or drops it from a table that is no longer versioned.
    ///
    /// `trigger_exists` must come from a fresh catalog query.
    fn update_versioning_trigger(&self, table: &Table, trigger_exists: bool) -> DdlPlan;

    /// Creates a plain view.
    fn create_view(&self, view: &View) -> DdlPlan;

    /// Drops a plain view.
    fn drop_view(&self, grain: &str, name: &str) -> DdlPlan;

    /// Text the catalog holds for the current definition of a view.
    fn view_fingerprint(&self, view: &View) -> String;

    /// Creates a parameterized view.
    fn create_parameterized_view(&self, view: &View) -> DdlPlan;

    /// Drops a parameterized view.
    fn drop_parameterized_view(&self, view: &View) -> DdlPlan;

    /// Creates and fills the table backing a materialized view.
    fn create_materialized_view(&self, view: &View, source: &Table) -> DdlPlan;

    /// Drops the table backing a materialized view.
    fn drop_materialized_view(&self, grain: &str, name: &str) -> DdlPlan;

    /// Physical columns of the table backing a materialized view.
    fn materialized_view_columns(&self, view: &View) -> Vec<Column> {
        let mut columns = view.output_columns().to_vec();
        columns.push(
            Column::new(crate::score::SURROGATE_COUNT, ColumnType::Integer)
                .not_null()
                .default(DefaultValue::Integer(0)),
        );
        columns
    }

    /// Names and catalog fingerprints of the triggers keeping a
    /// materialized view current.
    fn materialized_view_triggers(&self, view: &View, source: &Table) -> Vec<(String, String)>;

    /// Creates the triggers keeping a materialized view current.
    fn create_materialized_view_triggers(&self, view: &View, source: &Table) -> DdlPlan;

    /// Drops the triggers keeping a materialized view current.
    fn drop_materialized_view_triggers(&self, view: &View, source: &Table) -> DdlPlan;
}

/// The engines a process can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DialectKind {
    /// SQLite.
    #[default]
    Sqlite,
    /// PostgreSQL.
    Postgres,
    /// Firebird.
    Firebird,
}

impl DialectKind {
    /// Returns the generator for this engine.
    #[must_use]
    pub fn generator(self) -> Box<dyn DdlGenerator> {
        match self {
            Self::Sqlite => Box::new(SqliteDialect),
            Self::Postgres => Box::new(PostgresDialect),
            Self::Firebird => Box::new(FirebirdDialect),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Firebird => "firebird",
        })
    }
}

impl FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "firebird" => Ok(Self::Firebird),
            other => Err(format!("unknown dialect '{other}'")),
        }
    }
}

// =============================================================================
// View rendering shared by all generators
// =============================================================================

/// Renders fields of a view body: qualified fields keep their table alias,
/// parameters become positional placeholders in declaration order.
struct ViewContext<'v> {
    view: &'v View,
}

impl ExprContext for ViewContext<'_> {
    fn field(&self, dialect: &dyn Dialect, table: Option<&str>, column: &str) -> String {
        match table {
            Some(alias) => format!("{}.{}", dialect.quote(alias), dialect.quote(column)),
            None => dialect.quote(column),
        }
    }

    fn param(&self, dialect: &dyn Dialect, name: &str) -> String {
        self.view
            .params
            .iter()
            .position(|p| p.name == name)
            .map_or_else(|| dialect.quote(name), |i| dialect.placeholder(i + 1))
    }
}

/// Renders the `SELECT` of a view. The select list is wrapped at 80
/// columns; wrapping only inserts whitespace.
pub(crate) fn select_sql(dialect: &dyn Dialect, view: &View) -> String {
    let ctx = ViewContext { view };
    let mut sql = String::from(if view.distinct {
        "  SELECT DISTINCT "
    } else {
        "  SELECT "
    });
    let mut line_len = sql.len();
    for (i, column) in view.columns.iter().enumerate() {
        let mut item = format!(
            "{} AS {}",
            column.expr.render(dialect, &ctx),
            dialect.quote(&column.alias)
        );
        if i + 1 < view.columns.len() {
            item.push(',');
        }
        if i > 0 {
            if line_len + 1 + item.len() > WRAP_WIDTH {
                sql.push_str("\n    ");
                line_len = 4;
            } else {
                sql.push(' ');
                line_len += 1;
            }
        }
        line_len += item.len();
        sql.push_str(&item);
    }

    for (i, table_ref) in view.from.iter().enumerate() {
        let target = dialect.table_name(view.ref_grain(table_ref), &table_ref.table);
        let alias = dialect.quote(&table_ref.alias);
        if i == 0 {
            sql.push_str(&format!("\n  FROM {target} AS {alias}"));
        } else {
            sql.push_str(&format!(
                "\n    {} JOIN {target} AS {alias}",
                table_ref.join.to_sql()
            ));
            if let Some(on) = &table_ref.on {
                sql.push_str(&format!(" ON {}", on.render(dialect, &ctx)));
            }
        }
    }

    if let Some(condition) = &view.where_clause {
        sql.push_str(&format!("\n  WHERE {}", condition.render(dialect, &ctx)));
    }

    if !view.group_by.is_empty() {
        let grouped: Vec<String> = view
            .group_by
            .iter()
            .filter_map(|alias| view.view_column(alias))
            .map(|c| c.expr.render(dialect, &ctx))
            .collect();
        sql.push_str(&format!("\n  GROUP BY {}", grouped.join(", ")));
    }
    sql
}

/// Parts of the statements maintaining a materialized view, rendered
/// against its single source table without aliases.
pub(crate) struct MaterializedParts {
    /// Quoted physical name of the view table.
    pub target: String,
    /// Quoted physical name of the source table.
    pub source: String,
    /// Quoted target column list, surrogate count last.
    pub target_columns: Vec<String>,
    /// Select expressions matching `target_columns`.
    pub select_items: Vec<String>,
    /// Quoted view-side names of the group columns.
    pub key_targets: Vec<String>,
    /// Quoted source-side names of the group columns.
    pub key_sources: Vec<String>,
}

impl MaterializedParts {
    pub(crate) fn new(dialect: &dyn Dialect, view: &View) -> Self {
        let grain = view.grain();
        let source = view
            .source()
            .map(|r| dialect.table_name(view.ref_grain(r), &r.table))
            .unwrap_or_default();

        let mut target_columns = Vec::new();
        let mut select_items = Vec::new();
        for column in &view.columns {
            target_columns.push(dialect.quote(&column.alias));
            select_items.push(column.expr.render(dialect, &SourceContext));
        }
        target_columns.push(dialect.quote(crate::score::SURROGATE_COUNT));
        select_items.push(String::from("COUNT(*)"));

        let mut key_targets = Vec::new();
        let mut key_sources = Vec::new();
        for alias in &view.group_by {
            if let Some(column) = view.view_column(alias) {
                key_targets.push(dialect.quote(alias));
                key_sources.push(column.expr.render(dialect, &SourceContext));
            }
        }

        Self {
            target: dialect.table_name(grain, &view.name),
            source,
            target_columns,
            select_items,
            key_targets,
            key_sources,
        }
    }

    /// `INSERT ... SELECT` recomputing the groups matched by `filter`.
    pub(crate) fn refill(&self, filter: Option<&str>) -> String {
        let mut sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.target,
            self.target_columns.join(", "),
            self.select_items.join(", "),
            self.source
        );
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        sql.push_str(" GROUP BY ");
        sql.push_str(&self.key_sources.join(", "));
        sql
    }

    /// Condition matching the source rows of the group of `row`
    /// (`NEW` or `OLD`), using the given null-safe equality operator.
    pub(crate) fn source_match(&self, row: &str, null_safe_eq: &str) -> String {
        self.key_sources
            .iter()
            .map(|k| format!("{k} {null_safe_eq} {row}.{k}"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Condition matching the view row of the group of `row`.
    pub(crate) fn target_match(&self, row: &str, null_safe_eq: &str) -> String {
        self.key_targets
            .iter()
            .zip(&self.key_sources)
            .map(|(t, s)| format!("{t} {null_safe_eq} {row}.{s}"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// Renders fields as bare column names of the source table.
struct SourceContext;

impl ExprContext for SourceContext {
    fn field(&self, dialect: &dyn Dialect, _table: Option<&str>, column: &str) -> String {
        dialect.quote(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::score::{Score, ViewKind};

    fn score() -> Score {
        Score::new(vec![Grain::new("shop", "1")
            .table(
                Table::new(
                    "orders",
                    vec![
                        Column::new("id", ColumnType::Integer).not_null(),
                        Column::new("customer", ColumnType::Varchar(40)).not_null(),
                        Column::new("amount", ColumnType::Integer).not_null(),
                        Column::new("note", ColumnType::Text),
                    ],
                )
                .primary_key(&["id"]),
            )
            .view(
                View::new("big_orders", "orders", "o")
                    .column("id", Expr::qualified("o", "id"))
                    .column("customer", Expr::qualified("o", "customer"))
                    .column("amount", Expr::qualified("o", "amount"))
                    .column("note", Expr::qualified("o", "note"))
                    .column(
                        "label",
                        Expr::qualified("o", "customer").binary(
                            crate::expr::BinaryOp::Concat,
                            Expr::qualified("o", "note"),
                        ),
                    )
                    .filter(Expr::qualified("o", "amount").gt(Expr::lit(100))),
            )
            .view(
                View::new("per_customer", "orders", "o")
                    .kind(ViewKind::MaterializedView)
                    .column("customer", Expr::qualified("o", "customer"))
                    .column("total", Expr::sum(Expr::qualified("o", "amount")))
                    .group_by("customer"),
            )])
        .unwrap()
    }

    #[test]
    fn plan_collapses_empty_statement_lists() {
        assert_eq!(DdlPlan::of(Vec::new()), DdlPlan::NoOp);
        assert!(DdlPlan::Unsupported { operation: "x" }.statements().is_empty());
        assert!(DdlPlan::Unsupported { operation: "x" }.is_unsupported());
    }

    #[test]
    fn dialect_kind_parses() {
        assert_eq!("SQLite".parse::<DialectKind>(), Ok(DialectKind::Sqlite));
        assert_eq!("postgresql".parse::<DialectKind>(), Ok(DialectKind::Postgres));
        assert!("oracle".parse::<DialectKind>().is_err());
        assert_eq!(DialectKind::Firebird.to_string(), "firebird");
    }

    #[test]
    fn select_list_wraps_without_changing_tokens() {
        let score = score();
        let view = score.grain("shop").unwrap().find_view("big_orders").unwrap();
        let sql = select_sql(&SqliteDialect, view);
        for line in sql.lines() {
            assert!(line.len() <= WRAP_WIDTH, "line too long: {line}");
        }
        assert!(sql.contains("\n    "));
        let flat: Vec<&str> = sql.split_whitespace().collect();
        assert_eq!(
            flat.join(" "),
            "SELECT \"o\".\"id\" AS \"id\", \"o\".\"customer\" AS \"customer\", \
             \"o\".\"amount\" AS \"amount\", \"o\".\"note\" AS \"note\", \
             \"o\".\"customer\" || \"o\".\"note\" AS \"label\" \
             FROM \"shop__orders\" AS \"o\" WHERE \"o\".\"amount\" > 100"
        );
    }

    #[test]
    fn materialized_parts_refill() {
        let score = score();
        let view = score.grain("shop").unwrap().find_view("per_customer").unwrap();
        let parts = MaterializedParts::new(&SqliteDialect, view);
        assert_eq!(
            parts.refill(None),
            "INSERT INTO \"shop__per_customer\" (\"customer\", \"total\", \"surrogate_count\") \
             SELECT \"customer\", SUM(\"amount\"), COUNT(*) FROM \"shop__orders\" GROUP BY \"customer\""
        );
        assert_eq!(parts.source_match("NEW", "IS"), "\"customer\" IS NEW.\"customer\"");
    }
}
