//! Query terms for data access.
//!
//! A [`TermBuilder`] turns one [`TableElement`] plus a caller [`Filter`]
//! and sort request into a [`CompiledStatement`]: SQL text with positional
//! slots and a [`ParameterSetter`] that maps caller arguments onto those
//! slots. The SQL text depends only on the [`StatementShape`], so a
//! compiled statement can be reused for any values of the same shape.

use crate::dialect::Dialect;
use crate::error::ArgumentContractError;
use crate::expr::{Expr, PlainContext};
use crate::score::{TableElement, REVISION_COLUMN};
use crate::value::{SqlValue, ToSqlValue};

/// Result type for term building.
pub type Result<T> = std::result::Result<T, ArgumentContractError>;

/// Kind of data-access statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Primary key lookup.
    Get,
    /// Filtered, ordered select.
    Select,
    /// Row insert.
    Insert,
    /// Row update by primary key.
    Update,
}

impl StatementKind {
    /// Operation name used in argument errors.
    #[must_use]
    pub const fn operation(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }
}

/// Comparison applied by one filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `BETWEEN`
    Between,
    /// `LIKE`
    Like,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
    /// `IN` with the given number of values.
    In(usize),
}

impl ConditionKind {
    /// Number of values the condition binds.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull => 0,
            Self::Between => 2,
            Self::In(n) => n,
            _ => 1,
        }
    }
}

/// One condition of a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Filtered column.
    pub column: String,
    /// Comparison.
    pub kind: ConditionKind,
    /// Bound values, `kind.arity()` of them.
    pub values: Vec<SqlValue>,
}

/// Caller-supplied row filter; conditions are combined with `AND`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, column: &str, kind: ConditionKind, values: Vec<SqlValue>) -> Self {
        self.conditions.push(Condition {
            column: column.to_string(),
            kind,
            values,
        });
        self
    }

    /// `column = value`
    #[must_use]
    pub fn eq<T: ToSqlValue>(self, column: &str, value: T) -> Self {
        self.push(column, ConditionKind::Eq, vec![value.to_sql_value()])
    }

    /// `column <> value`
    #[must_use]
    pub fn not_eq<T: ToSqlValue>(self, column: &str, value: T) -> Self {
        self.push(column, ConditionKind::NotEq, vec![value.to_sql_value()])
    }

    /// `column < value`
    #[must_use]
    pub fn lt<T: ToSqlValue>(self, column: &str, value: T) -> Self {
        self.push(column, ConditionKind::Lt, vec![value.to_sql_value()])
    }

    /// `column <= value`
    #[must_use]
    pub fn le<T: ToSqlValue>(self, column: &str, value: T) -> Self {
        self.push(column, ConditionKind::Le, vec![value.to_sql_value()])
    }

    /// `column > value`
    #[must_use]
    pub fn gt<T: ToSqlValue>(self, column: &str, value: T) -> Self {
        self.push(column, ConditionKind::Gt, vec![value.to_sql_value()])
    }

    /// `column >= value`
    #[must_use]
    pub fn ge<T: ToSqlValue>(self, column: &str, value: T) -> Self {
        self.push(column, ConditionKind::Ge, vec![value.to_sql_value()])
    }

    /// `column BETWEEN low AND high`
    #[must_use]
    pub fn between<T: ToSqlValue>(self, column: &str, low: T, high: T) -> Self {
        self.push(
            column,
            ConditionKind::Between,
            vec![low.to_sql_value(), high.to_sql_value()],
        )
    }

    /// `column LIKE pattern`
    #[must_use]
    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.push(column, ConditionKind::Like, vec![SqlValue::Text(pattern.to_string())])
    }

    /// `column IS NULL`
    #[must_use]
    pub fn is_null(self, column: &str) -> Self {
        self.push(column, ConditionKind::IsNull, Vec::new())
    }

    /// `column IS NOT NULL`
    #[must_use]
    pub fn is_not_null(self, column: &str) -> Self {
        self.push(column, ConditionKind::IsNotNull, Vec::new())
    }

    /// `column IN (values...)`
    #[must_use]
    pub fn in_list<T: ToSqlValue>(self, column: &str, values: Vec<T>) -> Self {
        let values: Vec<SqlValue> = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        self.push(column, ConditionKind::In(values.len()), values)
    }

    /// Conditions in the order they were added.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns true when the filter has no condition.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// All bound values in slot order.
    #[must_use]
    pub fn values(&self) -> Vec<SqlValue> {
        self.conditions
            .iter()
            .flat_map(|c| c.values.iter().cloned())
            .collect()
    }

    /// Column and comparison of every condition.
    #[must_use]
    pub fn shape(&self) -> Vec<(String, ConditionKind)> {
        self.conditions
            .iter()
            .map(|c| (c.column.clone(), c.kind))
            .collect()
    }
}

/// A `WHERE` condition whose values are slots.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereTerm {
    expr: Expr,
    slots: usize,
}

impl WhereTerm {
    /// The condition tree.
    #[must_use]
    pub const fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Number of slots the condition uses.
    #[must_use]
    pub const fn slots(&self) -> usize {
        self.slots
    }

    /// Renders the condition for a dialect.
    #[must_use]
    pub fn render(&self, dialect: &dyn Dialect) -> String {
        self.expr.render(dialect, &PlainContext)
    }
}

/// Everything that determines the SQL text of a statement, and nothing
/// that depends on values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementShape {
    /// Owning grain.
    pub grain: String,
    /// Table or view name.
    pub element: String,
    /// Statement kind.
    pub kind: StatementKind,
    /// Filtered columns and their comparisons.
    pub conditions: Vec<(String, ConditionKind)>,
    /// Effective sort columns.
    pub sort: Vec<String>,
}

/// Source of one bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binder {
    /// Positional caller argument.
    Arg(usize),
    /// Record revision read with the row.
    Revision,
}

/// Maps caller arguments onto the slots of a compiled statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSetter {
    operation: &'static str,
    element: String,
    arity: usize,
    binders: Vec<Binder>,
}

impl ParameterSetter {
    /// Number of caller arguments expected.
    #[must_use]
    pub const fn arity(&self) -> usize {
        self.arity
    }

    /// Slot binders in slot order.
    #[must_use]
    pub fn binders(&self) -> &[Binder] {
        &self.binders
    }

    /// Produces the slot values for `args`.
    ///
    /// # Errors
    ///
    /// Returns an error when the argument count differs from the statement
    /// arity, or when the statement needs a revision and none is given.
    pub fn bind(&self, args: &[SqlValue], revision: Option<i64>) -> Result<Vec<SqlValue>> {
        if args.len() != self.arity {
            return Err(ArgumentContractError::Count {
                operation: self.operation,
                element: self.element.clone(),
                expected: self.arity,
                provided: args.len(),
            });
        }
        self.binders
            .iter()
            .map(|binder| match binder {
                Binder::Arg(i) => Ok(args[*i].clone()),
                Binder::Revision => revision.map(SqlValue::Int).ok_or_else(|| {
                    ArgumentContractError::MissingRevision {
                        element: self.element.clone(),
                    }
                }),
            })
            .collect()
    }
}

/// SQL text plus its parameter setter.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    /// Statement text with dialect placeholders.
    pub sql: String,
    /// Argument mapping.
    pub setter: ParameterSetter,
    /// Shape the text was compiled for.
    pub shape: StatementShape,
    /// Columns returned by reads, in select-list order.
    pub columns: Vec<String>,
}

/// Compiles data-access statements for one element.
#[derive(Clone, Copy)]
pub struct TermBuilder<'a> {
    dialect: &'a dyn Dialect,
    element: TableElement<'a>,
}

impl<'a> TermBuilder<'a> {
    /// Creates a builder for `element`.
    #[must_use]
    pub const fn new(dialect: &'a dyn Dialect, element: TableElement<'a>) -> Self {
        Self { dialect, element }
    }

    /// The element statements are built for.
    #[must_use]
    pub const fn element(&self) -> TableElement<'a> {
        self.element
    }

    fn qualified_name(&self) -> String {
        format!("{}.{}", self.element.grain(), self.element.name())
    }

    fn check_column(&self, column: &str) -> Result<()> {
        if self.element.column(column).is_some() {
            Ok(())
        } else {
            Err(ArgumentContractError::UnknownColumn {
                element: self.qualified_name(),
                column: column.to_string(),
            })
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.element.is_read_only() {
            return Err(ArgumentContractError::ReadOnly {
                element: self.qualified_name(),
            });
        }
        Ok(())
    }

    fn quoted(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.dialect.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Effective sort order: the requested columns, then primary key
    /// columns not already requested, in key order. Without a request and
    /// without a key, the first column.
    ///
    /// # Errors
    ///
    /// Returns an error when a requested column does not exist.
    pub fn ordering(&self, requested: &[String]) -> Result<Vec<String>> {
        let mut order = Vec::with_capacity(requested.len() + self.element.primary_key().len());
        for column in requested {
            self.check_column(column)?;
            if !order.contains(column) {
                order.push(column.clone());
            }
        }
        for column in self.element.primary_key() {
            if !order.contains(column) {
                order.push(column.clone());
            }
        }
        if order.is_empty() {
            if let Some(first) = self.element.columns().first() {
                order.push(first.name.clone());
            }
        }
        Ok(order)
    }

    /// Translates a filter into a condition whose first slot is
    /// `first_slot`. An empty filter yields no condition.
    ///
    /// # Errors
    ///
    /// Returns an error when a condition names an unknown column.
    pub fn where_term(&self, filter: &Filter, first_slot: usize) -> Result<Option<WhereTerm>> {
        let mut slot = first_slot;
        let mut terms = Vec::with_capacity(filter.conditions().len());
        for condition in filter.conditions() {
            self.check_column(&condition.column)?;
            let field = Expr::field(condition.column.clone());
            let mut next = || {
                slot += 1;
                Expr::Slot(slot - 1)
            };
            terms.push(match condition.kind {
                ConditionKind::Eq => field.eq(next()),
                ConditionKind::NotEq => field.not_eq(next()),
                ConditionKind::Lt => field.lt(next()),
                ConditionKind::Le => field.le(next()),
                ConditionKind::Gt => field.gt(next()),
                ConditionKind::Ge => field.ge(next()),
                ConditionKind::Like => field.like(next()),
                ConditionKind::Between => {
                    let low = next();
                    field.between(low, next())
                }
                ConditionKind::IsNull => field.is_null(),
                ConditionKind::IsNotNull => field.is_not_null(),
                ConditionKind::In(n) => field.in_list((0..n).map(|_| next()).collect()),
            });
        }
        Ok(Expr::conjunction(terms).map(|expr| WhereTerm {
            expr,
            slots: slot - first_slot,
        }))
    }

    /// Equality conjunction over every primary key column.
    ///
    /// # Errors
    ///
    /// Returns an error when the element has no primary key.
    pub fn primary_key_term(&self, first_slot: usize) -> Result<WhereTerm> {
        let key = self.element.primary_key();
        let expr = Expr::conjunction(
            key.iter()
                .enumerate()
                .map(|(i, c)| Expr::field(c.clone()).eq(Expr::Slot(first_slot + i))),
        )
        .ok_or_else(|| ArgumentContractError::NoPrimaryKey {
            element: self.qualified_name(),
        })?;
        Ok(WhereTerm {
            expr,
            slots: key.len(),
        })
    }

    /// Shape of a statement; the cache key for its compiled form.
    ///
    /// # Errors
    ///
    /// Returns an error when the sort names an unknown column.
    pub fn shape(&self, kind: StatementKind, filter: &Filter, sort: &[String]) -> Result<StatementShape> {
        let sort = if kind == StatementKind::Select {
            self.ordering(sort)?
        } else {
            Vec::new()
        };
        Ok(StatementShape {
            grain: self.element.grain().to_string(),
            element: self.element.name().to_string(),
            kind,
            conditions: if kind == StatementKind::Select {
                filter.shape()
            } else {
                Vec::new()
            },
            sort,
        })
    }

    fn source(&self) -> String {
        let name = self.dialect.table_name(self.element.grain(), self.element.name());
        let params = self.element.params();
        if params.is_empty() {
            return name;
        }
        let slots: Vec<String> = (1..=params.len()).map(|i| self.dialect.placeholder(i)).collect();
        format!("{name}({})", slots.join(", "))
    }

    fn setter(&self, kind: StatementKind, arity: usize, binders: Vec<Binder>) -> ParameterSetter {
        ParameterSetter {
            operation: kind.operation(),
            element: self.qualified_name(),
            arity,
            binders,
        }
    }

    fn read_columns(&self) -> Vec<String> {
        self.element
            .readable_columns()
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    /// Primary key lookup. Arguments are the key values in key order.
    ///
    /// # Errors
    ///
    /// Returns an error when the element has no primary key.
    pub fn get(&self) -> Result<CompiledStatement> {
        let shape = self.shape(StatementKind::Get, &Filter::new(), &[])?;
        let params = self.element.params().len();
        let key = self.primary_key_term(params)?;
        let columns = self.read_columns();
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.quoted(&columns),
            self.source(),
            key.render(self.dialect)
        );
        let arity = params + key.slots();
        Ok(CompiledStatement {
            sql,
            setter: self.setter(StatementKind::Get, arity, (0..arity).map(Binder::Arg).collect()),
            shape,
            columns,
        })
    }

    /// Filtered, ordered select. Arguments are the view parameters, if
    /// any, followed by [`Filter::values`].
    ///
    /// # Errors
    ///
    /// Returns an error when the filter or sort names an unknown column.
    pub fn select(&self, filter: &Filter, sort: &[String]) -> Result<CompiledStatement> {
        let shape = self.shape(StatementKind::Select, filter, sort)?;
        let params = self.element.params().len();
        let columns = self.read_columns();
        let mut sql = format!("SELECT {} FROM {}", self.quoted(&columns), self.source());
        let mut arity = params;
        if let Some(term) = self.where_term(filter, params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&term.render(self.dialect));
            arity += term.slots();
        }
        if !shape.sort.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.quoted(&shape.sort));
        }
        Ok(CompiledStatement {
            sql,
            setter: self.setter(StatementKind::Select, arity, (0..arity).map(Binder::Arg).collect()),
            shape,
            columns,
        })
    }

    /// Row insert. Arguments are the declared column values in declared
    /// order; the revision column takes its default.
    ///
    /// # Errors
    ///
    /// Returns an error for read-only elements.
    pub fn insert(&self) -> Result<CompiledStatement> {
        self.check_writable()?;
        let shape = self.shape(StatementKind::Insert, &Filter::new(), &[])?;
        let columns: Vec<String> = self.element.columns().iter().map(|c| c.name.clone()).collect();
        let slots: Vec<String> = (1..=columns.len()).map(|i| self.dialect.placeholder(i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.source(),
            self.quoted(&columns),
            slots.join(", ")
        );
        Ok(CompiledStatement {
            sql,
            setter: self.setter(
                StatementKind::Insert,
                columns.len(),
                (0..columns.len()).map(Binder::Arg).collect(),
            ),
            shape,
            columns,
        })
    }

    /// Row update by primary key. Arguments are the declared column values
    /// in declared order. Versioned tables also bind the revision read
    /// with the row, after the assigned values.
    ///
    /// # Errors
    ///
    /// Returns an error for read-only elements, elements without a primary
    /// key, and unversioned tables whose columns all belong to the key.
    pub fn update(&self) -> Result<CompiledStatement> {
        self.check_writable()?;
        let shape = self.shape(StatementKind::Update, &Filter::new(), &[])?;
        let columns = self.element.columns();
        let key = self.element.primary_key();
        if key.is_empty() {
            return Err(ArgumentContractError::NoPrimaryKey {
                element: self.qualified_name(),
            });
        }

        let mut binders = Vec::with_capacity(columns.len() + 1);
        let mut assignments = Vec::new();
        for (i, column) in columns.iter().enumerate() {
            if key.contains(&column.name) {
                continue;
            }
            binders.push(Binder::Arg(i));
            assignments.push(format!(
                "{} = {}",
                self.dialect.quote(&column.name),
                self.dialect.placeholder(binders.len())
            ));
        }
        if self.element.is_versioned() {
            binders.push(Binder::Revision);
            assignments.push(format!(
                "{} = {}",
                self.dialect.quote(REVISION_COLUMN),
                self.dialect.placeholder(binders.len())
            ));
        }
        if assignments.is_empty() {
            return Err(ArgumentContractError::NothingToUpdate {
                element: self.qualified_name(),
            });
        }
        let mut conditions = Vec::with_capacity(key.len());
        for name in key {
            let index = columns
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| ArgumentContractError::UnknownColumn {
                    element: self.qualified_name(),
                    column: name.clone(),
                })?;
            binders.push(Binder::Arg(index));
            conditions.push(format!(
                "{} = {}",
                self.dialect.quote(name),
                self.dialect.placeholder(binders.len())
            ));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.source(),
            assignments.join(", "),
            conditions.join(" AND ")
        );
        Ok(CompiledStatement {
            sql,
            setter: self.setter(StatementKind::Update, columns.len(), binders),
            shape,
            columns: columns.iter().map(|c| c.name.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::score::{Column, ColumnType, Grain, Score, Table, View, ViewKind};

    fn score() -> Score {
        Score::new(vec![Grain::new("ledger", "1")
            .table(
                Table::new(
                    "entry",
                    vec![
                        Column::new("book", ColumnType::Varchar(10)).not_null(),
                        Column::new("line", ColumnType::Integer).not_null(),
                        Column::new("amount", ColumnType::Integer).not_null(),
                        Column::new("memo", ColumnType::Text),
                    ],
                )
                .primary_key(&["book", "line"]),
            )
            .table(Table::new(
                "scratch",
                vec![
                    Column::new("note", ColumnType::Text),
                    Column::new("weight", ColumnType::Real),
                ],
            ))
            .view(
                View::new("large", "entry", "e")
                    .kind(ViewKind::ParameterizedView)
                    .param("min", ColumnType::Integer)
                    .column("book", Expr::qualified("e", "book"))
                    .column("amount", Expr::qualified("e", "amount"))
                    .filter(Expr::qualified("e", "amount").ge(Expr::param("min"))),
            )])
        .unwrap()
    }

    fn names(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn ordering_appends_missing_key_columns() {
        let score = score();
        let entry = score.element("ledger", "entry").unwrap();
        let builder = TermBuilder::new(&SqliteDialect, entry);
        assert_eq!(builder.ordering(&[]).unwrap(), names(&["book", "line"]));
        assert_eq!(
            builder.ordering(&names(&["amount", "line"])).unwrap(),
            names(&["amount", "line", "book"])
        );
        assert!(matches!(
            builder.ordering(&names(&["missing"])),
            Err(ArgumentContractError::UnknownColumn { .. })
        ));

        let scratch = score.element("ledger", "scratch").unwrap();
        let builder = TermBuilder::new(&SqliteDialect, scratch);
        assert_eq!(builder.ordering(&[]).unwrap(), names(&["note"]));
    }

    #[test]
    fn get_binds_every_key_column() {
        let score = score();
        let entry = score.element("ledger", "entry").unwrap();
        let compiled = TermBuilder::new(&SqliteDialect, entry).get().unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"book\", \"line\", \"amount\", \"memo\", \"recversion\" \
             FROM \"ledger__entry\" WHERE \"book\" = ? AND \"line\" = ?"
        );
        let err = compiled
            .setter
            .bind(&[SqlValue::Text("2024".to_string())], None)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid number of 'get' arguments for 'ledger.entry': expected 2, provided 1"
        );
        assert_eq!(
            compiled
                .setter
                .bind(&[SqlValue::Text("2024".to_string()), SqlValue::Int(3)], None)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn get_without_key_fails() {
        let score = score();
        let scratch = score.element("ledger", "scratch").unwrap();
        assert!(matches!(
            TermBuilder::new(&SqliteDialect, scratch).get(),
            Err(ArgumentContractError::NoPrimaryKey { .. })
        ));
    }

    #[test]
    fn select_renders_every_condition_kind() {
        let score = score();
        let entry = score.element("ledger", "entry").unwrap();
        let filter = Filter::new()
            .between("amount", 10, 20)
            .like("memo", "rent%")
            .is_not_null("memo")
            .in_list("line", vec![1, 2, 3]);
        let compiled = TermBuilder::new(&PostgresDialect, entry)
            .select(&filter, &names(&["amount"]))
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"book\", \"line\", \"amount\", \"memo\", \"recversion\" FROM \"ledger\".\"entry\" \
             WHERE \"amount\" BETWEEN $1 AND $2 AND \"memo\" LIKE $3 AND \"memo\" IS NOT NULL \
             AND \"line\" IN ($4, $5, $6) ORDER BY \"amount\", \"book\", \"line\""
        );
        assert_eq!(compiled.setter.arity(), 6);
        assert_eq!(filter.values().len(), 6);
        assert_eq!(
            compiled.shape.conditions,
            vec![
                ("amount".to_string(), ConditionKind::Between),
                ("memo".to_string(), ConditionKind::Like),
                ("memo".to_string(), ConditionKind::IsNotNull),
                ("line".to_string(), ConditionKind::In(3)),
            ]
        );
    }

    #[test]
    fn select_rejects_unknown_filter_column() {
        let score = score();
        let entry = score.element("ledger", "entry").unwrap();
        let err = TermBuilder::new(&SqliteDialect, entry)
            .select(&Filter::new().eq("nope", 1), &[])
            .unwrap_err();
        assert_eq!(
            err,
            ArgumentContractError::UnknownColumn {
                element: "ledger.entry".to_string(),
                column: "nope".to_string(),
            }
        );
    }

    #[test]
    fn shape_ignores_values() {
        let score = score();
        let entry = score.element("ledger", "entry").unwrap();
        let builder = TermBuilder::new(&SqliteDialect, entry);
        let a = builder
            .shape(StatementKind::Select, &Filter::new().eq("book", "a"), &[])
            .unwrap();
        let b = builder
            .shape(StatementKind::Select, &Filter::new().eq("book", "b"), &[])
            .unwrap();
        let c = builder
            .shape(StatementKind::Select, &Filter::new().eq("book", "b"), &names(&["amount"]))
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn parameterized_view_arguments_come_first() {
        let score = score();
        let view = score.element("ledger", "large").unwrap();
        let compiled = TermBuilder::new(&PostgresDialect, view)
            .select(&Filter::new().eq("book", "x"), &[])
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"book\", \"amount\" FROM \"ledger\".\"large\"($1) WHERE \"book\" = $2 ORDER BY \"book\""
        );
        assert_eq!(compiled.setter.arity(), 2);
    }

    #[test]
    fn update_binds_revision_after_assignments() {
        let score = score();
        let entry = score.element("ledger", "entry").unwrap();
        let compiled = TermBuilder::new(&SqliteDialect, entry).update().unwrap();
        assert_eq!(
            compiled.sql,
            "UPDATE \"ledger__entry\" SET \"amount\" = ?, \"memo\" = ?, \"recversion\" = ? \
             WHERE \"book\" = ? AND \"line\" = ?"
        );
        assert_eq!(
            compiled.setter.binders(),
            &[
                Binder::Arg(2),
                Binder::Arg(3),
                Binder::Revision,
                Binder::Arg(0),
                Binder::Arg(1)
            ]
        );
        let row = vec![
            SqlValue::Text("b".to_string()),
            SqlValue::Int(1),
            SqlValue::Int(50),
            SqlValue::Null,
        ];
        assert_eq!(
            compiled.setter.bind(&row, None),
            Err(ArgumentContractError::MissingRevision {
                element: "ledger.entry".to_string()
            })
        );
        assert_eq!(compiled.setter.bind(&row, Some(4)).unwrap()[2], SqlValue::Int(4));
    }

    #[test]
    fn update_needs_a_column_to_assign() {
        let score = Score::new(vec![Grain::new("ledger", "1").table(
            Table::new(
                "link",
                vec![
                    Column::new("from_book", ColumnType::Varchar(10)).not_null(),
                    Column::new("to_book", ColumnType::Varchar(10)).not_null(),
                ],
            )
            .primary_key(&["from_book", "to_book"])
            .versioned(false),
        )])
        .unwrap();
        let link = score.element("ledger", "link").unwrap();
        assert_eq!(
            TermBuilder::new(&SqliteDialect, link).update().unwrap_err(),
            ArgumentContractError::NothingToUpdate {
                element: "ledger.link".to_string()
            }
        );

        // A versioned all-key table still bumps its revision.
        let versioned = Score::new(vec![Grain::new("ledger", "1").table(
            Table::new("tag", vec![Column::new("name", ColumnType::Varchar(10)).not_null()])
                .primary_key(&["name"]),
        )])
        .unwrap();
        let tag = versioned.element("ledger", "tag").unwrap();
        assert_eq!(
            TermBuilder::new(&SqliteDialect, tag).update().unwrap().sql,
            "UPDATE \"ledger__tag\" SET \"recversion\" = ? WHERE \"name\" = ?"
        );
    }

    #[test]
    fn insert_skips_revision_and_rejects_views() {
        let score = score();
        let entry = score.element("ledger", "entry").unwrap();
        let compiled = TermBuilder::new(&SqliteDialect, entry).insert().unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO \"ledger__entry\" (\"book\", \"line\", \"amount\", \"memo\") VALUES (?, ?, ?, ?)"
        );
        let view = score.element("ledger", "large").unwrap();
        assert!(matches!(
            TermBuilder::new(&SqliteDialect, view).insert(),
            Err(ArgumentContractError::ReadOnly { .. })
        ));
    }
}
