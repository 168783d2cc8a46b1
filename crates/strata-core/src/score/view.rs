//! Views: plain, materialized and parameterized.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::table::{Column, ColumnType, Table};
use crate::error::ModelError;
use crate::expr::{AggregateFunc, BinaryOp, Expr};
use crate::value::SqlValue;

/// Name of the hidden group-cardinality column of materialized views.
pub const SURROGATE_COUNT: &str = "surrogate_count";

/// Flavour of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ViewKind {
    /// Plain `CREATE VIEW`.
    #[default]
    View,
    /// Table kept current by triggers on its source table.
    MaterializedView,
    /// Set-returning function taking named parameters.
    ParameterizedView,
}

/// Join type of a table reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JoinKind {
    /// `INNER JOIN`
    #[default]
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
}

impl JoinKind {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

/// A selected column of a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewColumn {
    /// Output name.
    pub alias: String,
    /// Selected expression.
    pub expr: Expr,
}

/// A table in the `FROM` clause of a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    /// Alias used by field references.
    pub alias: String,
    /// Grain of the table; the view's grain when absent.
    #[serde(default)]
    pub grain: Option<String>,
    /// Table name.
    pub table: String,
    /// Join type; ignored on the first reference.
    #[serde(default)]
    pub join: JoinKind,
    /// Join condition; required on every reference but the first.
    #[serde(default)]
    pub on: Option<Expr>,
}

/// A typed parameter of a parameterized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewParam {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    #[serde(rename = "type")]
    pub param_type: ColumnType,
}

/// A view declared in a grain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    /// View name, unique among the grain's tables and views.
    pub name: String,
    /// Flavour.
    #[serde(default)]
    pub kind: ViewKind,
    /// `SELECT DISTINCT` when set.
    #[serde(default)]
    pub distinct: bool,
    /// Selected columns in order.
    pub columns: Vec<ViewColumn>,
    /// Joined tables in order.
    pub from: Vec<TableRef>,
    /// Optional filter.
    #[serde(default, rename = "where")]
    pub where_clause: Option<Expr>,
    /// Aliases of grouped columns in order.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Parameters; only parameterized views may declare them.
    #[serde(default)]
    pub params: Vec<ViewParam>,
    #[serde(skip)]
    pub(crate) grain: String,
    #[serde(skip)]
    pub(crate) resolved: Vec<Column>,
}

impl View {
    /// Creates a plain view selecting from `table` under `alias`.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ViewKind::View,
            distinct: false,
            columns: Vec::new(),
            from: vec![TableRef {
                alias: alias.into(),
                grain: None,
                table: table.into(),
                join: JoinKind::Inner,
                on: None,
            }],
            where_clause: None,
            group_by: Vec::new(),
            params: Vec::new(),
            grain: String::new(),
            resolved: Vec::new(),
        }
    }

    /// Changes the flavour.
    #[must_use]
    pub const fn kind(mut self, kind: ViewKind) -> Self {
        self.kind = kind;
        self
    }

    /// Adds a selected column.
    #[must_use]
    pub fn column(mut self, alias: impl Into<String>, expr: Expr) -> Self {
        self.columns.push(ViewColumn {
            alias: alias.into(),
            expr,
        });
        self
    }

    /// Adds a joined table.
    #[must_use]
    pub fn join(
        mut self,
        join: JoinKind,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: Expr,
    ) -> Self {
        self.from.push(TableRef {
            alias: alias.into(),
            grain: None,
            table: table.into(),
            join,
            on: Some(on),
        });
        self
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_clause = Some(condition);
        self
    }

    /// Adds a column alias to the group-by list.
    #[must_use]
    pub fn group_by(mut self, alias: impl Into<String>) -> Self {
        self.group_by.push(alias.into());
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, param_type: ColumnType) -> Self {
        self.params.push(ViewParam {
            name: name.into(),
            param_type,
        });
        self
    }

    /// Selects distinct rows.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Owning grain, set when the score is finalized.
    #[must_use]
    pub fn grain(&self) -> &str {
        &self.grain
    }

    /// Output columns with inferred types. Empty before finalization.
    #[must_use]
    pub fn output_columns(&self) -> &[Column] {
        &self.resolved
    }

    /// Returns true when the aliased column is computed by an aggregate.
    #[must_use]
    pub fn is_aggregate(&self, alias: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.alias == alias && c.expr.contains_aggregate())
    }

    /// Looks up a selected column.
    #[must_use]
    pub fn view_column(&self, alias: &str) -> Option<&ViewColumn> {
        self.columns.iter().find(|c| c.alias == alias)
    }

    /// Source table reference of a materialized view.
    #[must_use]
    pub fn source(&self) -> Option<&TableRef> {
        self.from.first()
    }

    /// Target grain of a table reference.
    #[must_use]
    pub fn ref_grain<'a>(&'a self, table_ref: &'a TableRef) -> &'a str {
        table_ref.grain.as_deref().unwrap_or(&self.grain)
    }

    /// Checks view invariants and infers output column types.
    ///
    /// `lookup` resolves a `(grain, table)` pair to its declaration.
    pub(crate) fn finalize<'t>(
        &mut self,
        grain: &str,
        lookup: &dyn Fn(&str, &str) -> Option<&'t Table>,
    ) -> Result<(), ModelError> {
        self.grain = grain.to_string();
        let owner = format!("{grain}.{}", self.name);

        if self.columns.is_empty() {
            return Err(self.invalid("a view must select at least one column"));
        }
        let mut aliases = HashSet::new();
        for column in &self.columns {
            if column.alias.is_empty() {
                return Err(ModelError::EmptyName { what: "column alias" });
            }
            if !aliases.insert(column.alias.as_str()) {
                return Err(ModelError::Duplicate {
                    what: "column alias",
                    name: column.alias.clone(),
                    owner,
                });
            }
        }

        if self.from.is_empty() {
            return Err(self.invalid("a view must select from at least one table"));
        }
        let mut sources: Vec<(&TableRef, &'t Table)> = Vec::new();
        let mut table_aliases = HashSet::new();
        for (position, table_ref) in self.from.iter().enumerate() {
            if table_ref.alias.is_empty() {
                return Err(ModelError::EmptyName { what: "table alias" });
            }
            if !table_aliases.insert(table_ref.alias.as_str()) {
                return Err(ModelError::Duplicate {
                    what: "table alias",
                    name: table_ref.alias.clone(),
                    owner,
                });
            }
            let target_grain = table_ref.grain.as_deref().unwrap_or(grain);
            let table = lookup(target_grain, &table_ref.table).ok_or_else(|| {
                ModelError::UnresolvedReference {
                    what: "table",
                    name: format!("{target_grain}.{}", table_ref.table),
                    owner: owner.clone(),
                }
            })?;
            if position > 0 && table_ref.on.is_none() {
                return Err(self.invalid(&format!(
                    "join of '{}' has no ON condition",
                    table_ref.alias
                )));
            }
            sources.push((table_ref, table));
        }

        let scope = Scope {
            view: &self.name,
            sources: &sources,
            params: &self.params,
        };

        for on in sources.iter().filter_map(|(r, _)| r.on.as_ref()) {
            scope.check(on)?;
            if !on.is_boolean() {
                return Err(ModelError::NonBooleanCondition {
                    view: self.name.clone(),
                });
            }
        }
        if let Some(condition) = &self.where_clause {
            scope.check(condition)?;
            if !condition.is_boolean() {
                return Err(ModelError::NonBooleanCondition {
                    view: self.name.clone(),
                });
            }
        }

        let mut resolved = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            scope.check(&column.expr)?;
            let (column_type, nullable) = scope.infer(&column.expr);
            let mut out = Column::new(column.alias.clone(), column_type);
            out.nullable = nullable;
            resolved.push(out);
        }

        self.check_grouping()?;
        if self.kind != ViewKind::ParameterizedView && !self.params.is_empty() {
            return Err(self.invalid("only parameterized views declare parameters"));
        }
        if self.kind == ViewKind::MaterializedView {
            self.check_materialized(&sources, &mut resolved)?;
        }

        self.resolved = resolved;
        Ok(())
    }

    fn check_grouping(&self) -> Result<(), ModelError> {
        let mut grouped = HashSet::new();
        for alias in &self.group_by {
            let column = self.view_column(alias).ok_or_else(|| ModelError::UnknownColumn {
                owner: self.name.clone(),
                column: alias.clone(),
            })?;
            if column.expr.contains_aggregate() {
                return Err(self.invalid(&format!("aggregate column '{alias}' cannot be grouped")));
            }
            if !grouped.insert(alias.as_str()) {
                return Err(ModelError::Duplicate {
                    what: "group-by column",
                    name: alias.clone(),
                    owner: self.name.clone(),
                });
            }
        }

        let has_aggregate = self.columns.iter().any(|c| c.expr.contains_aggregate());
        if has_aggregate || !self.group_by.is_empty() {
            for column in &self.columns {
                if !column.expr.contains_aggregate() && !grouped.contains(column.alias.as_str()) {
                    return Err(ModelError::UngroupedColumn {
                        view: self.name.clone(),
                        alias: column.alias.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_materialized(
        &self,
        sources: &[(&TableRef, &Table)],
        resolved: &mut [Column],
    ) -> Result<(), ModelError> {
        if sources.len() != 1 {
            return Err(self.invalid("a materialized view reads exactly one table"));
        }
        if self.where_clause.is_some() || self.distinct {
            return Err(self.invalid("a materialized view has no WHERE or DISTINCT"));
        }
        if self.group_by.is_empty() {
            return Err(self.invalid("a materialized view must group its rows"));
        }
        let source = sources[0].1;
        for (column, out) in self.columns.iter().zip(resolved.iter_mut()) {
            match &column.expr {
                Expr::Field { column: name, .. } => {
                    let nullable = source.column(name).map_or(true, |c| c.nullable);
                    if nullable {
                        return Err(self.invalid(&format!(
                            "grouped column '{}' must be NOT NULL",
                            column.alias
                        )));
                    }
                    out.nullable = false;
                }
                Expr::Aggregate {
                    func: AggregateFunc::Count,
                    arg: None,
                } => {}
                Expr::Aggregate {
                    func: AggregateFunc::Sum,
                    arg: Some(arg),
                } if matches!(arg.as_ref(), Expr::Field { .. }) => {}
                _ => {
                    return Err(self.invalid(&format!(
                        "column '{}' must be a grouped field, SUM(field) or COUNT(*)",
                        column.alias
                    )));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> ModelError {
        ModelError::InvalidView {
            view: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Name resolution scope of one view.
struct Scope<'s, 't> {
    view: &'s str,
    sources: &'s [(&'s TableRef, &'t Table)],
    params: &'s [ViewParam],
}

impl<'t> Scope<'_, 't> {
    fn resolve(&self, table: Option<&str>, column: &str) -> Result<(&'t Column, JoinKind), ModelError> {
        if let Some(alias) = table {
            let &(table_ref, source) = self
                .sources
                .iter()
                .find(|(r, _)| r.alias == alias)
                .ok_or_else(|| ModelError::UnresolvedReference {
                    what: "table alias",
                    name: alias.to_string(),
                    owner: self.view.to_string(),
                })?;
            let found = source.column(column).ok_or_else(|| ModelError::UnknownColumn {
                owner: format!("{}.{}", self.view, alias),
                column: column.to_string(),
            })?;
            return Ok((found, table_ref.join));
        }
        let hits: Vec<(&'t Column, JoinKind)> = self
            .sources
            .iter()
            .filter_map(|&(r, t)| t.column(column).map(|c| (c, r.join)))
            .collect();
        match hits.as_slice() {
            [hit] => Ok(*hit),
            [] => Err(ModelError::UnknownColumn {
                owner: self.view.to_string(),
                column: column.to_string(),
            }),
            _ => Err(ModelError::AmbiguousColumn {
                view: self.view.to_string(),
                column: column.to_string(),
            }),
        }
    }

    fn check(&self, expr: &Expr) -> Result<(), ModelError> {
        let mut result = Ok(());
        expr.visit(&mut |node| {
            if result.is_err() {
                return;
            }
            match node {
                Expr::Field { table, column } => {
                    if let Err(e) = self.resolve(table.as_deref(), column) {
                        result = Err(e);
                    }
                }
                Expr::Param(name) if !self.params.iter().any(|p| &p.name == name) => {
                    result = Err(ModelError::UnresolvedReference {
                        what: "parameter",
                        name: name.clone(),
                        owner: self.view.to_string(),
                    });
                }
                Expr::Slot(_) => {
                    result = Err(ModelError::InvalidView {
                        view: self.view.to_string(),
                        reason: "positional slots are not allowed in views".to_string(),
                    });
                }
                _ => {}
            }
        });
        result
    }

    /// Infers type and nullability; callers have already run `check`.
    fn infer(&self, expr: &Expr) -> (ColumnType, bool) {
        match expr {
            Expr::Field { table, column } => match self.resolve(table.as_deref(), column) {
                Ok((c, join)) => (c.column_type, c.nullable || join != JoinKind::Inner),
                Err(_) => (ColumnType::Text, true),
            },
            Expr::Param(name) => self
                .params
                .iter()
                .find(|p| &p.name == name)
                .map_or((ColumnType::Text, true), |p| (p.param_type, true)),
            Expr::Literal(value) => match value {
                SqlValue::Null => (ColumnType::Text, true),
                SqlValue::Bool(_) => (ColumnType::Boolean, false),
                SqlValue::Int(_) => (ColumnType::Integer, false),
                SqlValue::Float(_) => (ColumnType::Real, false),
                SqlValue::Text(_) => (ColumnType::Text, false),
                SqlValue::Blob(_) => (ColumnType::Binary, false),
            },
            Expr::Aggregate { func, arg } => match (func, arg) {
                (AggregateFunc::Count, _) => (ColumnType::Integer, false),
                (_, Some(arg)) => (self.infer(arg).0, true),
                (_, None) => (ColumnType::Integer, true),
            },
            Expr::Binary { op, left, right } => {
                let (l, ln) = self.infer(left);
                let (r, rn) = self.infer(right);
                let ty = match op {
                    BinaryOp::Concat => ColumnType::Text,
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                        if l == ColumnType::Integer && r == ColumnType::Integer {
                            ColumnType::Integer
                        } else {
                            ColumnType::Real
                        }
                    }
                    _ => ColumnType::Boolean,
                };
                (ty, ln || rn)
            }
            _ => (ColumnType::Boolean, true),
        }
    }
}
