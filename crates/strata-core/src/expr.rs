//! Expression trees shared by view definitions and query terms.
//!
//! An [`Expr`] is dialect-neutral. It is turned into SQL text by
//! [`Expr::render`], which asks the active [`Dialect`] for literals,
//! placeholders and quoting, and an [`ExprContext`] for how column and
//! parameter references are spelled in the surrounding statement.

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::value::{SqlValue, ToSqlValue};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
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
    /// `LIKE`
    Like,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// String concatenation.
    Concat,
}

impl BinaryOp {
    /// Returns the SQL spelling of the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Concat => "||",
        }
    }

    const fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::NotEq | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Like => 3,
            Self::Add | Self::Sub | Self::Concat => 4,
            Self::Mul | Self::Div => 5,
        }
    }

    /// Returns true when the operator yields a boolean.
    #[must_use]
    pub const fn is_predicate(self) -> bool {
        self.precedence() <= 3
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    /// `COUNT`; without an argument renders as `COUNT(*)`.
    Count,
    /// `SUM`
    Sum,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
}

impl AggregateFunc {
    const fn name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// A dialect-neutral SQL expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a column, optionally qualified by a table alias.
    Field {
        /// Table alias inside the owning view.
        table: Option<String>,
        /// Column name.
        column: String,
    },
    /// Named parameter of a parameterized view.
    Param(String),
    /// Positional parameter slot (0-based) of a compiled statement.
    Slot(usize),
    /// Constant value.
    Literal(SqlValue),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical negation.
    Not(Box<Expr>),
    /// `IS NULL` / `IS NOT NULL`.
    IsNull {
        /// Tested expression.
        expr: Box<Expr>,
        /// True for `IS NOT NULL`.
        negated: bool,
    },
    /// `BETWEEN low AND high`.
    Between {
        /// Tested expression.
        expr: Box<Expr>,
        /// Lower bound.
        low: Box<Expr>,
        /// Upper bound.
        high: Box<Expr>,
    },
    /// `IN (...)`.
    In {
        /// Tested expression.
        expr: Box<Expr>,
        /// Candidate values.
        list: Vec<Expr>,
    },
    /// Aggregate call.
    Aggregate {
        /// Function.
        func: AggregateFunc,
        /// Argument; `None` only for `COUNT(*)`.
        arg: Option<Box<Expr>>,
    },
}

/// How the statement around an expression spells references.
pub trait ExprContext {
    /// Renders a column reference.
    fn field(&self, dialect: &dyn Dialect, table: Option<&str>, column: &str) -> String;

    /// Renders a named parameter reference.
    fn param(&self, dialect: &dyn Dialect, name: &str) -> String {
        dialect.quote(name)
    }
}

/// Context that renders fields as quoted column names, qualified by the
/// alias when one is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainContext;

impl ExprContext for PlainContext {
    fn field(&self, dialect: &dyn Dialect, table: Option<&str>, column: &str) -> String {
        match table {
            Some(alias) => format!("{}.{}", dialect.quote(alias), dialect.quote(column)),
            None => dialect.quote(column),
        }
    }
}

impl Expr {
    /// Unqualified column reference.
    #[must_use]
    pub fn field(column: impl Into<String>) -> Self {
        Self::Field {
            table: None,
            column: column.into(),
        }
    }

    /// Column reference qualified by a table alias.
    #[must_use]
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Field {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    /// Named view parameter.
    #[must_use]
    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    /// Literal value.
    #[must_use]
    pub fn lit(value: impl ToSqlValue) -> Self {
        Self::Literal(value.to_sql_value())
    }

    /// `COUNT(*)`.
    #[must_use]
    pub const fn count() -> Self {
        Self::Aggregate {
            func: AggregateFunc::Count,
            arg: None,
        }
    }

    /// `SUM(expr)`.
    #[must_use]
    pub fn sum(expr: Self) -> Self {
        Self::aggregate(AggregateFunc::Sum, expr)
    }

    /// Aggregate over an argument.
    #[must_use]
    pub fn aggregate(func: AggregateFunc, expr: Self) -> Self {
        Self::Aggregate {
            func,
            arg: Some(Box::new(expr)),
        }
    }

    /// Builds `self <op> rhs`.
    #[must_use]
    pub fn binary(self, op: BinaryOp, rhs: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }

    /// `self = rhs`
    #[must_use]
    pub fn eq(self, rhs: Self) -> Self {
        self.binary(BinaryOp::Eq, rhs)
    }

    /// `self <> rhs`
    #[must_use]
    pub fn not_eq(self, rhs: Self) -> Self {
        self.binary(BinaryOp::NotEq, rhs)
    }

    /// `self < rhs`
    #[must_use]
    pub fn lt(self, rhs: Self) -> Self {
        self.binary(BinaryOp::Lt, rhs)
    }

    /// `self <= rhs`
    #[must_use]
    pub fn le(self, rhs: Self) -> Self {
        self.binary(BinaryOp::Le, rhs)
    }

    /// `self > rhs`
    #[must_use]
    pub fn gt(self, rhs: Self) -> Self {
        self.binary(BinaryOp::Gt, rhs)
    }

    /// `self >= rhs`
    #[must_use]
    pub fn ge(self, rhs: Self) -> Self {
        self.binary(BinaryOp::Ge, rhs)
    }

    /// `self LIKE rhs`
    #[must_use]
    pub fn like(self, rhs: Self) -> Self {
        self.binary(BinaryOp::Like, rhs)
    }

    /// `self AND rhs`
    #[must_use]
    pub fn and(self, rhs: Self) -> Self {
        self.binary(BinaryOp::And, rhs)
    }

    /// `self OR rhs`
    #[must_use]
    pub fn or(self, rhs: Self) -> Self {
        self.binary(BinaryOp::Or, rhs)
    }

    /// `self IS NULL`
    #[must_use]
    pub fn is_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// `self IS NOT NULL`
    #[must_use]
    pub fn is_not_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// `self BETWEEN low AND high`
    #[must_use]
    pub fn between(self, low: Self, high: Self) -> Self {
        Self::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    /// `self IN (list)`
    #[must_use]
    pub fn in_list(self, list: Vec<Self>) -> Self {
        Self::In {
            expr: Box::new(self),
            list,
        }
    }

    /// Joins predicates with `AND`; `None` for an empty input.
    #[must_use]
    pub fn conjunction(terms: impl IntoIterator<Item = Self>) -> Option<Self> {
        terms.into_iter().reduce(Self::and)
    }

    /// Returns true when the expression evaluates to a boolean.
    #[must_use]
    pub fn is_boolean(&self) -> bool {
        match self {
            Self::Binary { op, .. } => op.is_predicate(),
            Self::Not(_) | Self::IsNull { .. } | Self::Between { .. } | Self::In { .. } => true,
            Self::Literal(SqlValue::Bool(_)) => true,
            _ => false,
        }
    }

    /// Returns true when an aggregate call appears anywhere in the tree.
    #[must_use]
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= matches!(e, Self::Aggregate { .. }));
        found
    }

    /// Calls `f` on this node and every descendant, parents first.
    pub fn visit(&self, f: &mut impl FnMut(&Self)) {
        f(self);
        match self {
            Self::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Self::Not(e) | Self::IsNull { expr: e, .. } => e.visit(f),
            Self::Between { expr, low, high } => {
                expr.visit(f);
                low.visit(f);
                high.visit(f);
            }
            Self::In { expr, list } => {
                expr.visit(f);
                for item in list {
                    item.visit(f);
                }
            }
            Self::Aggregate { arg: Some(arg), .. } => arg.visit(f),
            Self::Field { .. }
            | Self::Param(_)
            | Self::Slot(_)
            | Self::Literal(_)
            | Self::Aggregate { arg: None, .. } => {}
        }
    }

    /// Renders the expression as SQL text.
    #[must_use]
    pub fn render(&self, dialect: &dyn Dialect, ctx: &dyn ExprContext) -> String {
        match self {
            Self::Field { table, column } => ctx.field(dialect, table.as_deref(), column),
            Self::Param(name) => ctx.param(dialect, name),
            Self::Slot(index) => dialect.placeholder(*index + 1),
            Self::Literal(value) => dialect.render_literal(value),
            Self::Binary { op, left, right } => {
                let l = left.render_operand(dialect, ctx, op.precedence(), false);
                let r = right.render_operand(dialect, ctx, op.precedence(), true);
                format!("{l} {} {r}", op.as_str())
            }
            Self::Not(inner) => format!("NOT ({})", inner.render(dialect, ctx)),
            Self::IsNull { expr, negated } => {
                let e = expr.render_operand(dialect, ctx, 3, false);
                if *negated {
                    format!("{e} IS NOT NULL")
                } else {
                    format!("{e} IS NULL")
                }
            }
            Self::Between { expr, low, high } => format!(
                "{} BETWEEN {} AND {}",
                expr.render_operand(dialect, ctx, 3, false),
                low.render_operand(dialect, ctx, 3, false),
                high.render_operand(dialect, ctx, 3, false)
            ),
            Self::In { expr, list } => {
                let items: Vec<String> = list.iter().map(|e| e.render(dialect, ctx)).collect();
                format!(
                    "{} IN ({})",
                    expr.render_operand(dialect, ctx, 3, false),
                    items.join(", ")
                )
            }
            Self::Aggregate { func, arg } => match arg {
                Some(arg) => format!("{}({})", func.name(), arg.render(dialect, ctx)),
                None => format!("{}(*)", func.name()),
            },
        }
    }

    fn render_operand(
        &self,
        dialect: &dyn Dialect,
        ctx: &dyn ExprContext,
        parent: u8,
        right: bool,
    ) -> String {
        let text = self.render(dialect, ctx);
        let needs_parens = match self {
            Self::Binary { op, .. } => {
                op.precedence() < parent || (right && op.precedence() == parent && parent > 2)
            }
            Self::IsNull { .. } | Self::Between { .. } | Self::In { .. } => parent >= 3,
            _ => false,
        };
        if needs_parens {
            format!("({text})")
        } else {
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};

    #[test]
    fn renders_precedence_with_parentheses() {
        let e = Expr::field("a")
            .eq(Expr::lit(1))
            .or(Expr::field("b").eq(Expr::lit(2)))
            .and(Expr::field("c").is_null());
        assert_eq!(
            e.render(&SqliteDialect, &PlainContext),
            "(\"a\" = 1 OR \"b\" = 2) AND \"c\" IS NULL"
        );
    }

    #[test]
    fn renders_slots_per_dialect() {
        let e = Expr::field("a")
            .eq(Expr::Slot(0))
            .and(Expr::field("b").between(Expr::Slot(1), Expr::Slot(2)));
        assert_eq!(
            e.render(&SqliteDialect, &PlainContext),
            "\"a\" = ? AND \"b\" BETWEEN ? AND ?"
        );
        assert_eq!(
            e.render(&PostgresDialect, &PlainContext),
            "\"a\" = $1 AND \"b\" BETWEEN $2 AND $3"
        );
    }

    #[test]
    fn right_operand_of_subtraction_is_grouped() {
        let e = Expr::field("a").binary(
            BinaryOp::Sub,
            Expr::field("b").binary(BinaryOp::Sub, Expr::field("c")),
        );
        assert_eq!(e.render(&SqliteDialect, &PlainContext), "\"a\" - (\"b\" - \"c\")");
    }

    #[test]
    fn aggregates_and_booleans() {
        assert!(Expr::sum(Expr::field("x")).contains_aggregate());
        assert!(!Expr::field("x").contains_aggregate());
        assert!(Expr::field("x").gt(Expr::lit(0)).is_boolean());
        assert!(!Expr::field("x").binary(BinaryOp::Add, Expr::lit(1)).is_boolean());
        assert_eq!(Expr::count().render(&SqliteDialect, &PlainContext), "COUNT(*)");
    }
}
