//! Error types for the schema model and the query term builder.

/// A declared score violates one of the model invariants.
///
/// Raised while a score is finalized, before any database is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// An identifier is empty.
    #[error("{what} name must not be empty")]
    EmptyName {
        /// Kind of element carrying the empty name.
        what: &'static str,
    },

    /// A grain, element or index name cannot be mapped to a distinct
    /// physical name.
    #[error("Invalid {what} name '{name}': {reason}")]
    InvalidName {
        /// Kind of element carrying the name.
        what: &'static str,
        /// The rejected name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Two elements of the same kind share a name inside one owner.
    #[error("Duplicate {what} '{name}' in '{owner}'")]
    Duplicate {
        /// Kind of element ("grain", "table", "column", ...).
        what: &'static str,
        /// The repeated name.
        name: String,
        /// The owning element.
        owner: String,
    },

    /// A column reference does not resolve.
    #[error("Unknown column '{column}' in '{owner}'")]
    UnknownColumn {
        /// The owning element.
        owner: String,
        /// The missing column.
        column: String,
    },

    /// A table or grain reference does not resolve.
    #[error("Unknown {what} '{name}' referenced from '{owner}'")]
    UnresolvedReference {
        /// Kind of the missing element.
        what: &'static str,
        /// The missing name.
        name: String,
        /// The element holding the reference.
        owner: String,
    },

    /// An unqualified field reference matches several joined tables.
    #[error("Ambiguous column '{column}' in view '{view}'")]
    AmbiguousColumn {
        /// The view.
        view: String,
        /// The column.
        column: String,
    },

    /// A primary key is malformed.
    #[error("Invalid primary key on '{table}': {reason}")]
    InvalidPrimaryKey {
        /// The table.
        table: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A foreign key does not match its target.
    #[error("Invalid foreign key on '{table}': {reason}")]
    InvalidForeignKey {
        /// The referencing table.
        table: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A column of a view is neither aggregated nor grouped.
    #[error("Column '{alias}' of view '{view}' is not aggregated and missing from GROUP BY")]
    UngroupedColumn {
        /// The view.
        view: String,
        /// Alias of the offending column.
        alias: String,
    },

    /// A where or join condition does not evaluate to a boolean.
    #[error("Condition in view '{view}' is not a boolean expression")]
    NonBooleanCondition {
        /// The view.
        view: String,
    },

    /// A view shape is not allowed for its kind.
    #[error("Invalid view '{view}': {reason}")]
    InvalidView {
        /// The view.
        view: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Grains reference each other in a cycle.
    #[error("Cyclic reference between grains: {0}")]
    CyclicGrains(String),

    /// Score file could not be decoded.
    #[error("Malformed score: {0}")]
    Malformed(String),
}

/// Arguments supplied to a compiled statement do not match its shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentContractError {
    /// Wrong number of positional arguments.
    #[error("Invalid number of '{operation}' arguments for '{element}': expected {expected}, provided {provided}")]
    Count {
        /// The operation ("get", "select", ...).
        operation: &'static str,
        /// The table or view.
        element: String,
        /// Required argument count.
        expected: usize,
        /// Supplied argument count.
        provided: usize,
    },

    /// A filter or sort names a column the element does not have.
    #[error("Unknown column '{column}' on '{element}'")]
    UnknownColumn {
        /// The table or view.
        element: String,
        /// The column.
        column: String,
    },

    /// An operation needs a primary key the element does not have.
    #[error("'{element}' has no primary key")]
    NoPrimaryKey {
        /// The table or view.
        element: String,
    },

    /// A write was attempted on a read-only element.
    #[error("'{element}' is read-only")]
    ReadOnly {
        /// The table or view.
        element: String,
    },

    /// The statement needs a revision value that was not supplied.
    #[error("Missing record version for '{element}'")]
    MissingRevision {
        /// The table.
        element: String,
    },

    /// An update was requested on an element with nothing to assign.
    #[error("'{element}' has no column outside its primary key to update")]
    NothingToUpdate {
        /// The table.
        element: String,
    },
}
