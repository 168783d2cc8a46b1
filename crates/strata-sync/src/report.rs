//! Structured record of what a synchronization did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of schema operation an entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Grain namespace creation.
    CreateSchema,
    /// Table creation.
    CreateTable,
    /// Column addition.
    AddColumn,
    /// Column type, nullability or default change.
    UpdateColumn,
    /// Column removal.
    DropColumn,
    /// Primary key change.
    UpdatePrimaryKey,
    /// Foreign key creation.
    CreateForeignKey,
    /// Foreign key removal.
    DropForeignKey,
    /// Index creation.
    CreateIndex,
    /// Index removal.
    DropIndex,
    /// Revision-check trigger creation or removal.
    UpdateVersioningTrigger,
    /// View creation.
    CreateView,
    /// View removal.
    DropView,
    /// Parameterized view creation.
    CreateParameterizedView,
    /// Materialized view table creation and initial fill.
    CreateMaterializedView,
    /// Materialized view table removal.
    DropMaterializedView,
    /// Materialized view trigger creation.
    CreateMaterializedViewTriggers,
    /// Materialized view trigger removal.
    DropMaterializedViewTriggers,
    /// A live table the score does not declare.
    UndeclaredTable,
}

/// What happened to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The statement was executed and kept.
    Applied,
    /// The statement was executed and rolled back.
    DryRun,
    /// The statement failed.
    Failed(String),
    /// The dialect cannot express the operation.
    Unsupported,
    /// Nothing was executed; the state needs attention.
    Warning(String),
}

/// One step of a synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Grain being synchronized.
    pub grain: String,
    /// Operation kind.
    pub kind: OperationKind,
    /// Table, column, index or view concerned.
    pub element: String,
    /// Executed statement, if any.
    pub statement: Option<String>,
    /// Outcome.
    pub outcome: Outcome,
    /// When the entry was recorded.
    pub at: DateTime<Utc>,
}

/// Receives report entries as they happen.
pub trait ReportSink: Send {
    /// Records one entry.
    fn record(&mut self, entry: ReportEntry);
}

impl ReportSink for Vec<ReportEntry> {
    fn record(&mut self, entry: ReportEntry) {
        self.push(entry);
    }
}

/// Summary of a synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Number of statements executed, rolled back ones included.
    pub applied: usize,
    /// Every recorded entry in order.
    pub entries: Vec<ReportEntry>,
}

impl SyncReport {
    /// Statements of all entries, in execution order.
    #[must_use]
    pub fn statements(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| e.statement.as_deref())
            .collect()
    }

    /// Entries that carry a warning.
    pub fn warnings(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Warning(_)))
    }
}

impl ReportSink for SyncReport {
    fn record(&mut self, entry: ReportEntry) {
        if entry.statement.is_some() && matches!(entry.outcome, Outcome::Applied | Outcome::DryRun) {
            self.applied += 1;
        }
        self.entries.push(entry);
    }
}
