//! Schema synchronizer.
//!
//! Brings a live SQLite database in line with a [`Score`]. Each grain is
//! handled in its own transaction: every difference between the live
//! catalog and the declaration is turned into a [`DdlPlan`] by the
//! generator and executed immediately, and the catalog is read again
//! before the next decision. A failure rolls the grain back and stops the
//! run; grains already committed stay committed.

use std::collections::HashSet;

use chrono::Utc;
use sqlx::{Connection, SqliteConnection};
use strata_core::{
    DbTableInfo, DdlGenerator, DdlPlan, Dialect, Grain, Index, Score, SqliteDialect, Table, View,
    ViewKind, REVISION_COLUMN,
};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{Result, SyncError};
use crate::report::{OperationKind, Outcome, ReportEntry, ReportSink, SyncReport};

/// Passes allowed for one table to settle, on top of one per column.
const MAX_PASSES: usize = 8;

/// Synchronizer configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Execute every statement, then roll each grain back.
    pub dry_run: bool,
}

/// Applies a score to a live SQLite database.
pub struct Synchronizer<'s> {
    score: &'s Score,
    generator: SqliteDialect,
    options: SyncOptions,
}

impl<'s> Synchronizer<'s> {
    /// Creates a synchronizer for `score`.
    #[must_use]
    pub fn new(score: &'s Score) -> Self {
        Self {
            score,
            generator: SqliteDialect::new(),
            options: SyncOptions::default(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub const fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables dry-run mode (statements run but are rolled back).
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.options.dry_run = enabled;
        self
    }

    /// Synchronizes every grain and returns the collected report.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the run; see [`Self::run_with_sink`].
    pub async fn run(&self, conn: &mut SqliteConnection) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.run_with_sink(conn, &mut report).await?;
        Ok(report)
    }

    /// Synchronizes every grain, pushing entries to `sink` as they happen.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unsupported`] when the dialect cannot express a
    /// required change, [`SyncError::Convergence`] when a statement fails or
    /// a table does not settle, and database errors from introspection.
    pub async fn run_with_sink(
        &self,
        conn: &mut SqliteConnection,
        sink: &mut dyn ReportSink,
    ) -> Result<()> {
        // Table rebuilds need enforcement off; it cannot change inside a
        // transaction.
        let (enforced,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&mut *conn)
            .await?;
        if enforced != 0 {
            sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
        }
        let result = self.run_grains(conn, sink).await;
        if enforced != 0 {
            sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
        }
        result
    }

    async fn run_grains(&self, conn: &mut SqliteConnection, sink: &mut dyn ReportSink) -> Result<()> {
        for grain in self.score.grains() {
            info!(grain = %grain.name, dry_run = self.options.dry_run, "Synchronizing grain");

            let mut tx = conn.begin().await?;
            let mut run = GrainRun {
                score: self.score,
                grain,
                generator: &self.generator,
                catalog: Catalog::new(&self.generator),
                sink: &mut *sink,
                dry_run: self.options.dry_run,
            };
            match run.execute(&mut tx).await {
                Ok(()) if self.options.dry_run => {
                    tx.rollback().await?;
                    info!(grain = %grain.name, "Dry run rolled back");
                }
                Ok(()) => {
                    tx.commit().await?;
                    info!(grain = %grain.name, "Grain synchronized");
                }
                Err(err) => {
                    tx.rollback().await?;
                    warn!(grain = %grain.name, error = %err, "Grain rolled back");
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// Synchronizes `score` onto `conn` with default options.
///
/// # Errors
///
/// See [`Synchronizer::run_with_sink`].
pub async fn synchronize(score: &Score, conn: &mut SqliteConnection) -> Result<SyncReport> {
    Synchronizer::new(score).run(conn).await
}

/// State of the synchronization of one grain.
struct GrainRun<'r> {
    score: &'r Score,
    grain: &'r Grain,
    generator: &'r SqliteDialect,
    catalog: Catalog<'r>,
    sink: &'r mut dyn ReportSink,
    dry_run: bool,
}

impl<'r> GrainRun<'r> {
    async fn execute(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        let grain = self.grain;
        let g = self.generator;

        self.apply(conn, OperationKind::CreateSchema, &grain.name, g.create_schema(grain))
            .await?;

        let ordered = grain.tables_in_dependency_order();
        for table in &ordered {
            self.sync_table(conn, table).await?;
        }
        self.report_undeclared_tables(conn).await?;
        for table in &ordered {
            self.sync_foreign_keys(conn, table).await?;
        }
        self.sync_indexes(conn).await?;
        for table in &grain.tables {
            let exists = self
                .catalog
                .trigger_exists(conn, &g.versioning_trigger_name(table))
                .await?;
            self.apply(
                conn,
                OperationKind::UpdateVersioningTrigger,
                &table.name,
                g.update_versioning_trigger(table, exists),
            )
            .await?;
        }
        self.sync_views(conn).await?;
        for view in grain.views_of(ViewKind::ParameterizedView) {
            self.apply(
                conn,
                OperationKind::CreateParameterizedView,
                &view.name,
                g.create_parameterized_view(view),
            )
            .await?;
        }
        for view in grain.views_of(ViewKind::MaterializedView) {
            self.sync_materialized_view(conn, view).await?;
        }
        self.check_foreign_keys(conn).await
    }

    fn record(&mut self, kind: OperationKind, element: &str, statement: Option<String>, outcome: Outcome) {
        self.sink.record(ReportEntry {
            grain: self.grain.name.clone(),
            kind,
            element: element.to_string(),
            statement,
            outcome,
            at: Utc::now(),
        });
    }

    /// Executes a plan statement by statement. Returns whether anything
    /// was executed.
    async fn apply(
        &mut self,
        conn: &mut SqliteConnection,
        kind: OperationKind,
        element: &str,
        plan: DdlPlan,
    ) -> Result<bool> {
        match plan {
            DdlPlan::NoOp => Ok(false),
            DdlPlan::Unsupported { operation } => {
                self.record(kind, element, None, Outcome::Unsupported);
                Err(SyncError::Unsupported {
                    grain: self.grain.name.clone(),
                    element: element.to_string(),
                    operation,
                    dialect: self.generator.name(),
                })
            }
            DdlPlan::Statements(statements) => {
                for sql in statements {
                    debug!(grain = %self.grain.name, sql = %sql, "Executing SQL");
                    if let Err(err) = sqlx::query(&sql).persistent(false).execute(&mut *conn).await {
                        self.record(kind, element, Some(sql.clone()), Outcome::Failed(err.to_string()));
                        return Err(SyncError::Convergence {
                            grain: self.grain.name.clone(),
                            element: element.to_string(),
                            reason: format!("{err} while executing: {sql}"),
                        });
                    }
                    let outcome = if self.dry_run {
                        Outcome::DryRun
                    } else {
                        Outcome::Applied
                    };
                    self.record(kind, element, Some(sql), outcome);
                }
                Ok(true)
            }
        }
    }

    fn not_settled(&self, element: &str) -> SyncError {
        SyncError::Convergence {
            grain: self.grain.name.clone(),
            element: element.to_string(),
            reason: String::from("live state did not settle"),
        }
    }

    async fn sync_table(&mut self, conn: &mut SqliteConnection, table: &Table) -> Result<()> {
        let g = self.generator;
        for _ in 0..MAX_PASSES + table.columns.len() {
            let Some(live) = self.catalog.table(conn, &self.grain.name, &table.name).await? else {
                self.apply(conn, OperationKind::CreateTable, &table.name, g.create_table(table))
                    .await?;
                continue;
            };
            match self.next_table_change(table, &live) {
                Some((kind, element, plan)) => {
                    self.apply(conn, kind, &element, plan).await?;
                }
                None => return Ok(()),
            }
        }
        Err(self.not_settled(&table.name))
    }

    /// First difference between a live table and its declaration: missing
    /// columns, then changed ones, then extra ones, then the primary key.
    fn next_table_change(&self, table: &Table, live: &DbTableInfo) -> Option<(OperationKind, String, DdlPlan)> {
        let g = self.generator;
        let columns = table.physical_columns();
        let element = |column: &str| format!("{}.{column}", table.name);

        if let Some(column) = columns.iter().find(|c| !live.has_column(&c.name)) {
            return Some((
                OperationKind::AddColumn,
                element(&column.name),
                g.add_column(table, column, live),
            ));
        }
        for column in &columns {
            let plan = g.update_column(table, column, live);
            if !matches!(plan, DdlPlan::NoOp) {
                return Some((OperationKind::UpdateColumn, element(&column.name), plan));
            }
        }
        let extra = live.columns.iter().find(|live_column| {
            live_column.name != REVISION_COLUMN && columns.iter().all(|c| c.name != live_column.name)
        });
        if let Some(column) = extra {
            return Some((
                OperationKind::DropColumn,
                element(&column.name),
                g.drop_column(table, &column.name, live),
            ));
        }
        let plan = g.update_primary_key(table, live);
        (!matches!(plan, DdlPlan::NoOp))
            .then(|| (OperationKind::UpdatePrimaryKey, table.name.clone(), plan))
    }

    async fn report_undeclared_tables(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        let grain = self.grain;
        let declared: HashSet<&str> = grain
            .tables
            .iter()
            .map(|t| t.name.as_str())
            .chain(grain.views_of(ViewKind::MaterializedView).map(|v| v.name.as_str()))
            .collect();
        for name in self.catalog.tables(conn, &grain.name).await? {
            if !declared.contains(name.as_str()) {
                warn!(grain = %grain.name, table = %name, "Live table is not declared, leaving it in place");
                self.record(
                    OperationKind::UndeclaredTable,
                    &name,
                    None,
                    Outcome::Warning(String::from("table is not declared and was left in place")),
                );
            }
        }
        Ok(())
    }

    async fn sync_foreign_keys(&mut self, conn: &mut SqliteConnection, table: &Table) -> Result<()> {
        let g = self.generator;
        for _ in 0..MAX_PASSES + table.foreign_keys.len() {
            let Some(live) = self.catalog.table(conn, &self.grain.name, &table.name).await? else {
                return Ok(());
            };
            let missing = table
                .foreign_keys
                .iter()
                .find(|fk| !live.foreign_keys.iter().any(|l| g.foreign_key_matches(fk, l)));
            if let Some(fk) = missing {
                let element = format!("{}({})", table.name, fk.columns.join(", "));
                self.apply(conn, OperationKind::CreateForeignKey, &element, g.create_foreign_key(table, fk, &live))
                    .await?;
                continue;
            }
            let stale = live
                .foreign_keys
                .iter()
                .find(|l| !table.foreign_keys.iter().any(|fk| g.foreign_key_matches(fk, l)));
            if let Some(fk) = stale {
                let element = format!("{}({})", table.name, fk.columns.join(", "));
                self.apply(conn, OperationKind::DropForeignKey, &element, g.drop_foreign_key(table, fk, &live))
                    .await?;
                continue;
            }
            return Ok(());
        }
        Err(self.not_settled(&table.name))
    }

    async fn sync_indexes(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        let grain = self.grain;
        let g = self.generator;
        let declared: Vec<(&Table, &Index, String)> = grain
            .tables
            .iter()
            .flat_map(|t| {
                t.indices
                    .iter()
                    .map(move |i| (t, i, g.index_name(&grain.name, &i.name)))
            })
            .collect();

        let live = self.catalog.indexes(conn, &grain.name).await?;
        let mut kept = Vec::with_capacity(live.len());
        for index in &live {
            let current = declared.iter().any(|(t, i, name)| {
                *name == index.name && t.name == index.table && i.columns == index.columns
            });
            if current {
                kept.push(index.name.as_str());
            } else {
                self.apply(conn, OperationKind::DropIndex, &index.name, g.drop_index(&grain.name, index))
                    .await?;
            }
        }
        for (table, index, name) in &declared {
            if !kept.contains(&name.as_str()) {
                self.apply(conn, OperationKind::CreateIndex, name, g.create_index(table, index))
                    .await?;
            }
        }
        Ok(())
    }

    async fn sync_views(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        let grain = self.grain;
        let g = self.generator;
        let declared: Vec<&View> = grain.views_of(ViewKind::View).collect();
        let live = self.catalog.views(conn, &grain.name).await?;

        for view in &live {
            if declared.iter().all(|v| v.name != view.name) {
                self.apply(conn, OperationKind::DropView, &view.name, g.drop_view(&grain.name, &view.name))
                    .await?;
            }
        }
        for view in declared {
            let fingerprint = g.view_fingerprint(view);
            match live.iter().find(|l| l.name == view.name) {
                Some(l) if l.definition.as_deref() == Some(fingerprint.as_str()) => continue,
                Some(_) => {
                    self.apply(conn, OperationKind::DropView, &view.name, g.drop_view(&grain.name, &view.name))
                        .await?;
                }
                None => {}
            }
            self.apply(conn, OperationKind::CreateView, &view.name, g.create_view(view))
                .await?;
        }
        Ok(())
    }

    fn source_table(&self, view: &View) -> Result<&'r Table> {
        let score = self.score;
        view.source()
            .and_then(|r| {
                score
                    .grain(view.ref_grain(r))
                    .and_then(|g| g.find_table(&r.table))
            })
            .ok_or_else(|| SyncError::UnknownElement {
                grain: self.grain.name.clone(),
                name: view.name.clone(),
            })
    }

    fn materialized_table_matches(&self, view: &View, live: &DbTableInfo) -> bool {
        let g = self.generator;
        let expected = g.materialized_view_columns(view);
        live.columns.len() == expected.len()
            && expected
                .iter()
                .all(|c| live.column(&c.name).is_some_and(|l| g.column_matches(c, l)))
            && live.primary_key.columns == view.group_by
    }

    async fn sync_materialized_view(&mut self, conn: &mut SqliteConnection, view: &View) -> Result<()> {
        let grain = self.grain;
        let g = self.generator;
        let source = self.source_table(view)?;
        let live = self.catalog.table(conn, &grain.name, &view.name).await?;

        let mut current = live
            .as_ref()
            .is_some_and(|l| self.materialized_table_matches(view, l));
        if current {
            for (name, sql) in g.materialized_view_triggers(view, source) {
                if self.catalog.trigger_sql(conn, &name).await?.as_deref() != Some(sql.as_str()) {
                    current = false;
                    break;
                }
            }
        }
        if current {
            return Ok(());
        }

        self.apply(
            conn,
            OperationKind::DropMaterializedViewTriggers,
            &view.name,
            g.drop_materialized_view_triggers(view, source),
        )
        .await?;
        if live.is_some() {
            self.apply(
                conn,
                OperationKind::DropMaterializedView,
                &view.name,
                g.drop_materialized_view(&grain.name, &view.name),
            )
            .await?;
        }
        self.apply(
            conn,
            OperationKind::CreateMaterializedView,
            &view.name,
            g.create_materialized_view(view, source),
        )
        .await?;
        self.apply(
            conn,
            OperationKind::CreateMaterializedViewTriggers,
            &view.name,
            g.create_materialized_view_triggers(view, source),
        )
        .await?;
        Ok(())
    }

    async fn check_foreign_keys(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        let violations = self.catalog.foreign_key_violations(conn).await?;
        let offending = self.grain.tables.iter().find(|table| {
            let physical = self.generator.physical_name(&self.grain.name, &table.name);
            violations.contains(&physical)
        });
        match offending {
            Some(table) => Err(SyncError::Convergence {
                grain: self.grain.name.clone(),
                element: table.name.clone(),
                reason: String::from("rows violate a foreign key"),
            }),
            None => Ok(()),
        }
    }
}
