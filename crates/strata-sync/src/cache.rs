//! Per-connection prepared-statement cache.
//!
//! Compiled statements are keyed by [`StatementShape`], never by values.
//! Each [`LiveConnection`] gets its own cache through the process-wide
//! [`ConnectionRegistry`], which only holds weak references to
//! connections: once a connection is dropped its cache is purged on the
//! next registry access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use sqlx::{Connection, Executor, SqliteConnection};
use strata_core::{CompiledStatement, StatementShape};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::Result;

/// A database connection shared by the call contexts of one task.
#[derive(Debug)]
pub struct LiveConnection {
    conn: AsyncMutex<SqliteConnection>,
    abandoned: AtomicBool,
}

impl LiveConnection {
    /// Wraps an open connection.
    #[must_use]
    pub fn new(conn: SqliteConnection) -> Arc<Self> {
        Arc::new(Self {
            conn: AsyncMutex::new(conn),
            abandoned: AtomicBool::new(false),
        })
    }

    /// Opens a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        Ok(Self::new(SqliteConnection::connect(url).await?))
    }

    /// Locks the connection for exclusive use. A transaction left open by
    /// a dropped call context is rolled back first.
    pub async fn lock(&self) -> MutexGuard<'_, SqliteConnection> {
        let mut conn = self.conn.lock().await;
        if self.abandoned.swap(false, Ordering::AcqRel) {
            match conn.execute("ROLLBACK").await {
                Ok(_) => debug!("Rolled back abandoned transaction"),
                Err(e) => warn!(error = %e, "Failed to roll back abandoned transaction"),
            }
        }
        conn
    }

    /// Marks the open transaction as abandoned; the next [`Self::lock`]
    /// rolls it back.
    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    /// Statement cache of this connection.
    #[must_use]
    pub fn statements(self: &Arc<Self>) -> Arc<PreparedStatementCache> {
        ConnectionRegistry::global().cache(self)
    }
}

/// Compiled statements of one connection.
#[derive(Debug, Default)]
pub struct PreparedStatementCache {
    statements: Mutex<HashMap<StatementShape, Arc<CompiledStatement>>>,
    compilations: AtomicUsize,
}

impl PreparedStatementCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the statement compiled for `shape`, running `compile` only
    /// when the shape has not been seen on this connection.
    ///
    /// # Errors
    ///
    /// Returns the error of `compile`; nothing is cached in that case.
    pub fn statement<F>(&self, shape: &StatementShape, compile: F) -> Result<Arc<CompiledStatement>>
    where
        F: FnOnce() -> strata_core::term::Result<CompiledStatement>,
    {
        let mut statements = self.statements.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(statement) = statements.get(shape) {
            return Ok(Arc::clone(statement));
        }
        let statement = Arc::new(compile()?);
        self.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(
            grain = %shape.grain,
            element = %shape.element,
            sql = %statement.sql,
            "Compiled statement"
        );
        statements.insert(shape.clone(), Arc::clone(&statement));
        Ok(statement)
    }

    /// Number of times a statement was compiled.
    #[must_use]
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of cached statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry {
    connection: Weak<LiveConnection>,
    cache: Arc<PreparedStatementCache>,
}

/// Maps live connections to their statement caches.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<usize, Entry>>,
}

static GLOBAL_REGISTRY: OnceLock<ConnectionRegistry> = OnceLock::new();

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Self {
        GLOBAL_REGISTRY.get_or_init(Self::new)
    }

    fn purge(entries: &mut HashMap<usize, Entry>) {
        let before = entries.len();
        entries.retain(|_, entry| entry.connection.strong_count() > 0);
        if entries.len() < before {
            debug!(purged = before - entries.len(), "Purged statement caches of closed connections");
        }
    }

    /// Cache of `connection`, created on first use.
    #[must_use]
    pub fn cache(&self, connection: &Arc<LiveConnection>) -> Arc<PreparedStatementCache> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Self::purge(&mut entries);
        let key = Arc::as_ptr(connection) as usize;
        let entry = entries.entry(key).or_insert_with(|| Entry {
            connection: Arc::downgrade(connection),
            cache: Arc::new(PreparedStatementCache::new()),
        });
        Arc::clone(&entry.cache)
    }

    /// Number of connections with a cache, after purging closed ones.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Self::purge(&mut entries);
        entries.len()
    }

    /// Returns true when no live connection has a cache.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Column, ColumnType, Filter, Grain, Score, SqliteDialect, Table, TermBuilder};

    fn score() -> Score {
        Score::new(vec![Grain::new("hr", "1").table(
            Table::new(
                "staff",
                vec![
                    Column::new("id", ColumnType::Integer).not_null(),
                    Column::new("name", ColumnType::Text),
                ],
            )
            .primary_key(&["id"]),
        )])
        .unwrap()
    }

    #[test]
    fn compiles_each_shape_once() {
        let score = score();
        let element = score.element("hr", "staff").unwrap();
        let terms = TermBuilder::new(&SqliteDialect, element);
        let cache = PreparedStatementCache::new();

        let filter = Filter::new().eq("name", "Ada");
        let shape = terms.shape(strata_core::StatementKind::Select, &filter, &[]).unwrap();
        let first = cache.statement(&shape, || terms.select(&filter, &[])).unwrap();

        let other_value = Filter::new().eq("name", "Grace");
        let shape = terms.shape(strata_core::StatementKind::Select, &other_value, &[]).unwrap();
        let second = cache.statement(&shape, || terms.select(&other_value, &[])).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.compilations(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_compilation_is_not_cached() {
        let score = score();
        let element = score.element("hr", "staff").unwrap();
        let terms = TermBuilder::new(&SqliteDialect, element);
        let cache = PreparedStatementCache::new();

        let filter = Filter::new().eq("missing", 1);
        let shape = terms.shape(strata_core::StatementKind::Select, &Filter::new(), &[]).unwrap();
        assert!(cache.statement(&shape, || terms.select(&filter, &[])).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.compilations(), 0);
    }

    #[tokio::test]
    async fn registry_forgets_dropped_connections() {
        let registry = ConnectionRegistry::new();
        let first = LiveConnection::connect("sqlite::memory:").await.unwrap();
        let second = LiveConnection::connect("sqlite::memory:").await.unwrap();

        let cache = registry.cache(&first);
        assert!(Arc::ptr_eq(&cache, &registry.cache(&first)));
        let _ = registry.cache(&second);
        assert_eq!(registry.len(), 2);

        drop(first);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());
    }
}
