//! Call contexts.
//!
//! A [`CallContext`] is one unit of work: one connection, one open
//! transaction and the data accessors opened on it. It is meant to be used
//! by a single task. Dropping a context without [`CallContext::close`]
//! closes its accessors and leaves the rollback to the next user of the
//! connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use sqlx::Executor;
use strata_core::Score;
use tracing::debug;

use crate::accessor::TableAccessor;
use crate::cache::{LiveConnection, PreparedStatementCache};
use crate::error::{Result, SyncError};

/// Most data accessors a call context keeps open at once.
pub const MAX_DATA_ACCESSORS: usize = 1023;

/// Open/closed flags of the accessors of one call context, oldest first.
#[derive(Debug, Default)]
pub(crate) struct OpenAccessors {
    slots: Mutex<Vec<(u64, Arc<AtomicBool>)>>,
}

impl OpenAccessors {
    fn open(&self, id: u64) -> Result<Arc<AtomicBool>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() >= MAX_DATA_ACCESSORS {
            return Err(SyncError::ResourceLeak {
                limit: MAX_DATA_ACCESSORS,
            });
        }
        let flag = Arc::new(AtomicBool::new(true));
        slots.push((id, Arc::clone(&flag)));
        Ok(flag)
    }

    pub(crate) fn release(&self, id: u64) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(slot, _)| *slot != id);
    }

    fn close_all(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some((_, flag)) = slots.pop() {
            flag.store(false, Ordering::Release);
        }
    }

    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// One unit of work on one connection.
pub struct CallContext {
    connection: Option<Arc<LiveConnection>>,
    score: Arc<Score>,
    statements: Arc<PreparedStatementCache>,
    accessors: Arc<OpenAccessors>,
    next_accessor: u64,
}

impl CallContext {
    /// Opens a call context and starts its transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub async fn begin(connection: Arc<LiveConnection>, score: Arc<Score>) -> Result<Self> {
        connection.lock().await.execute("BEGIN").await?;
        let statements = connection.statements();
        debug!("Call context opened");
        Ok(Self {
            connection: Some(connection),
            score,
            statements,
            accessors: Arc::new(OpenAccessors::default()),
            next_accessor: 0,
        })
    }

    fn connection(&self) -> Result<&Arc<LiveConnection>> {
        self.connection.as_ref().ok_or(SyncError::Closed)
    }

    /// The score accessors resolve elements against.
    #[must_use]
    pub fn score(&self) -> &Score {
        &self.score
    }

    /// Statement cache of the underlying connection.
    #[must_use]
    pub fn statements(&self) -> &Arc<PreparedStatementCache> {
        &self.statements
    }

    /// Returns true once [`Self::close`] has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    /// Number of accessors currently open.
    #[must_use]
    pub fn open_accessors(&self) -> usize {
        self.accessors.len()
    }

    /// Opens an accessor on a table or view.
    ///
    /// Accessors count against [`MAX_DATA_ACCESSORS`] until closed;
    /// dropping one without closing it keeps its slot.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] on a closed context,
    /// [`SyncError::UnknownElement`] when the score has no such element and
    /// [`SyncError::ResourceLeak`] when the limit is reached.
    pub fn accessor(&mut self, grain: &str, name: &str) -> Result<TableAccessor> {
        let connection = Arc::clone(self.connection()?);
        if self.score.element(grain, name).is_none() {
            return Err(SyncError::UnknownElement {
                grain: grain.to_string(),
                name: name.to_string(),
            });
        }
        let id = self.next_accessor;
        let open = self.accessors.open(id)?;
        self.next_accessor += 1;
        Ok(TableAccessor::new(
            id,
            grain,
            name,
            Arc::clone(&self.score),
            connection,
            Arc::clone(&self.statements),
            open,
            Arc::clone(&self.accessors),
        ))
    }

    /// Commits the work done so far and starts a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] on a closed context, or the database
    /// error.
    pub async fn commit(&mut self) -> Result<()> {
        let mut conn = self.connection()?.lock().await;
        conn.execute("COMMIT").await?;
        conn.execute("BEGIN").await?;
        debug!("Call context committed");
        Ok(())
    }

    /// Discards the work done so far and starts a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] on a closed context, or the database
    /// error.
    pub async fn rollback(&mut self) -> Result<()> {
        let mut conn = self.connection()?.lock().await;
        conn.execute("ROLLBACK").await?;
        conn.execute("BEGIN").await?;
        debug!("Call context rolled back");
        Ok(())
    }

    /// Closes every open accessor, most recent first, rolls back
    /// uncommitted work and releases the connection. Closing twice does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns the database error of the final rollback.
    pub async fn close(&mut self) -> Result<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        self.accessors.close_all();
        connection.lock().await.execute("ROLLBACK").await?;
        debug!("Call context closed");
        Ok(())
    }
}

impl Drop for CallContext {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.accessors.close_all();
            connection.abandon();
            debug!("Call context dropped while open");
        }
    }
}
