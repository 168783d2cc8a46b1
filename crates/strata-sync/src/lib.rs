//! Live schema synchronization and data access for strata scores.
//!
//! `strata-sync` takes a finalized [`strata_core::Score`] and a SQLite
//! connection and:
//! - brings the live schema in line with the score, one transaction per
//!   grain, reporting every step ([`sync`])
//! - renders full create scripts for any supported dialect ([`script`])
//! - serves reads and writes through call contexts and data accessors,
//!   with revision checks on versioned tables ([`session`], [`accessor`])
//!
//! # Architecture
//!
//! - **Catalog** - reads tables, keys, indexes, triggers and views of a grain
//! - **Synchronizer** - diffs the catalog against the score and executes
//!   the plans of the SQLite generator, re-reading the catalog as it goes
//! - **Statement cache** - one per connection, keyed by statement shape and
//!   dropped with its connection
//! - **Call context** - one transaction, a bounded set of accessors
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use strata_core::{Column, ColumnType, Filter, Grain, Score, SqlValue, Table};
//! use strata_sync::prelude::*;
//!
//! # async fn run() -> strata_sync::error::Result<()> {
//! let score = Arc::new(Score::new(vec![Grain::new("crm", "1").table(
//!     Table::new(
//!         "contact",
//!         vec![
//!             Column::new("id", ColumnType::Integer).not_null(),
//!             Column::new("email", ColumnType::Varchar(120)),
//!         ],
//!     )
//!     .primary_key(&["id"]),
//! )])?);
//!
//! let connection = LiveConnection::connect("sqlite:crm.db").await?;
//! let report = Synchronizer::new(&score).run(&mut *connection.lock().await).await?;
//! println!("{} statements applied", report.applied);
//!
//! let mut ctx = CallContext::begin(connection, Arc::clone(&score)).await?;
//! let contacts = ctx.accessor("crm", "contact")?;
//! contacts
//!     .insert(&[SqlValue::Int(1), SqlValue::Text("ada@example.com".into())])
//!     .await?;
//! let found = contacts.select(&Filter::new().like("email", "%@example.com"), &[]).await?;
//! assert_eq!(found.len(), 1);
//! ctx.commit().await?;
//! ctx.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod report;
pub mod script;
pub mod session;
pub mod sync;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::accessor::{Record, TableAccessor};
    pub use crate::cache::{ConnectionRegistry, LiveConnection, PreparedStatementCache};
    pub use crate::catalog::Catalog;
    pub use crate::error::{Result, SyncError};
    pub use crate::report::{OperationKind, Outcome, ReportEntry, ReportSink, SyncReport};
    pub use crate::script::create_script;
    pub use crate::session::{CallContext, MAX_DATA_ACCESSORS};
    pub use crate::sync::{synchronize, SyncOptions, Synchronizer};
}
