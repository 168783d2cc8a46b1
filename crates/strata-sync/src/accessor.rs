//! Data accessors.
//!
//! A [`TableAccessor`] reads and writes one table or view of the score
//! inside the transaction of its call context. Statements come from the
//! connection's [`PreparedStatementCache`]; only the bound values change
//! between calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};
use strata_core::{
    ArgumentContractError, ColumnType, CompiledStatement, Filter, Score, SqlValue, SqliteDialect,
    StatementKind, TableElement, TermBuilder, ToSqlValue, REVISION_COLUMN, VERSION_CHECK_FAILURE,
};
use tracing::debug;

use crate::cache::{LiveConnection, PreparedStatementCache};
use crate::error::{Result, SyncError};
use crate::session::OpenAccessors;

/// One row read through an accessor.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Record {
    /// Column names in select-list order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in select-list order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Value of a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Replaces the value of a column. Returns false when there is no such
    /// column.
    pub fn set(&mut self, column: &str, value: impl ToSqlValue) -> bool {
        match self.columns.iter().position(|c| c == column) {
            Some(i) => {
                self.values[i] = value.to_sql_value();
                true
            }
            None => false,
        }
    }

    /// Revision the row had when it was read.
    #[must_use]
    pub fn revision(&self) -> Option<i64> {
        self.get(REVISION_COLUMN).and_then(SqlValue::as_i64)
    }
}

/// Reads and writes one element of the score.
pub struct TableAccessor {
    id: u64,
    grain: String,
    name: String,
    score: Arc<Score>,
    connection: Arc<LiveConnection>,
    statements: Arc<PreparedStatementCache>,
    open: Arc<AtomicBool>,
    owner: Arc<OpenAccessors>,
}

impl TableAccessor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        grain: &str,
        name: &str,
        score: Arc<Score>,
        connection: Arc<LiveConnection>,
        statements: Arc<PreparedStatementCache>,
        open: Arc<AtomicBool>,
        owner: Arc<OpenAccessors>,
    ) -> Self {
        Self {
            id,
            grain: grain.to_string(),
            name: name.to_string(),
            score,
            connection,
            statements,
            open,
            owner,
        }
    }

    /// Grain of the element.
    #[must_use]
    pub fn grain(&self) -> &str {
        &self.grain
    }

    /// Name of the element.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true until the accessor or its call context is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Closes the accessor and frees its slot in the call context.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.owner.release(self.id);
        }
    }

    fn qualified_name(&self) -> String {
        format!("{}.{}", self.grain, self.name)
    }

    fn element(&self) -> Result<TableElement<'_>> {
        if !self.is_open() {
            return Err(SyncError::Closed);
        }
        self.score
            .element(&self.grain, &self.name)
            .ok_or_else(|| SyncError::UnknownElement {
                grain: self.grain.clone(),
                name: self.name.clone(),
            })
    }

    fn compiled<F>(
        &self,
        kind: StatementKind,
        filter: &Filter,
        sort: &[String],
        compile: F,
    ) -> Result<(TableElement<'_>, Arc<CompiledStatement>)>
    where
        F: FnOnce(&TermBuilder<'_>) -> strata_core::term::Result<CompiledStatement>,
    {
        let element = self.element()?;
        let terms = TermBuilder::new(&SqliteDialect, element);
        let shape = terms.shape(kind, filter, sort)?;
        let statement = self.statements.statement(&shape, || compile(&terms))?;
        Ok((element, statement))
    }

    /// Reads the row with the given primary key values, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ArgumentContract`] when the number of values
    /// differs from the key size.
    pub async fn get(&self, key: &[SqlValue]) -> Result<Option<Record>> {
        self.get_with_params(&[], key).await
    }

    /// Like [`Self::get`] for parameterized views: `params` come first.
    ///
    /// # Errors
    ///
    /// See [`Self::get`].
    pub async fn get_with_params(&self, params: &[SqlValue], key: &[SqlValue]) -> Result<Option<Record>> {
        let (element, statement) =
            self.compiled(StatementKind::Get, &Filter::new(), &[], |terms| terms.get())?;
        let mut args = params.to_vec();
        args.extend_from_slice(key);
        let values = statement.setter.bind(&args, None)?;

        let mut conn = self.connection.lock().await;
        let row = bind_all(sqlx::query(&statement.sql), values)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|row| decode_row(&element, &statement.columns, &row))
            .transpose()
    }

    /// Reads the rows matching `filter`, ordered by `sort` then the
    /// primary key.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ArgumentContract`] when the filter or sort names
    /// an unknown column.
    pub async fn select(&self, filter: &Filter, sort: &[String]) -> Result<Vec<Record>> {
        self.select_with_params(&[], filter, sort).await
    }

    /// Like [`Self::select`] for parameterized views: `params` come first.
    ///
    /// # Errors
    ///
    /// See [`Self::select`].
    pub async fn select_with_params(
        &self,
        params: &[SqlValue],
        filter: &Filter,
        sort: &[String],
    ) -> Result<Vec<Record>> {
        let (element, statement) =
            self.compiled(StatementKind::Select, filter, sort, |terms| terms.select(filter, sort))?;
        let mut args = params.to_vec();
        args.extend(filter.values());
        let values = statement.setter.bind(&args, None)?;

        let mut conn = self.connection.lock().await;
        let rows = bind_all(sqlx::query(&statement.sql), values)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| decode_row(&element, &statement.columns, row))
            .collect()
    }

    /// Inserts a row. `values` are the declared columns in declared order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ArgumentContract`] for read-only elements or a
    /// wrong number of values.
    pub async fn insert(&self, values: &[SqlValue]) -> Result<()> {
        let (_, statement) =
            self.compiled(StatementKind::Insert, &Filter::new(), &[], |terms| terms.insert())?;
        let values = statement.setter.bind(values, None)?;

        let mut conn = self.connection.lock().await;
        bind_all(sqlx::query(&statement.sql), values)
            .execute(&mut *conn)
            .await?;
        debug!(element = %self.qualified_name(), "Inserted row");
        Ok(())
    }

    /// Writes a record back by primary key. On a versioned table the
    /// record's revision must still be current; on success it is advanced
    /// to the new one. Returns false when no row has the key.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConcurrencyViolation`] when the row was changed
    /// since the record was read, and an argument contract error when the
    /// record lacks a column of the element.
    pub async fn update(&self, record: &mut Record) -> Result<bool> {
        let (element, statement) =
            self.compiled(StatementKind::Update, &Filter::new(), &[], |terms| terms.update())?;
        let args = element
            .columns()
            .iter()
            .map(|c| {
                record
                    .get(&c.name)
                    .cloned()
                    .ok_or_else(|| ArgumentContractError::UnknownColumn {
                        element: self.qualified_name(),
                        column: c.name.clone(),
                    })
            })
            .collect::<std::result::Result<Vec<SqlValue>, _>>()?;
        let revision = record.revision();
        let values = statement.setter.bind(&args, revision)?;

        let mut conn = self.connection.lock().await;
        let result = bind_all(sqlx::query(&statement.sql), values)
            .execute(&mut *conn)
            .await
            .map_err(|err| self.version_check(err))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        if element.is_versioned() {
            if let Some(revision) = revision {
                record.set(REVISION_COLUMN, revision + 1);
            }
        }
        Ok(true)
    }

    fn version_check(&self, err: sqlx::Error) -> SyncError {
        if let sqlx::Error::Database(db) = &err {
            if db.message().contains(VERSION_CHECK_FAILURE) {
                debug!(element = %self.qualified_name(), "Revision check failed");
                return SyncError::ConcurrencyViolation {
                    element: self.qualified_name(),
                };
            }
        }
        SyncError::Database(err)
    }
}

/// Binds slot values in order.
fn bind_all<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Vec<SqlValue>,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    values.into_iter().fold(query, |query, value| match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    })
}

fn decode_row(element: &TableElement<'_>, columns: &[String], row: &SqliteRow) -> Result<Record> {
    let mut values = Vec::with_capacity(columns.len());
    for (index, name) in columns.iter().enumerate() {
        let column_type = element
            .column(name)
            .map_or(ColumnType::Text, |c| c.column_type);
        values.push(decode_value(row, index, column_type)?);
    }
    Ok(Record {
        columns: columns.to_vec(),
        values,
    })
}

/// SQLite stores by affinity, so values are read as the declared type.
fn decode_value(row: &SqliteRow, index: usize, column_type: ColumnType) -> Result<SqlValue> {
    let value = match column_type {
        ColumnType::Integer => row
            .try_get_unchecked::<Option<i64>, _>(index)?
            .map(SqlValue::Int),
        ColumnType::Real | ColumnType::Decimal(..) => row
            .try_get_unchecked::<Option<f64>, _>(index)?
            .map(SqlValue::Float),
        ColumnType::Boolean => row
            .try_get_unchecked::<Option<bool>, _>(index)?
            .map(SqlValue::Bool),
        ColumnType::Binary => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(index)?
            .map(SqlValue::Blob),
        ColumnType::Varchar(_) | ColumnType::Text | ColumnType::DateTime => row
            .try_get_unchecked::<Option<String>, _>(index)?
            .map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
