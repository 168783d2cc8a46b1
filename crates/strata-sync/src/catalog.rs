//! Live catalog introspection for SQLite.
//!
//! Everything here reads `sqlite_master` and the table-valued pragmas and
//! returns the snapshots of [`strata_core::live`]. An object belongs to a
//! grain when its name is the grain prefix followed by a valid element name,
//! so `shop__orders` belongs to `shop` but `shop___x` and the rebuild copy
//! `shop__orders__old` do not.

use sqlx::SqliteConnection;
use strata_core::{
    DbColumnInfo, DbForeignKeyInfo, DbIndexInfo, DbPkInfo, DbTableInfo, DbViewInfo, Dialect,
    FkRule,
};

use crate::error::Result;

/// Logical element name of `physical` when it belongs to the grain whose
/// prefix is `prefix`.
fn owned_name<'n>(prefix: &str, physical: &'n str) -> Option<&'n str> {
    let rest = physical.strip_prefix(prefix)?;
    let valid = !rest.is_empty()
        && !rest.contains("__")
        && !rest.starts_with('_')
        && !rest.ends_with('_');
    valid.then_some(rest)
}

/// Reads the live schema of grains.
pub struct Catalog<'a> {
    dialect: &'a dyn Dialect,
}

impl<'a> Catalog<'a> {
    /// Creates a catalog reader naming objects the way `dialect` does.
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self { dialect }
    }

    fn prefix(&self, grain: &str) -> String {
        self.dialect.physical_name(grain, "")
    }

    async fn names_of_type(
        &self,
        conn: &mut SqliteConnection,
        kind: &str,
        grain: &str,
    ) -> Result<Vec<(String, Option<String>)>> {
        let prefix = self.prefix(grain);
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = ? AND substr(name, 1, length(?2)) = ?2 ORDER BY name",
        )
        .bind(kind)
        .bind(&prefix)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(name, sql)| owned_name(&prefix, &name).map(|n| (n.to_string(), sql)))
            .collect())
    }

    /// Logical names of the live tables of a grain.
    pub async fn tables(&self, conn: &mut SqliteConnection, grain: &str) -> Result<Vec<String>> {
        Ok(self
            .names_of_type(conn, "table", grain)
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Columns, primary key and foreign keys of a live table, or `None`
    /// when it does not exist.
    pub async fn table(
        &self,
        conn: &mut SqliteConnection,
        grain: &str,
        name: &str,
    ) -> Result<Option<DbTableInfo>> {
        let physical = self.dialect.physical_name(grain, name);
        let rows: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(&physical)
        .fetch_all(&mut *conn)
        .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut key: Vec<(i64, String)> = Vec::new();
        let mut columns = Vec::with_capacity(rows.len());
        for (column, type_name, not_null, default, pk) in rows {
            if pk > 0 {
                key.push((pk, column.clone()));
            }
            columns.push(DbColumnInfo {
                name: column,
                type_name,
                nullable: not_null == 0,
                default,
            });
        }
        key.sort();

        Ok(Some(DbTableInfo {
            name: name.to_string(),
            columns,
            primary_key: DbPkInfo {
                name: None,
                columns: key.into_iter().map(|(_, c)| c).collect(),
            },
            foreign_keys: self.foreign_keys(conn, &physical).await?,
        }))
    }

    async fn foreign_keys(
        &self,
        conn: &mut SqliteConnection,
        physical: &str,
    ) -> Result<Vec<DbForeignKeyInfo>> {
        let rows: Vec<(i64, String, String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete \
             FROM pragma_foreign_key_list(?) ORDER BY id, seq",
        )
        .bind(physical)
        .fetch_all(&mut *conn)
        .await?;

        let mut keys: Vec<(i64, DbForeignKeyInfo)> = Vec::new();
        for (id, ref_table, from, to, on_update, on_delete) in rows {
            if keys.last().map_or(true, |(last, _)| *last != id) {
                keys.push((
                    id,
                    DbForeignKeyInfo {
                        name: None,
                        columns: Vec::new(),
                        ref_table,
                        ref_columns: Vec::new(),
                        on_update: FkRule::from_sql(&on_update).unwrap_or_default(),
                        on_delete: FkRule::from_sql(&on_delete).unwrap_or_default(),
                    },
                ));
            }
            if let Some((_, fk)) = keys.last_mut() {
                fk.columns.push(from);
                fk.ref_columns.extend(to);
            }
        }
        Ok(keys.into_iter().map(|(_, fk)| fk).collect())
    }

    /// Explicitly created indexes on the live tables of a grain.
    pub async fn indexes(&self, conn: &mut SqliteConnection, grain: &str) -> Result<Vec<DbIndexInfo>> {
        let mut indexes = Vec::new();
        for table in self.tables(conn, grain).await? {
            let physical = self.dialect.physical_name(grain, &table);
            let names: Vec<(String,)> =
                sqlx::query_as("SELECT name FROM pragma_index_list(?) WHERE origin = 'c' ORDER BY name")
                    .bind(&physical)
                    .fetch_all(&mut *conn)
                    .await?;
            for (name,) in names {
                let columns: Vec<(Option<String>,)> =
                    sqlx::query_as("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                        .bind(&name)
                        .fetch_all(&mut *conn)
                        .await?;
                indexes.push(DbIndexInfo {
                    name,
                    table: table.clone(),
                    columns: columns.into_iter().filter_map(|(c,)| c).collect(),
                });
            }
        }
        Ok(indexes)
    }

    /// Stored definition of a trigger, or `None` when it does not exist.
    pub async fn trigger_sql(&self, conn: &mut SqliteConnection, name: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'trigger' AND name = ?")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(row.map(|(sql,)| sql.unwrap_or_default()))
    }

    /// Returns true when a trigger exists.
    pub async fn trigger_exists(&self, conn: &mut SqliteConnection, name: &str) -> Result<bool> {
        Ok(self.trigger_sql(conn, name).await?.is_some())
    }

    /// Live views of a grain with their stored definitions.
    pub async fn views(&self, conn: &mut SqliteConnection, grain: &str) -> Result<Vec<DbViewInfo>> {
        Ok(self
            .names_of_type(conn, "view", grain)
            .await?
            .into_iter()
            .map(|(name, definition)| DbViewInfo { name, definition })
            .collect())
    }

    /// Tables holding rows that violate a foreign key.
    pub async fn foreign_key_violations(&self, conn: &mut SqliteConnection) -> Result<Vec<String>> {
        let rows: Vec<(String, Option<i64>, String, i64)> = sqlx::query_as("PRAGMA foreign_key_check")
            .fetch_all(&mut *conn)
            .await?;
        let mut tables: Vec<String> = rows.into_iter().map(|(table, ..)| table).collect();
        tables.dedup();
        Ok(tables)
    }
}
