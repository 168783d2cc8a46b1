//! PostgreSQL dialect.
//!
//! Each grain is a schema. Columns and constraints are altered in place,
//! revision checks and materialized views are kept by plpgsql trigger
//! functions, and parameterized views become set-returning SQL functions.

use sha2::{Digest, Sha256};

use super::{
    column_list, select_sql, Capabilities, DdlGenerator, DdlPlan, Dialect, MaterializedParts,
    VERSION_CHECK_FAILURE,
};
use crate::live::{DbForeignKeyInfo, DbIndexInfo, DbTableInfo};
use crate::score::{Column, ColumnType, ForeignKey, Grain, Index, Table, View, REVISION_COLUMN};
use crate::value::SqlValue;

/// Prefix of the comment identifying the definition of a managed view.
const FINGERPRINT_PREFIX: &str = "strata:";

/// PostgreSQL dialect and DDL generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn foreign_key_name(table: &Table, columns: &[String]) -> String {
        format!("fk_{}_{}", table.name, columns.join("_"))
    }

    fn function_name(&self, grain: &str, name: &str) -> String {
        format!("{}.{}", self.quote(grain), self.quote(name))
    }

    fn param_types(&self, view: &View) -> String {
        view.params
            .iter()
            .map(|p| self.type_name(p.param_type))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn materialized_trigger_names(view: &View) -> [String; 3] {
        [
            format!("{}_ins", view.name),
            format!("{}_upd", view.name),
            format!("{}_del", view.name),
        ]
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_triggers: true,
            sequences: true,
            parameterized_views: true,
            materialized_views: true,
            schemas: true,
            transactional_ddl: true,
            alter_column: true,
            alter_constraints: true,
        }
    }

    fn type_name(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Integer => String::from("BIGINT"),
            ColumnType::Real => String::from("DOUBLE PRECISION"),
            ColumnType::Varchar(len) => format!("VARCHAR({len})"),
            ColumnType::Text => String::from("TEXT"),
            ColumnType::Decimal(p, s) => format!("NUMERIC({p}, {s})"),
            ColumnType::Boolean => String::from("BOOLEAN"),
            ColumnType::DateTime => String::from("TIMESTAMP"),
            ColumnType::Binary => String::from("BYTEA"),
        }
    }

    fn physical_name(&self, grain: &str, name: &str) -> String {
        format!("{grain}.{name}")
    }

    fn table_name(&self, grain: &str, name: &str) -> String {
        format!("{}.{}", self.quote(grain), self.quote(name))
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Blob(bytes) => format!("'\\x{}'::bytea", hex::encode(bytes)),
            other => other.to_sql_inline(),
        }
    }
}

impl DdlGenerator for PostgresDialect {
    fn dialect(&self) -> &dyn Dialect {
        self
    }

    fn create_schema(&self, grain: &Grain) -> DdlPlan {
        DdlPlan::of(vec![format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            self.quote(&grain.name)
        )])
    }

    fn create_table(&self, table: &Table) -> DdlPlan {
        let mut defs: Vec<String> = table
            .physical_columns()
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        if !table.primary_key.is_empty() {
            defs.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.quote(&format!("pk_{}", table.name)),
                column_list(self, &table.primary_key)
            ));
        }
        DdlPlan::of(vec![format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.table_name(table.grain(), &table.name),
            defs.join(",\n  ")
        )])
    }

    fn drop_table(&self, grain: &str, name: &str) -> DdlPlan {
        DdlPlan::of(vec![format!("DROP TABLE {}", self.table_name(grain, name))])
    }

    fn add_column(&self, table: &Table, column: &Column, live: &DbTableInfo) -> DdlPlan {
        if live.has_column(&column.name) {
            return DdlPlan::NoOp;
        }
        DdlPlan::of(vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_name(table.grain(), &table.name),
            self.column_definition(column)
        )])
    }

    fn update_column(&self, table: &Table, column: &Column, live: &DbTableInfo) -> DdlPlan {
        let Some(current) = live.column(&column.name) else {
            return self.add_column(table, column, live);
        };
        if self.column_matches(column, current) {
            return DdlPlan::NoOp;
        }
        let target = self.table_name(table.grain(), &table.name);
        let name = self.quote(&column.name);
        let declared_type = self.type_name(column.column_type);
        let declared_default = column.default.as_ref().map(|d| self.render_default(d));
        let mut statements = Vec::new();

        if !declared_type.eq_ignore_ascii_case(current.type_name.trim()) {
            statements.push(format!(
                "ALTER TABLE {target} ALTER COLUMN {name} TYPE {declared_type} USING {name}::{declared_type}"
            ));
        }
        if declared_default.as_deref() != current.default.as_deref().map(str::trim) {
            statements.push(match &declared_default {
                Some(default) => {
                    format!("ALTER TABLE {target} ALTER COLUMN {name} SET DEFAULT {default}")
                }
                None => format!("ALTER TABLE {target} ALTER COLUMN {name} DROP DEFAULT"),
            });
        }
        if column.nullable != current.nullable {
            if column.nullable {
                statements.push(format!(
                    "ALTER TABLE {target} ALTER COLUMN {name} DROP NOT NULL"
                ));
            } else {
                if let Some(default) = &declared_default {
                    statements.push(format!(
                        "UPDATE {target} SET {name} = {default} WHERE {name} IS NULL"
                    ));
                }
                statements.push(format!(
                    "ALTER TABLE {target} ALTER COLUMN {name} SET NOT NULL"
                ));
            }
        }
        DdlPlan::of(statements)
    }

    fn drop_column(&self, table: &Table, column: &str, live: &DbTableInfo) -> DdlPlan {
        if !live.has_column(column) {
            return DdlPlan::NoOp;
        }
        DdlPlan::of(vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table_name(table.grain(), &table.name),
            self.quote(column)
        )])
    }

    fn update_primary_key(&self, table: &Table, live: &DbTableInfo) -> DdlPlan {
        if live.primary_key.columns == table.primary_key {
            return DdlPlan::NoOp;
        }
        let target = self.table_name(table.grain(), &table.name);
        let mut statements = Vec::new();
        if !live.primary_key.is_empty() {
            let current = live
                .primary_key
                .name
                .clone()
                .unwrap_or_else(|| format!("pk_{}", table.name));
            statements.push(format!(
                "ALTER TABLE {target} DROP CONSTRAINT {}",
                self.quote(&current)
            ));
        }
        if !table.primary_key.is_empty() {
            statements.push(format!(
                "ALTER TABLE {target} ADD CONSTRAINT {} PRIMARY KEY ({})",
                self.quote(&format!("pk_{}", table.name)),
                column_list(self, &table.primary_key)
            ));
        }
        DdlPlan::of(statements)
    }

    fn create_foreign_key(&self, table: &Table, fk: &ForeignKey, live: &DbTableInfo) -> DdlPlan {
        if live
            .foreign_keys
            .iter()
            .any(|current| self.foreign_key_matches(fk, current))
        {
            return DdlPlan::NoOp;
        }
        DdlPlan::of(vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            self.table_name(table.grain(), &table.name),
            self.quote(&Self::foreign_key_name(table, &fk.columns)),
            column_list(self, &fk.columns),
            self.table_name(fk.target_grain(), &fk.table),
            column_list(self, &fk.ref_columns),
            fk.on_update.to_sql(),
            fk.on_delete.to_sql()
        )])
    }

    fn drop_foreign_key(&self, table: &Table, fk: &DbForeignKeyInfo, _live: &DbTableInfo) -> DdlPlan {
        let name = fk
            .name
            .clone()
            .unwrap_or_else(|| Self::foreign_key_name(table, &fk.columns));
        DdlPlan::of(vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.table_name(table.grain(), &table.name),
            self.quote(&name)
        )])
    }

    fn create_index(&self, table: &Table, index: &Index) -> DdlPlan {
        DdlPlan::of(vec![format!(
            "CREATE INDEX {} ON {} ({})",
            self.quote(&self.index_name(table.grain(), &index.name)),
            self.table_name(table.grain(), &table.name),
            column_list(self, &index.columns)
        )])
    }

    fn drop_index(&self, grain: &str, index: &DbIndexInfo) -> DdlPlan {
        DdlPlan::of(vec![format!(
            "DROP INDEX {}.{}",
            self.quote(grain),
            self.quote(&index.name)
        )])
    }

    fn versioning_trigger_name(&self, table: &Table) -> String {
        format!("{}_versioncheck", table.name)
    }

    fn update_versioning_trigger(&self, table: &Table, trigger_exists: bool) -> DdlPlan {
        let trigger = self.versioning_trigger_name(table);
        let function = self.function_name(table.grain(), &trigger);
        let target = self.table_name(table.grain(), &table.name);
        let rev = self.quote(REVISION_COLUMN);
        match (table.is_versioned(), trigger_exists) {
            (true, false) => DdlPlan::of(vec![
                format!(
                    "CREATE OR REPLACE FUNCTION {function}() RETURNS trigger AS $$\n\
                     BEGIN\n  \
                     IF NEW.{rev} <> OLD.{rev} THEN\n    \
                     RAISE EXCEPTION '{VERSION_CHECK_FAILURE}';\n  \
                     END IF;\n  \
                     NEW.{rev} := OLD.{rev} + 1;\n  \
                     RETURN NEW;\n\
                     END;\n\
                     $$ LANGUAGE plpgsql"
                ),
                format!(
                    "CREATE TRIGGER {} BEFORE UPDATE ON {target} FOR EACH ROW EXECUTE FUNCTION {function}()",
                    self.quote(&trigger)
                ),
            ]),
            (false, true) => DdlPlan::of(vec![
                format!("DROP TRIGGER IF EXISTS {} ON {target}", self.quote(&trigger)),
                format!("DROP FUNCTION IF EXISTS {function}()"),
            ]),
            _ => DdlPlan::NoOp,
        }
    }

    fn create_view(&self, view: &View) -> DdlPlan {
        let name = self.table_name(view.grain(), &view.name);
        DdlPlan::of(vec![
            format!("CREATE VIEW {name} AS\n{}", select_sql(self, view)),
            format!(
                "COMMENT ON VIEW {name} IS '{}'",
                self.view_fingerprint(view)
            ),
        ])
    }

    fn drop_view(&self, grain: &str, name: &str) -> DdlPlan {
        DdlPlan::of(vec![format!(
            "DROP VIEW IF EXISTS {}",
            self.table_name(grain, name)
        )])
    }

    fn view_fingerprint(&self, view: &View) -> String {
        let digest = Sha256::digest(select_sql(self, view).as_bytes());
        format!("{FINGERPRINT_PREFIX}{}", hex::encode(digest))
    }

    fn create_parameterized_view(&self, view: &View) -> DdlPlan {
        let returns = view
            .output_columns()
            .iter()
            .map(|c| format!("{} {}", self.quote(&c.name), self.type_name(c.column_type)))
            .collect::<Vec<_>>()
            .join(", ");
        DdlPlan::of(vec![format!(
            "CREATE OR REPLACE FUNCTION {}({}) RETURNS TABLE ({returns}) AS $$\n{}\n$$ LANGUAGE sql STABLE",
            self.function_name(view.grain(), &view.name),
            self.param_types(view),
            select_sql(self, view)
        )])
    }

    fn drop_parameterized_view(&self, view: &View) -> DdlPlan {
        DdlPlan::of(vec![format!(
            "DROP FUNCTION IF EXISTS {}({})",
            self.function_name(view.grain(), &view.name),
            self.param_types(view)
        )])
    }

    fn create_materialized_view(&self, view: &View, _source: &Table) -> DdlPlan {
        let defs: Vec<String> = self
            .materialized_view_columns(view)
            .iter()
            .map(|c| self.column_definition(c))
            .chain(std::iter::once(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.quote(&format!("pk_{}", view.name)),
                column_list(self, &view.group_by)
            )))
            .collect();
        DdlPlan::of(vec![
            format!(
                "CREATE TABLE {} (\n  {}\n)",
                self.table_name(view.grain(), &view.name),
                defs.join(",\n  ")
            ),
            MaterializedParts::new(self, view).refill(None),
        ])
    }

    fn drop_materialized_view(&self, grain: &str, name: &str) -> DdlPlan {
        self.drop_table(grain, name)
    }

    fn materialized_view_triggers(&self, view: &View, _source: &Table) -> Vec<(String, String)> {
        let parts = MaterializedParts::new(self, view);
        let null_safe = "IS NOT DISTINCT FROM";
        let refresh = |row: &str| {
            format!(
                "  DELETE FROM {} WHERE {};\n  {};\n",
                parts.target,
                parts.target_match(row, null_safe),
                parts.refill(Some(&parts.source_match(row, null_safe)))
            )
        };
        let function = |name: &str, body: String| {
            format!(
                "CREATE OR REPLACE FUNCTION {}() RETURNS trigger AS $$\nBEGIN\n{body}  RETURN NULL;\nEND;\n$$ LANGUAGE plpgsql",
                self.function_name(view.grain(), name)
            )
        };
        let [ins, upd, del] = Self::materialized_trigger_names(view);
        vec![
            (ins.clone(), function(&ins, refresh("NEW"))),
            (
                upd.clone(),
                function(&upd, format!("{}{}", refresh("OLD"), refresh("NEW"))),
            ),
            (del.clone(), function(&del, refresh("OLD"))),
        ]
    }

    fn create_materialized_view_triggers(&self, view: &View, source: &Table) -> DdlPlan {
        let events = ["INSERT", "UPDATE", "DELETE"];
        let mut statements = Vec::new();
        for ((name, function_sql), event) in self
            .materialized_view_triggers(view, source)
            .into_iter()
            .zip(events)
        {
            statements.push(function_sql);
            statements.push(format!(
                "CREATE TRIGGER {} AFTER {event} ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
                self.quote(&name),
                self.table_name(source.grain(), &source.name),
                self.function_name(view.grain(), &name)
            ));
        }
        DdlPlan::of(statements)
    }

    fn drop_materialized_view_triggers(&self, view: &View, source: &Table) -> DdlPlan {
        let source_name = self.table_name(source.grain(), &source.name);
        let mut statements = Vec::new();
        for name in Self::materialized_trigger_names(view) {
            statements.push(format!(
                "DROP TRIGGER IF EXISTS {} ON {source_name}",
                self.quote(&name)
            ));
            statements.push(format!(
                "DROP FUNCTION IF EXISTS {}()",
                self.function_name(view.grain(), &name)
            ));
        }
        DdlPlan::of(statements)
    }
}
