//! Firebird dialect.
//!
//! Firebird has no schemas; grain objects are named `grain_name`. Column
//! retyping, primary key changes, indexes and the view kinds beyond plain
//! views are reported as unsupported.

use super::{
    column_list, select_sql, Capabilities, DdlGenerator, DdlPlan, Dialect, VERSION_CHECK_FAILURE,
};
use crate::live::{DbForeignKeyInfo, DbIndexInfo, DbTableInfo};
use crate::score::{Column, ColumnType, ForeignKey, Grain, Index, Table, View, REVISION_COLUMN};

/// Exception raised by revision-check triggers.
const VERSION_EXCEPTION: &str = "STRATA_VERSION_CHECK";

/// Firebird dialect and DDL generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirebirdDialect;

impl FirebirdDialect {
    /// Creates a new Firebird dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for FirebirdDialect {
    fn name(&self) -> &'static str {
        "firebird"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_triggers: true,
            sequences: true,
            parameterized_views: false,
            materialized_views: false,
            schemas: false,
            transactional_ddl: false,
            alter_column: false,
            alter_constraints: true,
        }
    }

    fn type_name(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Integer => String::from("BIGINT"),
            ColumnType::Real => String::from("DOUBLE PRECISION"),
            ColumnType::Varchar(len) => format!("VARCHAR({len})"),
            ColumnType::Text => String::from("BLOB SUB_TYPE TEXT"),
            ColumnType::Decimal(p, s) => format!("DECIMAL({p}, {s})"),
            ColumnType::Boolean => String::from("BOOLEAN"),
            ColumnType::DateTime => String::from("TIMESTAMP"),
            ColumnType::Binary => String::from("BLOB"),
        }
    }

    fn physical_name(&self, grain: &str, name: &str) -> String {
        format!("{grain}_{name}")
    }

    // Firebird wants DEFAULT before NOT NULL.
    fn column_definition(&self, column: &Column) -> String {
        let mut parts = vec![self.quote(&column.name), self.type_name(column.column_type)];
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", self.render_default(default)));
        }
        if !column.nullable {
            parts.push(String::from("NOT NULL"));
        }
        parts.join(" ")
    }
}

impl DdlGenerator for FirebirdDialect {
    fn dialect(&self) -> &dyn Dialect {
        self
    }

    fn create_schema(&self, _grain: &Grain) -> DdlPlan {
        DdlPlan::NoOp
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
                self.quote(&format!("pk_{}", self.physical_name(table.grain(), &table.name))),
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
            "ALTER TABLE {} ADD {}",
            self.table_name(table.grain(), &table.name),
            self.column_definition(column)
        )])
    }

    fn update_column(&self, _table: &Table, column: &Column, live: &DbTableInfo) -> DdlPlan {
        match live.column(&column.name) {
            Some(current) if self.column_matches(column, current) => DdlPlan::NoOp,
            _ => DdlPlan::Unsupported {
                operation: "update column",
            },
        }
    }

    fn drop_column(&self, table: &Table, column: &str, live: &DbTableInfo) -> DdlPlan {
        if !live.has_column(column) {
            return DdlPlan::NoOp;
        }
        DdlPlan::of(vec![format!(
            "ALTER TABLE {} DROP {}",
            self.table_name(table.grain(), &table.name),
            self.quote(column)
        )])
    }

    fn update_primary_key(&self, table: &Table, live: &DbTableInfo) -> DdlPlan {
        if live.primary_key.columns == table.primary_key {
            DdlPlan::NoOp
        } else {
            DdlPlan::Unsupported {
                operation: "update primary key",
            }
        }
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
            self.quote(&format!(
                "fk_{}_{}",
                self.physical_name(table.grain(), &table.name),
                fk.columns.join("_")
            )),
            column_list(self, &fk.columns),
            self.table_name(fk.target_grain(), &fk.table),
            column_list(self, &fk.ref_columns),
            fk.on_update.to_sql(),
            fk.on_delete.to_sql()
        )])
    }

    fn drop_foreign_key(&self, table: &Table, fk: &DbForeignKeyInfo, _live: &DbTableInfo) -> DdlPlan {
        match &fk.name {
            Some(name) => DdlPlan::of(vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                self.table_name(table.grain(), &table.name),
                self.quote(name)
            )]),
            None => DdlPlan::Unsupported {
                operation: "drop unnamed foreign key",
            },
        }
    }

    fn create_index(&self, _table: &Table, _index: &Index) -> DdlPlan {
        DdlPlan::Unsupported {
            operation: "create index",
        }
    }

    fn drop_index(&self, _grain: &str, index: &DbIndexInfo) -> DdlPlan {
        DdlPlan::of(vec![format!("DROP INDEX {}", self.quote(&index.name))])
    }

    fn versioning_trigger_name(&self, table: &Table) -> String {
        format!(
            "{}_versioncheck",
            self.physical_name(table.grain(), &table.name)
        )
    }

    fn update_versioning_trigger(&self, table: &Table, trigger_exists: bool) -> DdlPlan {
        let trigger = self.quote(&self.versioning_trigger_name(table));
        let rev = self.quote(REVISION_COLUMN);
        match (table.is_versioned(), trigger_exists) {
            (true, false) => DdlPlan::of(vec![
                format!("CREATE OR ALTER EXCEPTION {VERSION_EXCEPTION} '{VERSION_CHECK_FAILURE}'"),
                format!(
                    "CREATE TRIGGER {trigger} FOR {} BEFORE UPDATE AS\n\
                     BEGIN\n  \
                     IF (NEW.{rev} <> OLD.{rev}) THEN\n    \
                     EXCEPTION {VERSION_EXCEPTION};\n  \
                     NEW.{rev} = OLD.{rev} + 1;\n\
                     END",
                    self.table_name(table.grain(), &table.name)
                ),
            ]),
            (false, true) => DdlPlan::of(vec![format!("DROP TRIGGER {trigger}")]),
            _ => DdlPlan::NoOp,
        }
    }

    fn create_view(&self, view: &View) -> DdlPlan {
        DdlPlan::of(vec![format!(
            "CREATE VIEW {} AS\n{}",
            self.table_name(view.grain(), &view.name),
            self.view_fingerprint(view)
        )])
    }

    fn drop_view(&self, grain: &str, name: &str) -> DdlPlan {
        DdlPlan::of(vec![format!("DROP VIEW {}", self.table_name(grain, name))])
    }

    /// The catalog keeps the view source after `AS`.
    fn view_fingerprint(&self, view: &View) -> String {
        select_sql(self, view)
    }

    fn create_parameterized_view(&self, _view: &View) -> DdlPlan {
        DdlPlan::Unsupported {
            operation: "create parameterized view",
        }
    }

    fn drop_parameterized_view(&self, _view: &View) -> DdlPlan {
        DdlPlan::Unsupported {
            operation: "drop parameterized view",
        }
    }

    fn create_materialized_view(&self, _view: &View, _source: &Table) -> DdlPlan {
        DdlPlan::Unsupported {
            operation: "create materialized view",
        }
    }

    fn drop_materialized_view(&self, _grain: &str, _name: &str) -> DdlPlan {
        DdlPlan::Unsupported {
            operation: "drop materialized view",
        }
    }

    fn materialized_view_triggers(&self, _view: &View, _source: &Table) -> Vec<(String, String)> {
        Vec::new()
    }

    fn create_materialized_view_triggers(&self, _view: &View, _source: &Table) -> DdlPlan {
        DdlPlan::Unsupported {
            operation: "create materialized view triggers",
        }
    }

    fn drop_materialized_view_triggers(&self, _view: &View, _source: &Table) -> DdlPlan {
        DdlPlan::Unsupported {
            operation: "drop materialized view triggers",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{DefaultValue, Score};

    fn dialect() -> FirebirdDialect {
        FirebirdDialect::new()
    }

    fn score() -> Score {
        Score::new(vec![Grain::new("hr", "1").table(
            Table::new(
                "employee",
                vec![
                    Column::new("id", ColumnType::Integer).not_null(),
                    Column::new("bio", ColumnType::Text),
                    Column::new("active", ColumnType::Boolean)
                        .not_null()
                        .default(DefaultValue::Bool(true)),
                ],
            )
            .primary_key(&["id"])
            .index(Index::new("employee_active", &["active"])),
        )])
        .unwrap()
    }

    #[test]
    fn create_table_puts_default_before_not_null() {
        let score = score();
        let employee = score.grain("hr").unwrap().find_table("employee").unwrap();
        assert_eq!(
            dialect().create_table(employee).statements()[0],
            "CREATE TABLE \"hr_employee\" (\n  \
             \"id\" BIGINT NOT NULL,\n  \
             \"bio\" BLOB SUB_TYPE TEXT,\n  \
             \"active\" BOOLEAN DEFAULT TRUE NOT NULL,\n  \
             \"recversion\" BIGINT DEFAULT 1 NOT NULL,\n  \
             CONSTRAINT \"pk_hr_employee\" PRIMARY KEY (\"id\")\n)"
        );
    }

    #[test]
    fn unsupported_operations_are_reported() {
        let score = score();
        let grain = score.grain("hr").unwrap();
        let employee = grain.find_table("employee").unwrap();
        assert_eq!(dialect().create_schema(grain), DdlPlan::NoOp);
        assert_eq!(
            dialect().create_index(employee, &employee.indices[0]),
            DdlPlan::Unsupported {
                operation: "create index"
            }
        );
        let live = DbTableInfo {
            name: "employee".to_string(),
            ..DbTableInfo::default()
        };
        assert!(dialect().update_primary_key(employee, &live).is_unsupported());
        let bio = employee.column("bio").unwrap();
        assert!(dialect().update_column(employee, bio, &live).is_unsupported());
    }

    #[test]
    fn versioning_trigger_raises_named_exception() {
        let score = score();
        let employee = score.grain("hr").unwrap().find_table("employee").unwrap();
        let plan = dialect().update_versioning_trigger(employee, false);
        assert_eq!(
            plan.statements()[0],
            "CREATE OR ALTER EXCEPTION STRATA_VERSION_CHECK 'record version check failure'"
        );
        assert!(plan.statements()[1].starts_with(
            "CREATE TRIGGER \"hr_employee_versioncheck\" FOR \"hr_employee\" BEFORE UPDATE AS"
        ));
    }
}
