//! SQLite dialect.
//!
//! SQLite has no schemas, so grain objects live in one namespace as
//! `grain__name`. It cannot alter columns or add constraints to an existing
//! table, so those changes rebuild the table: the live table is renamed
//! aside, recreated from the declaration, refilled from the common columns
//! and the old copy dropped.

use super::{
    column_list, select_sql, Capabilities, DdlGenerator, DdlPlan, Dialect, MaterializedParts,
    VERSION_CHECK_FAILURE,
};
use crate::live::{DbForeignKeyInfo, DbIndexInfo, DbTableInfo};
use crate::score::{
    Column, ColumnType, DefaultValue, ForeignKey, Grain, Index, Table, View, REVISION_COLUMN,
};
use crate::value::SqlValue;

/// SQLite dialect and DDL generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn table_sql(
        &self,
        physical: &str,
        columns: &[Column],
        foreign_keys: &[ForeignKey],
        primary_key: &[String],
    ) -> String {
        let mut defs: Vec<String> = columns.iter().map(|c| self.column_definition(c)).collect();
        for fk in foreign_keys {
            defs.push(self.foreign_key_clause(fk));
        }
        if !primary_key.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", column_list(self, primary_key)));
        }
        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote(physical),
            defs.join(",\n  ")
        )
    }

    fn foreign_key_clause(&self, fk: &ForeignKey) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            column_list(self, &fk.columns),
            self.table_name(fk.target_grain(), &fk.table),
            column_list(self, &fk.ref_columns),
            fk.on_update.to_sql(),
            fk.on_delete.to_sql()
        )
    }

    /// Recreates a table from its declaration, keeping the data of every
    /// column that exists on both sides.
    fn rebuild(&self, table: &Table, live: &DbTableInfo) -> DdlPlan {
        let physical = self.physical_name(table.grain(), &table.name);
        let aside = format!("{physical}__old");
        let columns = table.physical_columns();

        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for column in &columns {
            let Some(live_column) = live.column(&column.name) else {
                continue;
            };
            let quoted = self.quote(&column.name);
            let source = match &column.default {
                Some(default) if !column.nullable && live_column.nullable => {
                    format!("COALESCE({quoted}, {})", self.render_default(default))
                }
                _ => quoted.clone(),
            };
            targets.push(quoted);
            sources.push(source);
        }

        // Legacy renaming keeps views and foreign keys elsewhere pointing at
        // the original name. Callers run this with foreign key enforcement
        // off and check the result before committing.
        let mut statements = vec![
            String::from("PRAGMA legacy_alter_table = ON"),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote(&physical),
                self.quote(&aside)
            ),
            String::from("PRAGMA legacy_alter_table = OFF"),
            self.table_sql(&physical, &columns, &table.foreign_keys, &table.primary_key),
        ];
        if !targets.is_empty() {
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote(&physical),
                targets.join(", "),
                sources.join(", "),
                self.quote(&aside)
            ));
        }
        statements.push(format!("DROP TABLE {}", self.quote(&aside)));
        DdlPlan::Statements(statements)
    }

    fn materialized_trigger_names(&self, view: &View) -> [String; 3] {
        let base = self.physical_name(view.grain(), &view.name);
        [
            format!("{base}_ins"),
            format!("{base}_upd"),
            format!("{base}_del"),
        ]
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_triggers: true,
            sequences: false,
            parameterized_views: false,
            materialized_views: true,
            schemas: false,
            transactional_ddl: true,
            alter_column: false,
            alter_constraints: false,
        }
    }

    fn type_name(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Integer => String::from("INTEGER"),
            ColumnType::Real => String::from("REAL"),
            ColumnType::Varchar(len) => format!("VARCHAR({len})"),
            ColumnType::Text => String::from("TEXT"),
            ColumnType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
            ColumnType::Boolean => String::from("BOOLEAN"),
            ColumnType::DateTime => String::from("DATETIME"),
            ColumnType::Binary => String::from("BLOB"),
        }
    }

    fn physical_name(&self, grain: &str, name: &str) -> String {
        format!("{grain}__{name}")
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Bool(b) => String::from(if *b { "1" } else { "0" }),
            other => other.to_sql_inline(),
        }
    }
}

impl DdlGenerator for SqliteDialect {
    fn dialect(&self) -> &dyn Dialect {
        self
    }

    fn create_schema(&self, _grain: &Grain) -> DdlPlan {
        DdlPlan::NoOp
    }

    fn create_table(&self, table: &Table) -> DdlPlan {
        DdlPlan::of(vec![self.table_sql(
            &self.physical_name(table.grain(), &table.name),
            &table.physical_columns(),
            &table.foreign_keys,
            &table.primary_key,
        )])
    }

    fn drop_table(&self, grain: &str, name: &str) -> DdlPlan {
        DdlPlan::of(vec![format!("DROP TABLE {}", self.table_name(grain, name))])
    }

    fn add_column(&self, table: &Table, column: &Column, live: &DbTableInfo) -> DdlPlan {
        if live.has_column(&column.name) {
            return DdlPlan::NoOp;
        }
        // ADD COLUMN rejects NOT NULL without a default and non-constant defaults.
        let in_place = match &column.default {
            Some(DefaultValue::CurrentTimestamp) => false,
            Some(_) => true,
            None => column.nullable,
        };
        if in_place {
            DdlPlan::of(vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.table_name(table.grain(), &table.name),
                self.column_definition(column)
            )])
        } else {
            self.rebuild(table, live)
        }
    }

    fn update_column(&self, table: &Table, column: &Column, live: &DbTableInfo) -> DdlPlan {
        match live.column(&column.name) {
            Some(current) if self.column_matches(column, current) => DdlPlan::NoOp,
            _ => self.rebuild(table, live),
        }
    }

    fn drop_column(&self, table: &Table, column: &str, live: &DbTableInfo) -> DdlPlan {
        if live.has_column(column) {
            self.rebuild(table, live)
        } else {
            DdlPlan::NoOp
        }
    }

    fn update_primary_key(&self, table: &Table, live: &DbTableInfo) -> DdlPlan {
        if live.primary_key.columns == table.primary_key {
            DdlPlan::NoOp
        } else {
            self.rebuild(table, live)
        }
    }

    fn create_foreign_key(&self, table: &Table, fk: &ForeignKey, live: &DbTableInfo) -> DdlPlan {
        if live
            .foreign_keys
            .iter()
            .any(|current| self.foreign_key_matches(fk, current))
        {
            DdlPlan::NoOp
        } else {
            self.rebuild(table, live)
        }
    }

    fn drop_foreign_key(&self, table: &Table, _fk: &DbForeignKeyInfo, live: &DbTableInfo) -> DdlPlan {
        self.rebuild(table, live)
    }

    fn create_index(&self, table: &Table, index: &Index) -> DdlPlan {
        DdlPlan::of(vec![format!(
            "CREATE INDEX {} ON {} ({})",
            self.quote(&self.index_name(table.grain(), &index.name)),
            self.table_name(table.grain(), &table.name),
            column_list(self, &index.columns)
        )])
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
        let target = self.table_name(table.grain(), &table.name);
        let rev = self.quote(REVISION_COLUMN);
        match (table.is_versioned(), trigger_exists) {
            (true, false) => DdlPlan::of(vec![format!(
                "CREATE TRIGGER {trigger} AFTER UPDATE ON {target} FOR EACH ROW BEGIN\n  \
                 SELECT RAISE(ABORT, '{VERSION_CHECK_FAILURE}') WHERE NEW.{rev} <> OLD.{rev};\n  \
                 UPDATE {target} SET {rev} = OLD.{rev} + 1 WHERE rowid = NEW.rowid;\nEND"
            )]),
            (false, true) => DdlPlan::of(vec![format!("DROP TRIGGER {trigger}")]),
            _ => DdlPlan::NoOp,
        }
    }

    fn create_view(&self, view: &View) -> DdlPlan {
        DdlPlan::of(vec![self.view_fingerprint(view)])
    }

    fn drop_view(&self, grain: &str, name: &str) -> DdlPlan {
        DdlPlan::of(vec![format!("DROP VIEW {}", self.table_name(grain, name))])
    }

    fn view_fingerprint(&self, view: &View) -> String {
        format!(
            "CREATE VIEW {} AS\n{}",
            self.table_name(view.grain(), &view.name),
            select_sql(self, view)
        )
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

    fn create_materialized_view(&self, view: &View, _source: &Table) -> DdlPlan {
        let parts = MaterializedParts::new(self, view);
        DdlPlan::of(vec![
            self.table_sql(
                &self.physical_name(view.grain(), &view.name),
                &self.materialized_view_columns(view),
                &[],
                &view.group_by,
            ),
            parts.refill(None),
        ])
    }

    fn drop_materialized_view(&self, grain: &str, name: &str) -> DdlPlan {
        self.drop_table(grain, name)
    }

    fn materialized_view_triggers(&self, view: &View, _source: &Table) -> Vec<(String, String)> {
        let parts = MaterializedParts::new(self, view);
        let refresh = |row: &str| {
            format!(
                "  DELETE FROM {} WHERE {};\n  {};\n",
                parts.target,
                parts.target_match(row, "IS"),
                parts.refill(Some(&parts.source_match(row, "IS")))
            )
        };
        let [ins, upd, del] = self.materialized_trigger_names(view);
        let header = |name: &str, event: &str| {
            format!(
                "CREATE TRIGGER {} AFTER {event} ON {} FOR EACH ROW BEGIN\n",
                self.quote(name),
                parts.source
            )
        };
        vec![
            (
                ins.clone(),
                format!("{}{}END", header(&ins, "INSERT"), refresh("NEW")),
            ),
            (
                upd.clone(),
                format!(
                    "{}{}{}END",
                    header(&upd, "UPDATE"),
                    refresh("OLD"),
                    refresh("NEW")
                ),
            ),
            (
                del.clone(),
                format!("{}{}END", header(&del, "DELETE"), refresh("OLD")),
            ),
        ]
    }

    fn create_materialized_view_triggers(&self, view: &View, source: &Table) -> DdlPlan {
        DdlPlan::of(
            self.materialized_view_triggers(view, source)
                .into_iter()
                .map(|(_, sql)| sql)
                .collect(),
        )
    }

    fn drop_materialized_view_triggers(&self, view: &View, _source: &Table) -> DdlPlan {
        DdlPlan::of(
            self.materialized_trigger_names(view)
                .iter()
                .map(|name| format!("DROP TRIGGER IF EXISTS {}", self.quote(name)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::live::{DbColumnInfo, DbPkInfo};
    use crate::score::{FkRule, Score, ViewKind};

    fn dialect() -> SqliteDialect {
        SqliteDialect::new()
    }

    fn score() -> Score {
        Score::new(vec![Grain::new("shop", "1")
            .table(
                Table::new(
                    "customer",
                    vec![
                        Column::new("id", ColumnType::Integer).not_null(),
                        Column::new("name", ColumnType::Varchar(40)).not_null(),
                    ],
                )
                .primary_key(&["id"]),
            )
            .table(
                Table::new(
                    "orders",
                    vec![
                        Column::new("id", ColumnType::Integer).not_null(),
                        Column::new("customer_id", ColumnType::Integer).not_null(),
                        Column::new("amount", ColumnType::Decimal(10, 2))
                            .not_null()
                            .default(DefaultValue::Integer(0)),
                        Column::new("paid", ColumnType::Boolean)
                            .not_null()
                            .default(DefaultValue::Bool(false)),
                    ],
                )
                .primary_key(&["id"])
                .foreign_key(
                    ForeignKey::new(&["customer_id"], "customer").on_delete(FkRule::Cascade),
                )
                .index(Index::new("orders_customer", &["customer_id"])),
            )
            .view(
                View::new("per_customer", "orders", "o")
                    .kind(ViewKind::MaterializedView)
                    .column("customer_id", Expr::qualified("o", "customer_id"))
                    .column("total", Expr::sum(Expr::qualified("o", "amount")))
                    .group_by("customer_id"),
            )])
        .unwrap()
    }

    fn live_orders(columns: &[(&str, &str, bool)]) -> DbTableInfo {
        DbTableInfo {
            name: "orders".to_string(),
            columns: columns
                .iter()
                .map(|(name, ty, nullable)| DbColumnInfo {
                    name: (*name).to_string(),
                    type_name: (*ty).to_string(),
                    nullable: *nullable,
                    default: None,
                })
                .collect(),
            primary_key: DbPkInfo {
                name: None,
                columns: vec!["id".to_string()],
            },
            foreign_keys: Vec::new(),
        }
    }

    #[test]
    fn create_table_columns_then_keys() {
        let score = score();
        let orders = score.grain("shop").unwrap().find_table("orders").unwrap();
        let plan = dialect().create_table(orders);
        assert_eq!(
            plan.statements(),
            &[String::from(
                "CREATE TABLE \"shop__orders\" (\n  \
                 \"id\" INTEGER NOT NULL,\n  \
                 \"customer_id\" INTEGER NOT NULL,\n  \
                 \"amount\" DECIMAL(10,2) NOT NULL DEFAULT 0,\n  \
                 \"paid\" BOOLEAN NOT NULL DEFAULT 0,\n  \
                 \"recversion\" INTEGER NOT NULL DEFAULT 1,\n  \
                 FOREIGN KEY (\"customer_id\") REFERENCES \"shop__customer\" (\"id\") ON UPDATE NO ACTION ON DELETE CASCADE,\n  \
                 PRIMARY KEY (\"id\")\n)"
            )]
        );
    }

    #[test]
    fn add_nullable_column_alters_in_place() {
        let score = score();
        let orders = score.grain("shop").unwrap().find_table("orders").unwrap();
        let live = live_orders(&[("id", "INTEGER", false)]);
        let note = Column::new("note", ColumnType::Text);
        assert_eq!(
            dialect().add_column(orders, &note, &live).statements(),
            &[String::from("ALTER TABLE \"shop__orders\" ADD COLUMN \"note\" TEXT")]
        );
        let with_default = Column::new("flag", ColumnType::Boolean)
            .not_null()
            .default(DefaultValue::Bool(true));
        assert_eq!(
            dialect().add_column(orders, &with_default, &live).statements()[0],
            "ALTER TABLE \"shop__orders\" ADD COLUMN \"flag\" BOOLEAN NOT NULL DEFAULT 1"
        );
    }

    #[test]
    fn add_not_null_column_without_default_rebuilds() {
        let score = score();
        let orders = score.grain("shop").unwrap().find_table("orders").unwrap();
        let live = live_orders(&[("id", "INTEGER", false), ("recversion", "INTEGER", false)]);
        let column = orders.column("customer_id").unwrap();
        let plan = dialect().add_column(orders, column, &live);
        let statements = plan.statements();
        assert_eq!(statements[1], "ALTER TABLE \"shop__orders\" RENAME TO \"shop__orders__old\"");
        assert!(statements[3].starts_with("CREATE TABLE \"shop__orders\""));
        assert_eq!(
            statements[4],
            "INSERT INTO \"shop__orders\" (\"id\", \"recversion\") SELECT \"id\", \"recversion\" FROM \"shop__orders__old\""
        );
        assert_eq!(statements[5], "DROP TABLE \"shop__orders__old\"");
    }

    #[test]
    fn update_column_is_noop_when_matching() {
        let score = score();
        let orders = score.grain("shop").unwrap().find_table("orders").unwrap();
        let mut live = live_orders(&[
            ("id", "INTEGER", false),
            ("customer_id", "INTEGER", false),
            ("amount", "DECIMAL(10, 2)", false),
        ]);
        live.columns[2].default = Some("0".to_string());
        let amount = orders.column("amount").unwrap();
        assert_eq!(dialect().update_column(orders, amount, &live), DdlPlan::NoOp);

        live.columns[2].nullable = true;
        let plan = dialect().update_column(orders, amount, &live);
        assert!(plan.statements().iter().any(|s| s.contains("COALESCE(\"amount\", 0)")));
    }

    #[test]
    fn versioning_trigger_follows_table_flag() {
        let score = score();
        let orders = score.grain("shop").unwrap().find_table("orders").unwrap();
        let plan = dialect().update_versioning_trigger(orders, false);
        let sql = &plan.statements()[0];
        assert!(sql.starts_with(
            "CREATE TRIGGER \"shop__orders_versioncheck\" AFTER UPDATE ON \"shop__orders\""
        ));
        assert!(sql.contains(VERSION_CHECK_FAILURE));
        assert_eq!(dialect().update_versioning_trigger(orders, true), DdlPlan::NoOp);

        let unversioned = orders.clone().versioned(false);
        assert_eq!(
            dialect().update_versioning_trigger(&unversioned, true).statements(),
            &[String::from("DROP TRIGGER \"shop__orders_versioncheck\"")]
        );
        assert_eq!(dialect().update_versioning_trigger(&unversioned, false), DdlPlan::NoOp);
    }

    #[test]
    fn index_names_are_grain_scoped() {
        let score = score();
        let orders = score.grain("shop").unwrap().find_table("orders").unwrap();
        assert_eq!(
            dialect().create_index(orders, &orders.indices[0]).statements(),
            &[String::from(
                "CREATE INDEX \"shop__orders_customer\" ON \"shop__orders\" (\"customer_id\")"
            )]
        );
    }

    #[test]
    fn parameterized_views_are_unsupported() {
        let score = score();
        let view = score.grain("shop").unwrap().find_view("per_customer").unwrap();
        assert!(dialect().create_parameterized_view(view).is_unsupported());
    }

    #[test]
    fn materialized_view_table_and_triggers() {
        let score = score();
        let grain = score.grain("shop").unwrap();
        let view = grain.find_view("per_customer").unwrap();
        let orders = grain.find_table("orders").unwrap();

        let plan = dialect().create_materialized_view(view, orders);
        assert_eq!(
            plan.statements()[0],
            "CREATE TABLE \"shop__per_customer\" (\n  \
             \"customer_id\" INTEGER NOT NULL,\n  \
             \"total\" DECIMAL(10,2),\n  \
             \"surrogate_count\" INTEGER NOT NULL DEFAULT 0,\n  \
             PRIMARY KEY (\"customer_id\")\n)"
        );

        let triggers = dialect().materialized_view_triggers(view, orders);
        let names: Vec<&str> = triggers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["shop__per_customer_ins", "shop__per_customer_upd", "shop__per_customer_del"]
        );
        assert_eq!(
            triggers[0].1,
            "CREATE TRIGGER \"shop__per_customer_ins\" AFTER INSERT ON \"shop__orders\" FOR EACH ROW BEGIN\n  \
             DELETE FROM \"shop__per_customer\" WHERE \"customer_id\" IS NEW.\"customer_id\";\n  \
             INSERT INTO \"shop__per_customer\" (\"customer_id\", \"total\", \"surrogate_count\") \
             SELECT \"customer_id\", SUM(\"amount\"), COUNT(*) FROM \"shop__orders\" \
             WHERE \"customer_id\" IS NEW.\"customer_id\" GROUP BY \"customer_id\";\nEND"
        );
        assert!(triggers[1].1.contains("OLD.\"customer_id\"") && triggers[1].1.contains("NEW.\"customer_id\""));
    }
}
