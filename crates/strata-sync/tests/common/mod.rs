#![allow(dead_code)]

use sqlx::{Connection, SqliteConnection};
use strata_core::{
    Column, ColumnType, DefaultValue, Expr, FkRule, ForeignKey, Grain, Index, Score, Table, View,
    ViewKind,
};

pub async fn memory() -> SqliteConnection {
    SqliteConnection::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite")
}

pub fn customer() -> Table {
    Table::new(
        "customer",
        vec![
            Column::new("id", ColumnType::Integer).not_null(),
            Column::new("name", ColumnType::Varchar(40)).not_null(),
        ],
    )
    .primary_key(&["id"])
}

pub fn orders() -> Table {
    Table::new(
        "orders",
        vec![
            Column::new("id", ColumnType::Integer).not_null(),
            Column::new("customer_id", ColumnType::Integer).not_null(),
            Column::new("amount", ColumnType::Integer)
                .not_null()
                .default(DefaultValue::Integer(0)),
            Column::new("note", ColumnType::Text),
        ],
    )
    .primary_key(&["id"])
    .foreign_key(ForeignKey::new(&["customer_id"], "customer").on_delete(FkRule::Cascade))
    .index(Index::new("orders_customer", &["customer_id"]))
}

pub fn big_orders(threshold: i64) -> View {
    View::new("big_orders", "orders", "o")
        .column("id", Expr::qualified("o", "id"))
        .column("amount", Expr::qualified("o", "amount"))
        .filter(Expr::qualified("o", "amount").gt(Expr::lit(threshold)))
}

pub fn per_customer() -> View {
    View::new("per_customer", "orders", "o")
        .kind(ViewKind::MaterializedView)
        .column("customer_id", Expr::qualified("o", "customer_id"))
        .column("total", Expr::sum(Expr::qualified("o", "amount")))
        .column("order_count", Expr::count())
        .group_by("customer_id")
}

pub fn shop() -> Grain {
    Grain::new("shop", "1.0")
        .table(customer())
        .table(orders())
        .view(big_orders(100))
        .view(per_customer())
}

pub fn score(grains: Vec<Grain>) -> Score {
    Score::new(grains).expect("Invalid score")
}

pub async fn table_exists(conn: &mut SqliteConnection, name: &str) -> bool {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .expect("Failed to read catalog");
    row.is_some()
}
