#![allow(dead_code)]

use strata_core::{
    Column, ColumnType, DefaultValue, Expr, FkRule, ForeignKey, Grain, Index, Score, Table, View,
    ViewKind,
};

pub fn author() -> Table {
    Table::new(
        "author",
        vec![
            Column::new("id", ColumnType::Integer).not_null(),
            Column::new("name", ColumnType::Varchar(80)).not_null(),
        ],
    )
    .primary_key(&["id"])
}

pub fn book() -> Table {
    Table::new(
        "book",
        vec![
            Column::new("id", ColumnType::Integer).not_null(),
            Column::new("author_id", ColumnType::Integer).not_null(),
            Column::new("title", ColumnType::Varchar(200)).not_null(),
            Column::new("pages", ColumnType::Integer)
                .not_null()
                .default(DefaultValue::Integer(0)),
        ],
    )
    .primary_key(&["id"])
    .foreign_key(ForeignKey::new(&["author_id"], "author").on_delete(FkRule::Cascade))
    .index(Index::new("book_author", &["author_id"]))
}

pub fn pages_per_author() -> View {
    View::new("pages_per_author", "book", "b")
        .kind(ViewKind::MaterializedView)
        .column("author_id", Expr::qualified("b", "author_id"))
        .column("pages", Expr::sum(Expr::qualified("b", "pages")))
        .group_by("author_id")
}

pub fn books_of() -> View {
    View::new("books_of", "book", "b")
        .kind(ViewKind::ParameterizedView)
        .param("author", ColumnType::Integer)
        .column("id", Expr::qualified("b", "id"))
        .column("title", Expr::qualified("b", "title"))
        .filter(Expr::qualified("b", "author_id").eq(Expr::param("author")))
}

/// Library grain; `book` is declared before the table it references.
pub fn library() -> Grain {
    Grain::new("library", "2.1")
        .table(book())
        .table(author())
        .view(pages_per_author())
        .view(books_of())
}

pub fn score() -> Score {
    Score::new(vec![library()]).expect("Invalid score")
}
