//! The declared schema model.
//!
//! A [`Score`] is an ordered set of [`Grain`]s. Each grain is a namespace
//! owning tables and views. A score is only ever observed finalized:
//! [`Score::new`] checks every invariant, resolves foreign keys and view
//! field references, and orders grains so that referenced grains come first.

mod table;
mod view;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use table::{
    Column, ColumnType, DefaultValue, FkRule, ForeignKey, Index, Table, REVISION_COLUMN,
};
pub use view::{JoinKind, TableRef, View, ViewColumn, ViewKind, ViewParam, SURROGATE_COUNT};

use crate::error::ModelError;

/// A named namespace of tables and views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grain {
    /// Grain name.
    pub name: String,
    /// Declared version tag.
    #[serde(default)]
    pub version: String,
    /// Tables in declaration order.
    #[serde(default)]
    pub tables: Vec<Table>,
    /// Views of every kind in declaration order.
    #[serde(default)]
    pub views: Vec<View>,
}

impl Grain {
    /// Creates an empty grain.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tables: Vec::new(),
            views: Vec::new(),
        }
    }

    /// Adds a table.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds a view.
    #[must_use]
    pub fn view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    /// Looks up a table by name.
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Looks up a view of any kind by name.
    #[must_use]
    pub fn find_view(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|v| v.name == name)
    }

    /// Views of one kind, in declaration order.
    pub fn views_of(&self, kind: ViewKind) -> impl Iterator<Item = &View> {
        self.views.iter().filter(move |v| v.kind == kind)
    }

    /// SHA-256 of the grain's canonical JSON form, hex encoded.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Malformed`] when the grain cannot be encoded.
    pub fn checksum(&self) -> Result<String, ModelError> {
        let bytes = serde_json::to_vec(self).map_err(|e| ModelError::Malformed(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Tables ordered so that every table follows the tables it references
    /// inside this grain. Cycles keep declaration order.
    #[must_use]
    pub fn tables_in_dependency_order(&self) -> Vec<&Table> {
        let mut ordered: Vec<&Table> = Vec::with_capacity(self.tables.len());
        let mut placed: HashSet<&str> = HashSet::new();
        let mut visiting: HashSet<&str> = HashSet::new();

        fn place<'g>(
            grain: &'g Grain,
            table: &'g Table,
            placed: &mut HashSet<&'g str>,
            visiting: &mut HashSet<&'g str>,
            ordered: &mut Vec<&'g Table>,
        ) {
            if placed.contains(table.name.as_str()) || !visiting.insert(table.name.as_str()) {
                return;
            }
            for fk in &table.foreign_keys {
                if fk.target_grain() == grain.name && fk.table != table.name {
                    if let Some(target) = grain.find_table(&fk.table) {
                        place(grain, target, placed, visiting, ordered);
                    }
                }
            }
            visiting.remove(table.name.as_str());
            if placed.insert(table.name.as_str()) {
                ordered.push(table);
            }
        }

        for table in &self.tables {
            place(self, table, &mut placed, &mut visiting, &mut ordered);
        }
        ordered
    }

    fn check_local(&mut self) -> Result<(), ModelError> {
        if self.name.is_empty() {
            return Err(ModelError::EmptyName { what: "grain" });
        }
        check_name("grain", &self.name)?;
        let mut element_names = HashSet::new();
        let mut index_names = HashSet::new();
        let grain = self.name.clone();

        for table in &mut self.tables {
            table.grain.clone_from(&grain);
            let owner = format!("{grain}.{}", table.name);
            if table.name.is_empty() {
                return Err(ModelError::EmptyName { what: "table" });
            }
            check_name("table", &table.name)?;
            if !element_names.insert(table.name.clone()) {
                return Err(ModelError::Duplicate {
                    what: "table",
                    name: table.name.clone(),
                    owner: grain,
                });
            }

            let mut columns = HashSet::new();
            for column in &table.columns {
                if column.name.is_empty() {
                    return Err(ModelError::EmptyName { what: "column" });
                }
                if !columns.insert(column.name.as_str())
                    || table.is_hidden_column(&column.name)
                {
                    return Err(ModelError::Duplicate {
                        what: "column",
                        name: column.name.clone(),
                        owner,
                    });
                }
            }

            let mut pk = HashSet::new();
            for key in &table.primary_key {
                let column = table.column(key).ok_or_else(|| ModelError::UnknownColumn {
                    owner: owner.clone(),
                    column: key.clone(),
                })?;
                if column.nullable {
                    return Err(ModelError::InvalidPrimaryKey {
                        table: owner,
                        reason: format!("column '{key}' is nullable"),
                    });
                }
                if !pk.insert(key.as_str()) {
                    return Err(ModelError::InvalidPrimaryKey {
                        table: owner,
                        reason: format!("column '{key}' is listed twice"),
                    });
                }
            }

            for index in &table.indices {
                if index.name.is_empty() {
                    return Err(ModelError::EmptyName { what: "index" });
                }
                check_name("index", &index.name)?;
                if !index_names.insert(index.name.clone()) {
                    return Err(ModelError::Duplicate {
                        what: "index",
                        name: index.name.clone(),
                        owner: grain,
                    });
                }
                if index.columns.is_empty() {
                    return Err(ModelError::EmptyName { what: "index column" });
                }
                for column in &index.columns {
                    if table.column(column).is_none() {
                        return Err(ModelError::UnknownColumn {
                            owner: format!("{grain}.{}", index.name),
                            column: column.clone(),
                        });
                    }
                }
            }

            for fk in &mut table.foreign_keys {
                if fk.grain.is_none() {
                    fk.grain = Some(grain.clone());
                }
            }
        }

        for view in &self.views {
            if view.name.is_empty() {
                return Err(ModelError::EmptyName { what: "view" });
            }
            check_name("view", &view.name)?;
            if !element_names.insert(view.name.clone()) {
                return Err(ModelError::Duplicate {
                    what: "view",
                    name: view.name.clone(),
                    owner: grain,
                });
            }
        }
        Ok(())
    }
}

/// Physical names join grain and element with `__`, so neither part may
/// contain it or start or end with `_`.
fn check_name(what: &'static str, name: &str) -> Result<(), ModelError> {
    let reason = if name.contains("__") {
        "must not contain '__'"
    } else if name.starts_with('_') || name.ends_with('_') {
        "must not start or end with '_'"
    } else {
        return Ok(());
    };
    Err(ModelError::InvalidName {
        what,
        name: name.to_string(),
        reason,
    })
}

/// Borrowed view of any element that exposes columns to data accessors.
///
/// The variant is fixed by the declaration: tables split on their
/// read-only flag, views on their [`ViewKind`].
#[derive(Debug, Clone, Copy)]
pub enum TableElement<'a> {
    /// Writable table.
    Table(&'a Table),
    /// Table declared read-only.
    ReadOnlyTable(&'a Table),
    /// Plain view.
    View(&'a View),
    /// Trigger-maintained aggregate table.
    MaterializedView(&'a View),
    /// Function-backed view taking parameters.
    ParameterizedView(&'a View),
}

impl<'a> TableElement<'a> {
    /// Wraps a table.
    #[must_use]
    pub const fn from_table(table: &'a Table) -> Self {
        if table.read_only {
            Self::ReadOnlyTable(table)
        } else {
            Self::Table(table)
        }
    }

    /// Wraps a view.
    #[must_use]
    pub const fn from_view(view: &'a View) -> Self {
        match view.kind {
            ViewKind::View => Self::View(view),
            ViewKind::MaterializedView => Self::MaterializedView(view),
            ViewKind::ParameterizedView => Self::ParameterizedView(view),
        }
    }

    /// Element name.
    #[must_use]
    pub fn name(&self) -> &'a str {
        match self {
            Self::Table(t) | Self::ReadOnlyTable(t) => &t.name,
            Self::View(v) | Self::MaterializedView(v) | Self::ParameterizedView(v) => &v.name,
        }
    }

    /// Owning grain.
    #[must_use]
    pub fn grain(&self) -> &'a str {
        match self {
            Self::Table(t) | Self::ReadOnlyTable(t) => &t.grain,
            Self::View(v) | Self::MaterializedView(v) | Self::ParameterizedView(v) => &v.grain,
        }
    }

    /// Declared (or inferred, for views) columns in order.
    #[must_use]
    pub fn columns(&self) -> &'a [Column] {
        match self {
            Self::Table(t) | Self::ReadOnlyTable(t) => &t.columns,
            Self::View(v) | Self::MaterializedView(v) | Self::ParameterizedView(v) => {
                &v.resolved
            }
        }
    }

    /// Columns read by data accessors: declared ones plus the revision
    /// column of versioned tables.
    #[must_use]
    pub fn readable_columns(&self) -> Vec<Column> {
        let mut columns = self.columns().to_vec();
        if self.is_versioned() {
            columns.push(Column::revision());
        }
        columns
    }

    /// Looks up a column by name, including the revision column of
    /// versioned tables.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Column> {
        self.readable_columns().into_iter().find(|c| c.name == name)
    }

    /// Primary key columns in key order; empty when there is none.
    #[must_use]
    pub fn primary_key(&self) -> &'a [String] {
        match self {
            Self::Table(t) | Self::ReadOnlyTable(t) => &t.primary_key,
            Self::MaterializedView(v) => &v.group_by,
            Self::View(_) | Self::ParameterizedView(_) => &[],
        }
    }

    /// Returns true when the element has a primary key.
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key().is_empty()
    }

    /// Returns true when updates are revision-checked.
    #[must_use]
    pub const fn is_versioned(&self) -> bool {
        match self {
            Self::Table(t) => t.is_versioned(),
            _ => false,
        }
    }

    /// Returns true when accessors may not write.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        !matches!(self, Self::Table(_))
    }

    /// Parameters a select must supply first.
    #[must_use]
    pub fn params(&self) -> &'a [ViewParam] {
        match self {
            Self::ParameterizedView(v) => &v.params,
            _ => &[],
        }
    }
}

/// The complete, finalized set of grains of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Grain>", into = "Vec<Grain>")]
pub struct Score {
    grains: Vec<Grain>,
}

impl TryFrom<Vec<Grain>> for Score {
    type Error = ModelError;

    fn try_from(grains: Vec<Grain>) -> Result<Self, Self::Error> {
        Self::new(grains)
    }
}

impl From<Score> for Vec<Grain> {
    fn from(score: Score) -> Self {
        score.grains
    }
}

impl Score {
    /// Finalizes a set of grains.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] for the first invariant violation found.
    pub fn new(mut grains: Vec<Grain>) -> Result<Self, ModelError> {
        let mut names = HashSet::new();
        for grain in &mut grains {
            grain.check_local()?;
            if !names.insert(grain.name.clone()) {
                return Err(ModelError::Duplicate {
                    what: "grain",
                    name: grain.name.clone(),
                    owner: "score".to_string(),
                });
            }
        }

        let catalog: HashMap<(String, String), Table> = grains
            .iter()
            .flat_map(|g| g.tables.iter().map(|t| ((g.name.clone(), t.name.clone()), t.clone())))
            .collect();

        for grain in &mut grains {
            for table in &mut grain.tables {
                resolve_foreign_keys(table, &catalog)?;
            }
        }

        let lookup = |grain: &str, table: &str| catalog.get(&(grain.to_string(), table.to_string()));
        for grain in &mut grains {
            let name = grain.name.clone();
            for view in &mut grain.views {
                view.finalize(&name, &lookup)?;
            }
        }

        let grains = order_grains(grains)?;
        Ok(Self { grains })
    }

    /// Parses and finalizes a score from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Malformed`] for undecodable input and any
    /// other [`ModelError`] raised by finalization.
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        let grains: Vec<Grain> =
            serde_json::from_str(text).map_err(|e| ModelError::Malformed(e.to_string()))?;
        Self::new(grains)
    }

    /// Grains, referenced grains first.
    #[must_use]
    pub fn grains(&self) -> &[Grain] {
        &self.grains
    }

    /// Looks up a grain.
    #[must_use]
    pub fn grain(&self, name: &str) -> Option<&Grain> {
        self.grains.iter().find(|g| g.name == name)
    }

    /// Looks up a table or view.
    #[must_use]
    pub fn element(&self, grain: &str, name: &str) -> Option<TableElement<'_>> {
        let grain = self.grain(grain)?;
        grain
            .find_table(name)
            .map(TableElement::from_table)
            .or_else(|| grain.find_view(name).map(TableElement::from_view))
    }
}

fn resolve_foreign_keys(
    table: &mut Table,
    catalog: &HashMap<(String, String), Table>,
) -> Result<(), ModelError> {
    let owner = format!("{}.{}", table.grain, table.name);
    let columns = table.columns.clone();
    for fk in &mut table.foreign_keys {
        let target_grain = fk.target_grain().to_string();
        let target = catalog
            .get(&(target_grain.clone(), fk.table.clone()))
            .ok_or_else(|| ModelError::UnresolvedReference {
                what: "table",
                name: format!("{target_grain}.{}", fk.table),
                owner: owner.clone(),
            })?;
        if fk.ref_columns.is_empty() {
            if target.primary_key.is_empty() {
                return Err(ModelError::InvalidForeignKey {
                    table: owner,
                    reason: format!("target '{}' has no primary key", fk.table),
                });
            }
            fk.ref_columns.clone_from(&target.primary_key);
        }
        if fk.columns.is_empty() || fk.columns.len() != fk.ref_columns.len() {
            return Err(ModelError::InvalidForeignKey {
                table: owner,
                reason: format!(
                    "{} column(s) reference {} column(s) of '{}'",
                    fk.columns.len(),
                    fk.ref_columns.len(),
                    fk.table
                ),
            });
        }
        for (local, remote) in fk.columns.iter().zip(&fk.ref_columns) {
            let local_column = columns.iter().find(|c| &c.name == local).ok_or_else(|| {
                ModelError::UnknownColumn {
                    owner: owner.clone(),
                    column: local.clone(),
                }
            })?;
            let remote_column = target.column(remote).ok_or_else(|| ModelError::UnknownColumn {
                owner: format!("{target_grain}.{}", fk.table),
                column: remote.clone(),
            })?;
            if local_column.column_type != remote_column.column_type {
                return Err(ModelError::InvalidForeignKey {
                    table: owner,
                    reason: format!("type of '{local}' differs from '{}.{remote}'", fk.table),
                });
            }
            let sets_null = fk.on_delete == FkRule::SetNull || fk.on_update == FkRule::SetNull;
            if sets_null && !local_column.nullable {
                return Err(ModelError::InvalidForeignKey {
                    table: owner,
                    reason: format!("SET NULL action on NOT NULL column '{local}'"),
                });
            }
        }
    }
    Ok(())
}

/// Orders grains so that every grain follows the grains it references.
fn order_grains(grains: Vec<Grain>) -> Result<Vec<Grain>, ModelError> {
    let deps: HashMap<String, HashSet<String>> = grains
        .iter()
        .map(|g| {
            let mut targets: HashSet<String> = g
                .tables
                .iter()
                .flat_map(|t| t.foreign_keys.iter().map(|fk| fk.target_grain().to_string()))
                .collect();
            for view in &g.views {
                for table_ref in &view.from {
                    if let Some(other) = &table_ref.grain {
                        targets.insert(other.clone());
                    }
                }
            }
            targets.remove(&g.name);
            (g.name.clone(), targets)
        })
        .collect();

    let mut remaining = grains;
    let mut ordered: Vec<Grain> = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|g| {
            deps[&g.name]
                .iter()
                .all(|d| ordered.iter().any(|o| &o.name == d))
        });
        match ready {
            Some(position) => ordered.push(remaining.remove(position)),
            None => {
                let names: Vec<&str> = remaining.iter().map(|g| g.name.as_str()).collect();
                return Err(ModelError::CyclicGrains(names.join(", ")));
            }
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    fn accounts() -> Table {
        Table::new(
            "account",
            vec![
                Column::new("id", ColumnType::Integer).not_null(),
                Column::new("owner", ColumnType::Varchar(40)).not_null(),
                Column::new("balance", ColumnType::Decimal(12, 2)),
            ],
        )
        .primary_key(&["id"])
    }

    fn ledger() -> Table {
        Table::new(
            "entry",
            vec![
                Column::new("account_id", ColumnType::Integer).not_null(),
                Column::new("seq", ColumnType::Integer).not_null(),
                Column::new("amount", ColumnType::Integer).not_null(),
            ],
        )
        .primary_key(&["account_id", "seq"])
        .foreign_key(ForeignKey::new(&["account_id"], "account").on_delete(FkRule::Cascade))
    }

    #[test]
    fn finalizes_and_resolves_foreign_keys() {
        let score = Score::new(vec![Grain::new("bank", "1.0").table(ledger()).table(accounts())])
            .unwrap();
        let grain = score.grain("bank").unwrap();
        let entry = grain.find_table("entry").unwrap();
        assert_eq!(entry.grain(), "bank");
        assert_eq!(entry.foreign_keys[0].ref_columns, vec!["id".to_string()]);
        assert_eq!(entry.foreign_keys[0].target_grain(), "bank");

        let order: Vec<&str> = grain
            .tables_in_dependency_order()
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(order, vec!["account", "entry"]);
    }

    #[test]
    fn rejects_duplicate_columns() {
        let table = Table::new(
            "t",
            vec![
                Column::new("a", ColumnType::Integer),
                Column::new("a", ColumnType::Text),
            ],
        );
        let err = Score::new(vec![Grain::new("g", "1").table(table)]).unwrap_err();
        assert!(matches!(err, ModelError::Duplicate { what: "column", .. }));
    }

    #[test]
    fn rejects_names_that_blur_grain_boundaries() {
        let table = || Table::new("t", vec![Column::new("a", ColumnType::Integer)]);
        let rejected = |grain: Grain, what: &str| {
            matches!(
                Score::new(vec![grain]),
                Err(ModelError::InvalidName { what: w, .. }) if *w == *what
            )
        };

        assert!(rejected(Grain::new("shop_", "1").table(table()), "grain"));
        assert!(rejected(Grain::new("_shop", "1").table(table()), "grain"));
        assert!(rejected(Grain::new("a__b", "1").table(table()), "grain"));
        assert!(rejected(
            Grain::new("g", "1")
                .table(Table::new("orders__old", vec![Column::new("a", ColumnType::Integer)])),
            "table"
        ));
        assert!(rejected(
            Grain::new("g", "1").table(table().index(Index::new("by_a_", &["a"]))),
            "index"
        ));
        assert!(rejected(
            Grain::new("g", "1")
                .table(table())
                .view(View::new("v__x", "t", "t").column("a", Expr::qualified("t", "a"))),
            "view"
        ));
        assert!(Score::new(vec![Grain::new("shop_front", "1").table(table())]).is_ok());
    }

    #[test]
    fn rejects_declared_revision_column() {
        let table = Table::new("t", vec![Column::new(REVISION_COLUMN, ColumnType::Integer)]);
        assert!(Score::new(vec![Grain::new("g", "1").table(table)]).is_err());
    }

    #[test]
    fn rejects_nullable_primary_key() {
        let table = Table::new("t", vec![Column::new("a", ColumnType::Integer)]).primary_key(&["a"]);
        let err = Score::new(vec![Grain::new("g", "1").table(table)]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidPrimaryKey { .. }));
    }

    #[test]
    fn rejects_unresolved_foreign_key() {
        let err = Score::new(vec![Grain::new("g", "1").table(ledger())]).unwrap_err();
        assert!(matches!(err, ModelError::UnresolvedReference { .. }));
    }

    #[test]
    fn orders_grains_by_reference() {
        let child = Grain::new("child", "1").table(
            Table::new("c", vec![Column::new("acc", ColumnType::Integer)])
                .foreign_key(ForeignKey::new(&["acc"], "account").in_grain("bank")),
        );
        let parent = Grain::new("bank", "1").table(accounts());
        let score = Score::new(vec![child, parent]).unwrap();
        let names: Vec<&str> = score.grains().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["bank", "child"]);
    }

    #[test]
    fn detects_grain_cycles() {
        let a = Grain::new("a", "1").table(
            Table::new("t", vec![Column::new("x", ColumnType::Integer).not_null()])
                .primary_key(&["x"])
                .foreign_key(ForeignKey::new(&["x"], "t").in_grain("b")),
        );
        let b = Grain::new("b", "1").table(
            Table::new("t", vec![Column::new("x", ColumnType::Integer).not_null()])
                .primary_key(&["x"])
                .foreign_key(ForeignKey::new(&["x"], "t").in_grain("a")),
        );
        assert!(matches!(
            Score::new(vec![a, b]),
            Err(ModelError::CyclicGrains(_))
        ));
    }

    #[test]
    fn aggregate_without_group_by_is_rejected() {
        let view = View::new("totals", "entry", "e")
            .column("account_id", Expr::qualified("e", "account_id"))
            .column("total", Expr::sum(Expr::qualified("e", "amount")));
        let err = Score::new(vec![Grain::new("bank", "1")
            .table(accounts())
            .table(ledger())
            .view(view.clone())])
        .unwrap_err();
        assert_eq!(
            err,
            ModelError::UngroupedColumn {
                view: "totals".to_string(),
                alias: "account_id".to_string()
            }
        );

        let fixed = view.group_by("account_id");
        let score = Score::new(vec![Grain::new("bank", "1")
            .table(accounts())
            .table(ledger())
            .view(fixed)])
        .unwrap();
        let view = score.grain("bank").unwrap().find_view("totals").unwrap();
        assert_eq!(view.output_columns().len(), 2);
        assert_eq!(view.output_columns()[1].column_type, ColumnType::Integer);
    }

    #[test]
    fn all_aggregate_view_needs_no_group_by() {
        let view = View::new("n", "account", "a").column("cnt", Expr::count());
        assert!(Score::new(vec![Grain::new("bank", "1").table(accounts()).view(view)]).is_ok());
    }

    #[test]
    fn duplicate_aliases_are_rejected() {
        let view = View::new("v", "account", "a")
            .column("x", Expr::qualified("a", "id"))
            .column("x", Expr::qualified("a", "owner"));
        let err = Score::new(vec![Grain::new("bank", "1").table(accounts()).view(view)])
            .unwrap_err();
        assert!(matches!(err, ModelError::Duplicate { what: "column alias", .. }));

        let view = View::new("v", "account", "a")
            .join(JoinKind::Inner, "account", "a", Expr::lit(true))
            .column("x", Expr::qualified("a", "id"));
        let err = Score::new(vec![Grain::new("bank", "1").table(accounts()).view(view)])
            .unwrap_err();
        assert!(matches!(err, ModelError::Duplicate { what: "table alias", .. }));
    }

    #[test]
    fn unresolved_and_ambiguous_fields_are_rejected() {
        let view = View::new("v", "account", "a").column("x", Expr::qualified("a", "nope"));
        assert!(matches!(
            Score::new(vec![Grain::new("bank", "1").table(accounts()).view(view)]),
            Err(ModelError::UnknownColumn { .. })
        ));

        let view = View::new("v", "account", "a")
            .join(
                JoinKind::Left,
                "account",
                "b",
                Expr::qualified("a", "id").eq(Expr::qualified("b", "id")),
            )
            .column("x", Expr::field("owner"));
        assert!(matches!(
            Score::new(vec![Grain::new("bank", "1").table(accounts()).view(view)]),
            Err(ModelError::AmbiguousColumn { .. })
        ));
    }

    #[test]
    fn where_must_be_boolean() {
        let view = View::new("v", "account", "a")
            .column("x", Expr::qualified("a", "id"))
            .filter(Expr::qualified("a", "id"));
        assert!(matches!(
            Score::new(vec![Grain::new("bank", "1").table(accounts()).view(view)]),
            Err(ModelError::NonBooleanCondition { .. })
        ));
    }

    #[test]
    fn materialized_view_shape_is_checked() {
        let good = View::new("per_account", "entry", "e")
            .kind(ViewKind::MaterializedView)
            .column("account_id", Expr::qualified("e", "account_id"))
            .column("total", Expr::sum(Expr::qualified("e", "amount")))
            .column("n", Expr::count())
            .group_by("account_id");
        let score = Score::new(vec![Grain::new("bank", "1")
            .table(accounts())
            .table(ledger())
            .view(good)])
        .unwrap();
        let element = score.element("bank", "per_account").unwrap();
        assert!(matches!(element, TableElement::MaterializedView(_)));
        assert_eq!(element.primary_key(), &["account_id".to_string()]);
        assert!(element.is_read_only());

        let bad = View::new("per_owner", "account", "a")
            .kind(ViewKind::MaterializedView)
            .column("owner", Expr::qualified("a", "owner"))
            .column("m", Expr::aggregate(crate::expr::AggregateFunc::Max, Expr::qualified("a", "id")))
            .group_by("owner");
        assert!(matches!(
            Score::new(vec![Grain::new("bank", "1").table(accounts()).view(bad)]),
            Err(ModelError::InvalidView { .. })
        ));
    }

    #[test]
    fn params_only_on_parameterized_views() {
        let view = View::new("v", "account", "a")
            .param("min", ColumnType::Integer)
            .column("x", Expr::qualified("a", "id"))
            .filter(Expr::qualified("a", "id").ge(Expr::param("min")));
        assert!(Score::new(vec![Grain::new("bank", "1").table(accounts()).view(view.clone())])
            .is_err());
        let view = view.kind(ViewKind::ParameterizedView);
        let score = Score::new(vec![Grain::new("bank", "1").table(accounts()).view(view)]).unwrap();
        let element = score.element("bank", "v").unwrap();
        assert_eq!(element.params().len(), 1);
    }

    #[test]
    fn json_round_trip_and_checksum() {
        let score = Score::new(vec![Grain::new("bank", "1").table(accounts())]).unwrap();
        let json = serde_json::to_string(&score).unwrap();
        let again = Score::from_json(&json).unwrap();
        let checksum = score.grains()[0].checksum().unwrap();
        assert_eq!(again.grains()[0].checksum().unwrap(), checksum);
        assert_eq!(checksum.len(), 64);
        assert!(checksum.bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(matches!(Score::from_json("{"), Err(ModelError::Malformed(_))));
    }

    #[test]
    fn elements_expose_capabilities() {
        let score = Score::new(vec![Grain::new("bank", "1")
            .table(accounts())
            .table(ledger().read_only())])
        .unwrap();
        let account = score.element("bank", "account").unwrap();
        assert!(account.is_versioned());
        assert_eq!(account.readable_columns().last().unwrap().name, REVISION_COLUMN);
        let entry = score.element("bank", "entry").unwrap();
        assert!(matches!(entry, TableElement::ReadOnlyTable(_)));
        assert!(!entry.is_versioned());
        assert_eq!(entry.readable_columns().len(), 3);
    }
}
