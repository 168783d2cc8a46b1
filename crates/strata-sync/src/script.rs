//! Full create scripts for any dialect.
//!
//! Unlike the synchronizer this never looks at a database: it assumes an
//! empty one and asks the generator for every object of every grain.

use strata_core::{DbTableInfo, DdlGenerator, DdlPlan, Score, ViewKind};

/// Renders the statements creating `score` from scratch.
///
/// Operations the dialect cannot express become `-- unsupported:` comment
/// lines so the script stays complete and readable.
#[must_use]
pub fn create_script(score: &Score, generator: &dyn DdlGenerator) -> Vec<String> {
    let mut script = Vec::new();
    let mut push = |element: String, plan: DdlPlan| match plan {
        DdlPlan::Statements(statements) => script.extend(statements),
        DdlPlan::NoOp => {}
        DdlPlan::Unsupported { operation } => {
            script.push(format!("-- unsupported: {operation} {element}"));
        }
    };
    let constraints = generator.capabilities().alter_constraints;

    for grain in score.grains() {
        let qualified = |name: &str| format!("{}.{name}", grain.name);
        push(grain.name.clone(), generator.create_schema(grain));

        let tables = grain.tables_in_dependency_order();
        for table in &tables {
            push(qualified(&table.name), generator.create_table(table));
        }
        if constraints {
            for table in &tables {
                let created = DbTableInfo {
                    name: table.name.clone(),
                    ..DbTableInfo::default()
                };
                for fk in &table.foreign_keys {
                    push(
                        qualified(&table.name),
                        generator.create_foreign_key(table, fk, &created),
                    );
                }
            }
        }
        for table in &tables {
            for index in &table.indices {
                push(qualified(&index.name), generator.create_index(table, index));
            }
        }
        for table in &tables {
            push(
                qualified(&table.name),
                generator.update_versioning_trigger(table, false),
            );
        }
        for view in grain.views_of(ViewKind::View) {
            push(qualified(&view.name), generator.create_view(view));
        }
        for view in grain.views_of(ViewKind::ParameterizedView) {
            push(qualified(&view.name), generator.create_parameterized_view(view));
        }
        for view in grain.views_of(ViewKind::MaterializedView) {
            let source = view.source().and_then(|r| {
                score
                    .grain(view.ref_grain(r))
                    .and_then(|g| g.find_table(&r.table))
            });
            if let Some(source) = source {
                push(
                    qualified(&view.name),
                    generator.create_materialized_view(view, source),
                );
                push(
                    qualified(&view.name),
                    generator.create_materialized_view_triggers(view, source),
                );
            }
        }
    }
    script
}
