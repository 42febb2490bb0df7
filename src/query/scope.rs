//! Transaction scope analysis
//!
//! Works out which tables an operation can touch by walking its payload,
//! without reading the store. Names that do not resolve are skipped here and
//! reported when the operation runs.

use crate::schema::{EntityMeta, OnDelete, Schema};
use relql::{Condition, CountSelection, FieldWrite, OrderBy, OrderKind, Query, RelationTarget, Selected, WhereClause, WriteData};
use std::collections::BTreeSet;

/// What an operation does with the matched rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn writes(self) -> bool {
        self != Operation::Read
    }
}

/// Tables needed to run `op` with `query` against `meta`
pub fn needed_tables(schema: &Schema, meta: &EntityMeta, query: &Query, op: Operation) -> BTreeSet<String> {
    let walk = Walk { schema };
    let mut tables = BTreeSet::new();
    walk.query(meta, query, &mut tables);

    match op {
        Operation::Read => {}
        Operation::Create | Operation::Update => {
            for data in query.data.iter().flat_map(|d| d.records()) {
                walk.write_data(meta, data, &mut tables);
            }
        }
        Operation::Delete => {
            let mut visited = BTreeSet::new();
            walk.dependents(meta, &mut tables, &mut visited);
        }
    }
    tables
}

struct Walk<'a> {
    schema: &'a Schema,
}

impl<'a> Walk<'a> {
    fn target(&self, meta: &EntityMeta, name: &str) -> Option<&'a EntityMeta> {
        meta.relation(name).and_then(|r| self.schema.entity(&r.target))
    }

    fn query(&self, meta: &EntityMeta, query: &Query, out: &mut BTreeSet<String>) {
        out.insert(meta.name.clone());
        if let Some(clause) = &query.where_clause {
            self.where_clause(meta, clause, out);
        }
        self.order_by(meta, &query.order_by, out);

        for (name, selected) in query.projections() {
            if !selected.is_enabled() {
                continue;
            }
            match selected {
                Selected::Count(CountSelection::All) => {
                    for relation in meta.relations.iter().filter(|r| r.is_to_many()) {
                        out.insert(relation.target.clone());
                    }
                }
                Selected::Count(CountSelection::Relations(list)) => {
                    for (relation, filter) in list {
                        if let Some(target) = self.target(meta, relation) {
                            out.insert(target.name.clone());
                            if let Some(clause) = filter {
                                self.where_clause(target, clause, out);
                            }
                        }
                    }
                }
                Selected::Flag(_) | Selected::Nested(_) => {
                    let Some(target) = self.target(meta, name) else { continue };
                    match selected.query() {
                        Some(nested) => self.query(target, nested, out),
                        None => {
                            out.insert(target.name.clone());
                        }
                    }
                }
            }
        }
    }

    fn where_clause(&self, meta: &EntityMeta, clause: &WhereClause, out: &mut BTreeSet<String>) {
        for cond in &clause.fields {
            let Some(target) = self.target(meta, &cond.field) else {
                // Compound unique selectors nest the entity's own fields.
                if let Condition::Where(inner) = &cond.condition {
                    self.where_clause(meta, inner, out);
                }
                continue;
            };
            out.insert(target.name.clone());
            match &cond.condition {
                Condition::Where(inner) => self.where_clause(target, inner, out),
                Condition::Relation(filter) => {
                    let targets = [&filter.is, &filter.is_not];
                    for clause in targets.into_iter().flatten() {
                        if let RelationTarget::Where(inner) = clause {
                            self.where_clause(target, inner, out);
                        }
                    }
                    for inner in [&filter.every, &filter.some, &filter.none].into_iter().flatten() {
                        self.where_clause(target, inner, out);
                    }
                }
                Condition::Null | Condition::Equals(_) | Condition::Scalar(_) => {}
            }
        }
        for child in clause.children() {
            self.where_clause(meta, child, out);
        }
    }

    fn order_by(&self, meta: &EntityMeta, clauses: &[OrderBy], out: &mut BTreeSet<String>) {
        for clause in clauses {
            if matches!(clause.kind, OrderKind::Scalar { .. }) {
                continue;
            }
            let Some(target) = self.target(meta, &clause.field) else { continue };
            out.insert(target.name.clone());
            if let OrderKind::Relation(inner) = &clause.kind {
                self.order_by(target, inner, out);
            }
        }
    }

    fn write_data(&self, meta: &EntityMeta, data: &WriteData, out: &mut BTreeSet<String>) {
        for (name, write) in &data.fields {
            match write {
                FieldWrite::Relation(nested) => {
                    let Some(target) = self.target(meta, name) else { continue };
                    out.insert(target.name.clone());
                    for child in &nested.create {
                        self.write_data(target, child, out);
                    }
                    for child in nested.create_many.iter().flat_map(|m| &m.data) {
                        self.write_data(target, child, out);
                    }
                    for selector in &nested.connect {
                        self.where_clause(target, selector, out);
                    }
                    if let Some(relql::Disconnect::Records(selectors)) = &nested.disconnect {
                        for selector in selectors {
                            self.where_clause(target, selector, out);
                        }
                    }
                }
                // A raw foreign key is checked against the referenced table.
                FieldWrite::Value(_) | FieldWrite::Op(_) => {
                    for relation in meta.relations.iter().filter(|r| r.is_owning() && r.local.contains(name)) {
                        out.insert(relation.target.clone());
                    }
                }
            }
        }
    }

    fn dependents(&self, meta: &EntityMeta, out: &mut BTreeSet<String>, visited: &mut BTreeSet<String>) {
        if !visited.insert(meta.name.clone()) {
            return;
        }
        for dep in &meta.dependents {
            match dep.on_delete {
                OnDelete::NoAction => {}
                OnDelete::SetNull | OnDelete::Restrict => {
                    out.insert(dep.entity.clone());
                }
                OnDelete::Cascade => {
                    out.insert(dep.entity.clone());
                    if let Some(child) = self.schema.entity(&dep.entity) {
                        self.dependents(child, out, visited);
                    }
                }
            }
        }
    }
}
