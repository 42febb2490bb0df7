//! Query engine for relkv
//!
//! Runs RelQL payloads against the table store. Every piece below works
//! inside one open transaction and is synchronous: the only suspension
//! points (opening and committing the transaction) live in [`engine`].
//!
//! - [`filter`] - where trees, including relation quantifiers
//! - [`order`] - orderBy, including relation-derived keys
//! - [`relations`] - FK-scoped sub-queries, select/include, `_count`
//! - [`scope`] - which tables an operation needs
//! - [`defaults`] - coercion and create-time defaults
//! - [`write`] - nested create/connect, patches, referential actions

pub mod defaults;
pub mod engine;
pub mod filter;
pub mod order;
pub mod relations;
pub mod scope;
pub mod write;

pub use engine::{CountResult, Engine};

use crate::notify::{ChangeEvent, EventKind};
use crate::schema::{index_name, EntityMeta, Schema};
use crate::storage::{Fields, Key, Transaction, Value};
use crate::{Client, Error, Result};
use relql::{Condition, Query, WhereClause};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// State shared by the steps of one operation
pub(crate) struct Ctx<'a> {
    pub client: &'a Client,
    pub tx: &'a Transaction,
    events: RefCell<Vec<ChangeEvent>>,
    /// Rows with a delete in progress, to stop cascade cycles
    deleting: RefCell<BTreeSet<(String, Key)>>,
}

impl<'a> Ctx<'a> {
    pub fn new(client: &'a Client, tx: &'a Transaction) -> Self {
        Self {
            client,
            tx,
            events: RefCell::new(Vec::new()),
            deleting: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn schema(&self) -> &'a Schema {
        self.client.schema()
    }

    pub fn entity(&self, name: &str) -> Result<&'a EntityMeta> {
        self.client.schema().require(name)
    }

    pub fn record_event(&self, entity: &str, kind: EventKind, key: Key) {
        self.events.borrow_mut().push(ChangeEvent {
            entity: entity.to_string(),
            kind,
            key,
        });
    }

    pub fn into_events(self) -> Vec<ChangeEvent> {
        self.events.into_inner()
    }

    /// Mark a row as being deleted; false if it already was
    pub fn begin_delete(&self, entity: &str, key: &Key) -> bool {
        self.deleting.borrow_mut().insert((entity.to_string(), key.clone()))
    }
}

/// Filter, order, de-duplicate and paginate rows, in that order
pub(crate) fn read_rows(ctx: &Ctx, meta: &EntityMeta, rows: Vec<Fields>, query: &Query) -> Result<Vec<Fields>> {
    let mut rows = match &query.where_clause {
        Some(clause) => filter::evaluate(ctx, meta, rows, clause)?,
        None => rows,
    };
    order::sort(ctx, meta, &mut rows, &query.order_by)?;

    if !query.distinct.is_empty() {
        for field in &query.distinct {
            meta.require_field(field)?;
        }
        let mut seen = BTreeSet::new();
        rows.retain(|row| seen.insert(Key::from_fields(&query.distinct, row)));
    }

    let skip = query.skip.unwrap_or(0);
    let take = query.take.unwrap_or(usize::MAX);
    Ok(rows.into_iter().skip(skip).take(take).collect())
}

/// Top-level equalities of a selector, with compound names expanded
fn equalities(meta: &EntityMeta, selector: &WhereClause) -> Result<BTreeMap<String, Value>> {
    let mut found = BTreeMap::new();
    for cond in &selector.fields {
        let literal = match &cond.condition {
            Condition::Equals(lit) => lit,
            Condition::Scalar(filter) => match &filter.equals {
                Some(lit) if filter.mode == relql::QueryMode::Default => lit,
                _ => continue,
            },
            Condition::Where(inner) if meta.compound(&cond.field).is_some() => {
                found.extend(equalities(meta, inner)?);
                continue;
            }
            _ => continue,
        };
        if let Some(field) = meta.field(&cond.field) {
            if !field.list {
                found.insert(cond.field.clone(), defaults::coerce(meta, field, literal)?);
            }
        }
    }
    Ok(found)
}

/// The row matching a unique selector
///
/// The selector must pin the primary key or a unique group with equalities;
/// the row is looked up through the key or the group's index, then checked
/// against the remaining conditions.
pub(crate) fn find_unique_row(ctx: &Ctx, meta: &EntityMeta, selector: &WhereClause) -> Result<Option<Fields>> {
    let eq = equalities(meta, selector)?;
    let Some(group) = meta
        .unique_selectors()
        .find(|group| group.iter().all(|f| eq.get(f).is_some_and(|v| !v.is_null())))
    else {
        return Err(Error::invalid_query(format!(
            "a unique selector on '{}' must give the id or a unique field",
            meta.name
        )));
    };

    let key = Key(group.iter().filter_map(|f| eq.get(f).cloned()).collect());
    let candidates = if group == meta.id_fields.as_slice() {
        ctx.tx.get(&meta.name, &key)?.into_iter().collect()
    } else {
        ctx.tx.index_get_all(&meta.name, &index_name(group), &key)?
    };

    for row in candidates {
        if filter::matches(ctx, meta, &row, selector)? {
            return Ok(Some(row));
        }
    }
    Ok(None)
}
