//! Per-entity operations
//!
//! An [`Engine`] is a thin handle over one entity's metadata. Every operation
//! either runs inside the caller's transaction or opens its own over exactly
//! the tables the payload needs, commits it, and then notifies subscribers.

use super::relations::attach;
use super::scope::{self, Operation};
use super::{filter, find_unique_row, read_rows, write, Ctx};
use crate::notify::{EventKind, Listener, Notifier, SubscriptionId};
use crate::schema::EntityMeta;
use crate::storage::{Fields, Record, Transaction, TxMode};
use crate::{Client, Error, Result};
use relql::{Query, Selected, WhereClause, WriteData};
use std::collections::BTreeMap;
use tracing::debug;

/// Result of [`Engine::count`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountResult {
    Total(usize),
    /// Per selected field: `_all` counts rows, a field counts non-null values
    Fields(BTreeMap<String, usize>),
}

impl CountResult {
    /// Row count, or the `_all` entry when fields were selected
    pub fn total(&self) -> Option<usize> {
        match self {
            CountResult::Total(n) => Some(*n),
            CountResult::Fields(counts) => counts.get("_all").copied(),
        }
    }

    pub fn field(&self, name: &str) -> Option<usize> {
        match self {
            CountResult::Total(_) => None,
            CountResult::Fields(counts) => counts.get(name).copied(),
        }
    }
}

/// Operations on one entity
#[derive(Clone, Copy)]
pub struct Engine<'a> {
    client: &'a Client,
    meta: &'a EntityMeta,
    notifier: &'a Notifier,
}

impl<'a> Engine<'a> {
    pub(crate) fn new(client: &'a Client, meta: &'a EntityMeta, notifier: &'a Notifier) -> Self {
        Self { client, meta, notifier }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn meta(&self) -> &'a EntityMeta {
        self.meta
    }

    /// Call `listener` after each committed change of the given kinds
    pub fn subscribe(&self, kinds: &[EventKind], listener: Listener) -> SubscriptionId {
        self.notifier.subscribe(kinds, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Run `op` in `tx`, or in a fresh transaction scoped to `query`
    ///
    /// A failing operation aborts the transaction it ran in, supplied or not.
    async fn run<T, F>(&self, query: &Query, kind: Operation, tx: Option<&Transaction>, op: F) -> Result<T>
    where
        F: FnOnce(&Ctx) -> Result<T>,
    {
        if let Some(tx) = tx {
            let ctx = Ctx::new(self.client, tx);
            return match op(&ctx) {
                Ok(value) => {
                    self.client.dispatch(ctx.into_events());
                    Ok(value)
                }
                Err(err) => {
                    tx.abort();
                    Err(err)
                }
            };
        }

        let tables = scope::needed_tables(self.client.schema(), self.meta, query, kind);
        let mode = if kind.writes() { TxMode::ReadWrite } else { TxMode::ReadOnly };
        let tx = self.client.store().transaction(tables, mode).await?;

        let outcome = {
            let ctx = Ctx::new(self.client, &tx);
            op(&ctx).map(|value| (value, ctx.into_events()))
        };
        match outcome {
            Ok((value, events)) => {
                tx.commit().await?;
                self.client.dispatch(events);
                Ok(value)
            }
            Err(err) => {
                debug!(entity = %self.meta.name, error = %err, "Operation failed, aborting");
                tx.abort();
                Err(err)
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Every record matching `where`, ordered, paginated and projected
    pub async fn find_many(&self, query: &Query, tx: Option<&Transaction>) -> Result<Vec<Record>> {
        self.run(query, Operation::Read, tx, |ctx| self.read_many(ctx, query)).await
    }

    pub async fn find_first(&self, query: &Query, tx: Option<&Transaction>) -> Result<Option<Record>> {
        let first = Self::first_only(query);
        self.run(&first, Operation::Read, tx, |ctx| {
            Ok(self.read_many(ctx, &first)?.into_iter().next())
        })
        .await
    }

    pub async fn find_first_or_throw(&self, query: &Query, tx: Option<&Transaction>) -> Result<Record> {
        let first = Self::first_only(query);
        self.run(&first, Operation::Read, tx, |ctx| {
            self.read_many(ctx, &first)?.into_iter().next().ok_or_else(|| self.not_found())
        })
        .await
    }

    /// The record matching a unique selector
    pub async fn find_unique(&self, query: &Query, tx: Option<&Transaction>) -> Result<Option<Record>> {
        self.run(query, Operation::Read, tx, |ctx| self.read_unique(ctx, query)).await
    }

    pub async fn find_unique_or_throw(&self, query: &Query, tx: Option<&Transaction>) -> Result<Record> {
        self.run(query, Operation::Read, tx, |ctx| {
            self.read_unique(ctx, query)?.ok_or_else(|| self.not_found())
        })
        .await
    }

    /// Number of matching records, or per-field counts when `select` is given
    pub async fn count(&self, query: &Query, tx: Option<&Transaction>) -> Result<CountResult> {
        let meta = self.meta;
        self.run(query, Operation::Read, tx, |ctx| {
            let unprojected = Query {
                select: None,
                include: None,
                ..query.clone()
            };
            let rows = read_rows(ctx, meta, ctx.tx.get_all(&meta.name)?, &unprojected)?;

            let Some(select) = &query.select else {
                return Ok(CountResult::Total(rows.len()));
            };
            let mut counts = BTreeMap::new();
            for (name, selected) in &select.entries {
                if !matches!(selected, Selected::Flag(true)) {
                    continue;
                }
                let n = if name == "_all" {
                    rows.len()
                } else {
                    meta.require_field(name)?;
                    rows.iter().filter(|r| r.get(name).is_some_and(|v| !v.is_null())).count()
                };
                counts.insert(name.clone(), n);
            }
            Ok(CountResult::Fields(counts))
        })
        .await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create one record, with nested relation writes
    pub async fn create(&self, query: &Query, tx: Option<&Transaction>) -> Result<Record> {
        let meta = self.meta;
        self.run(query, Operation::Create, tx, |ctx| {
            let data = self.single_data(query)?;
            write::check_supported(ctx, meta, data)?;
            let row = write::create(ctx, meta, data, &Fields::new())?;
            self.project_one(ctx, row, query)
        })
        .await
    }

    /// Create a batch of records; returns how many were stored
    pub async fn create_many(&self, query: &Query, tx: Option<&Transaction>) -> Result<usize> {
        let count = self
            .run(query, Operation::Create, tx, |ctx| Ok(self.insert_batch(ctx, query)?.len()))
            .await?;
        debug!(entity = %self.meta.name, count, "Batch created");
        Ok(count)
    }

    /// Like [`Engine::create_many`], returning the created records
    pub async fn create_many_and_return(&self, query: &Query, tx: Option<&Transaction>) -> Result<Vec<Record>> {
        let meta = self.meta;
        self.run(query, Operation::Create, tx, |ctx| {
            let rows = self.insert_batch(ctx, query)?;
            attach(ctx, meta, rows, query)
        })
        .await
    }

    fn insert_batch(&self, ctx: &Ctx, query: &Query) -> Result<Vec<Fields>> {
        let batch: &[WriteData] = match &query.data {
            Some(data) => data.records(),
            None => return Err(Error::invalid_query("createMany requires 'data'")),
        };
        let mut created = Vec::with_capacity(batch.len());
        for data in batch {
            if write::has_relation_writes(data) {
                return Err(Error::invalid_query("createMany does not accept nested relation writes"));
            }
            match write::create(ctx, self.meta, data, &Fields::new()) {
                Err(Error::UniqueViolation { .. }) if query.skip_duplicates => continue,
                Err(err) => return Err(err),
                Ok(row) => created.push(row),
            }
        }
        Ok(created)
    }

    /// Update the record matching a unique selector
    pub async fn update(&self, query: &Query, tx: Option<&Transaction>) -> Result<Record> {
        let meta = self.meta;
        self.run(query, Operation::Update, tx, |ctx| {
            let selector = self.selector(query)?;
            let data = self.single_data(query)?;
            write::check_supported(ctx, meta, data)?;
            let row = find_unique_row(ctx, meta, selector)?.ok_or_else(|| self.not_found())?;
            let row = write::update(ctx, meta, row, data)?;
            self.project_one(ctx, row, query)
        })
        .await
    }

    /// Apply a scalar patch to every match; returns how many were updated
    pub async fn update_many(&self, query: &Query, tx: Option<&Transaction>) -> Result<usize> {
        let meta = self.meta;
        self.run(query, Operation::Update, tx, |ctx| {
            let data = self.single_data(query)?;
            if write::has_relation_writes(data) {
                return Err(Error::invalid_query("updateMany does not accept nested relation writes"));
            }
            let rows = self.matching(ctx, query.where_clause.as_ref())?;
            for row in &rows {
                write::update(ctx, meta, row.clone(), data)?;
            }
            Ok(rows.len())
        })
        .await
    }

    /// Delete the record matching a unique selector, returning it as it was
    pub async fn delete(&self, query: &Query, tx: Option<&Transaction>) -> Result<Record> {
        let meta = self.meta;
        self.run(query, Operation::Delete, tx, |ctx| {
            let selector = self.selector(query)?;
            let row = find_unique_row(ctx, meta, selector)?.ok_or_else(|| self.not_found())?;
            let record = self.project_one(ctx, row.clone(), query)?;
            write::delete(ctx, meta, &row)?;
            Ok(record)
        })
        .await
    }

    /// Delete every match in scan order; returns how many were deleted
    pub async fn delete_many(&self, query: &Query, tx: Option<&Transaction>) -> Result<usize> {
        let meta = self.meta;
        self.run(query, Operation::Delete, tx, |ctx| {
            let mut deleted = 0;
            for row in self.matching(ctx, query.where_clause.as_ref())? {
                // Skip rows an earlier cascade already removed.
                let Some(current) = ctx.tx.get(&meta.name, &meta.key_of(&row))? else { continue };
                write::delete(ctx, meta, &current)?;
                deleted += 1;
            }
            Ok(deleted)
        })
        .await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn read_many(&self, ctx: &Ctx, query: &Query) -> Result<Vec<Record>> {
        let rows = read_rows(ctx, self.meta, ctx.tx.get_all(&self.meta.name)?, query)?;
        attach(ctx, self.meta, rows, query)
    }

    fn read_unique(&self, ctx: &Ctx, query: &Query) -> Result<Option<Record>> {
        let selector = self.selector(query)?;
        let rows: Vec<Fields> = find_unique_row(ctx, self.meta, selector)?.into_iter().collect();
        Ok(attach(ctx, self.meta, rows, query)?.into_iter().next())
    }

    fn first_only(query: &Query) -> Query {
        Query {
            take: Some(1),
            ..query.clone()
        }
    }

    fn matching(&self, ctx: &Ctx, clause: Option<&WhereClause>) -> Result<Vec<Fields>> {
        let rows = ctx.tx.get_all(&self.meta.name)?;
        match clause {
            Some(clause) => filter::evaluate(ctx, self.meta, rows, clause),
            None => Ok(rows),
        }
    }

    fn project_one(&self, ctx: &Ctx, row: Fields, query: &Query) -> Result<Record> {
        attach(ctx, self.meta, vec![row], query)?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found())
    }

    fn selector<'q>(&self, query: &'q Query) -> Result<&'q WhereClause> {
        query
            .where_clause
            .as_ref()
            .ok_or_else(|| Error::invalid_query(format!("'{}' needs a unique 'where' selector", self.meta.name)))
    }

    fn single_data<'q>(&self, query: &'q Query) -> Result<&'q WriteData> {
        match &query.data {
            Some(relql::Data::One(data)) => Ok(data),
            Some(relql::Data::Many(_)) => Err(Error::invalid_query("expected a single 'data' object")),
            None => Err(Error::invalid_query("missing 'data'")),
        }
    }

    fn not_found(&self) -> Error {
        Error::RecordNotFound {
            entity: self.meta.name.clone(),
        }
    }
}

impl std::fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("entity", &self.meta.name).finish()
    }
}

