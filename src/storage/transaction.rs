//! Scoped transactions
//!
//! A transaction holds a reader or writer lock on every table in its scope for
//! its whole lifetime. Locks are taken in table-name order when the
//! transaction is opened, which is the only point where it can wait. After
//! that, reads and writes run synchronously against the held locks.
//!
//! Writes go straight into the tables and are recorded in an undo log.
//! `abort` (or dropping an uncommitted transaction) replays the log backwards;
//! `commit` discards it and, for directory-backed stores, flushes the changed
//! tables to disk.

use super::disk::Disk;
use super::table::Table;
use super::value::{Fields, Key};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{debug, warn};

/// Transaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

pub(crate) enum TableGuard {
    Read(OwnedRwLockReadGuard<Table>),
    Write(OwnedRwLockWriteGuard<Table>),
}

impl TableGuard {
    fn table(&self) -> &Table {
        match self {
            TableGuard::Read(guard) => &**guard,
            TableGuard::Write(guard) => &**guard,
        }
    }

    fn table_mut(&mut self) -> Option<&mut Table> {
        match self {
            TableGuard::Read(_) => None,
            TableGuard::Write(guard) => Some(&mut **guard),
        }
    }
}

/// Previous state of one row
struct Undo {
    table: String,
    key: Key,
    previous: Option<Fields>,
}

#[derive(Default)]
struct TxState {
    active: bool,
    guards: BTreeMap<String, TableGuard>,
    undo: Vec<Undo>,
    dirty: BTreeSet<String>,
}

impl TxState {
    fn rollback(&mut self) -> usize {
        let count = self.undo.len();
        while let Some(undo) = self.undo.pop() {
            if let Some(table) = self.guards.get_mut(&undo.table).and_then(TableGuard::table_mut) {
                table.restore(&undo.key, undo.previous);
            }
        }
        count
    }
}

/// An open transaction over a fixed set of tables
pub struct Transaction {
    id: u64,
    mode: TxMode,
    scope: BTreeSet<String>,
    state: Mutex<TxState>,
    disk: Option<Arc<AsyncMutex<Disk>>>,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        mode: TxMode,
        guards: BTreeMap<String, TableGuard>,
        disk: Option<Arc<AsyncMutex<Disk>>>,
    ) -> Self {
        let scope = guards.keys().cloned().collect();
        Self {
            id,
            mode,
            scope,
            state: Mutex::new(TxState {
                active: true,
                guards,
                ..TxState::default()
            }),
            disk,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Tables this transaction may touch
    pub fn scope(&self) -> &BTreeSet<String> {
        &self.scope
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    fn lock(&self) -> MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<R>(&self, table: &str, f: impl FnOnce(&Table) -> Result<R>) -> Result<R> {
        let state = self.lock();
        if !state.active {
            return Err(Error::TransactionInactive);
        }
        let guard = state.guards.get(table).ok_or_else(|| Error::TableNotInScope {
            table: table.to_string(),
        })?;
        f(guard.table())
    }

    fn write<R>(&self, table: &str, f: impl FnOnce(&mut Table) -> Result<(R, Option<Undo>)>) -> Result<R> {
        let mut state = self.lock();
        if !state.active {
            return Err(Error::TransactionInactive);
        }
        let guard = state.guards.get_mut(table).ok_or_else(|| Error::TableNotInScope {
            table: table.to_string(),
        })?;
        let target = guard.table_mut().ok_or_else(|| Error::ReadOnlyTransaction {
            table: table.to_string(),
        })?;
        let (result, undo) = f(target)?;
        if let Some(undo) = undo {
            state.undo.push(undo);
            state.dirty.insert(table.to_string());
        }
        Ok(result)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, table: &str, key: &Key) -> Result<Option<Fields>> {
        self.read(table, |t| Ok(t.get(key).cloned()))
    }

    /// Every row of a table, in primary-key order
    pub fn get_all(&self, table: &str) -> Result<Vec<Fields>> {
        self.read(table, |t| Ok(t.rows().cloned().collect()))
    }

    pub fn last_key(&self, table: &str) -> Result<Option<Key>> {
        self.read(table, |t| Ok(t.last_key().cloned()))
    }

    pub fn len(&self, table: &str) -> Result<usize> {
        self.read(table, |t| Ok(t.len()))
    }

    /// Rows whose `index` value equals `key`
    pub fn index_get_all(&self, table: &str, index: &str, key: &Key) -> Result<Vec<Fields>> {
        self.read(table, |t| Ok(t.index_lookup(index, key)?.into_iter().cloned().collect()))
    }

    /// Name of an index over exactly `fields`
    pub fn index_for(&self, table: &str, fields: &[String]) -> Result<Option<String>> {
        self.read(table, |t| Ok(t.index_for(fields).map(str::to_string)))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a new row
    pub fn add(&self, table: &str, row: Fields) -> Result<Key> {
        self.write(table, |t| {
            let key = t.add(row)?;
            let undo = Undo {
                table: t.name().to_string(),
                key: key.clone(),
                previous: None,
            };
            Ok((key, Some(undo)))
        })
    }

    /// Insert or replace a row
    pub fn put(&self, table: &str, row: Fields) -> Result<Key> {
        self.write(table, |t| {
            let previous = t.get(&t.key_of(&row)).cloned();
            let key = t.put(row)?;
            let undo = Undo {
                table: t.name().to_string(),
                key: key.clone(),
                previous,
            };
            Ok((key, Some(undo)))
        })
    }

    /// Remove a row, returning it if it existed
    pub fn delete(&self, table: &str, key: &Key) -> Result<Option<Fields>> {
        self.write(table, |t| {
            let removed = t.delete(key);
            let undo = removed.clone().map(|previous| Undo {
                table: t.name().to_string(),
                key: key.clone(),
                previous: Some(previous),
            });
            Ok((removed, undo))
        })
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Roll back every write and release the locks. Later use fails with
    /// [`Error::TransactionInactive`]. Aborting twice is a no-op.
    pub fn abort(&self) {
        let mut state = self.lock();
        if !state.active {
            return;
        }
        let undone = state.rollback();
        state.active = false;
        state.guards.clear();
        state.dirty.clear();
        debug!(tx = self.id, undone, "Transaction aborted");
    }

    /// Make every write permanent and release the locks
    pub async fn commit(self) -> Result<()> {
        let mut state = std::mem::take(&mut *self.lock());
        if !state.active {
            return Err(Error::TransactionInactive);
        }

        if let (Some(disk), false) = (&self.disk, state.dirty.is_empty()) {
            let mut published = Vec::new();
            if let Err(err) = Self::flush(self.id, disk, &state, &mut published).await {
                let undone = state.rollback();
                warn!(tx = self.id, undone, error = %err, "Commit failed, transaction rolled back");
                Self::restore_files(self.id, disk, &state, &published).await;
                return Err(err);
            }
        }

        debug!(
            tx = self.id,
            writes = state.undo.len(),
            tables = ?state.dirty,
            "Transaction committed"
        );
        Ok(())
    }

    /// Stage every dirty table, then publish them all and commit to git.
    /// Tables already renamed into place are recorded in `published`.
    async fn flush(id: u64, disk: &AsyncMutex<Disk>, state: &TxState, published: &mut Vec<String>) -> Result<()> {
        let disk = disk.lock().await;
        let mut staged: Vec<String> = Vec::new();
        for name in &state.dirty {
            let Some(guard) = state.guards.get(name) else { continue };
            let rows: Vec<Fields> = guard.table().rows().cloned().collect();
            if let Err(err) = disk.stage_table(name, &rows).await {
                disk.discard_staged(name).await;
                for done in &staged {
                    disk.discard_staged(done).await;
                }
                return Err(err);
            }
            staged.push(name.clone());
        }

        for name in staged {
            disk.publish_table(&name).await?;
            published.push(name);
        }
        let tables: Vec<&str> = state.dirty.iter().map(String::as_str).collect();
        disk.commit(&format!("Transaction {}: write {}", id, tables.join(", ")))
    }

    /// Rewrite tables that reached disk before a failed commit from their
    /// rolled-back contents
    async fn restore_files(id: u64, disk: &AsyncMutex<Disk>, state: &TxState, published: &[String]) {
        let disk = disk.lock().await;
        for name in published {
            let Some(guard) = state.guards.get(name) else { continue };
            let rows: Vec<Fields> = guard.table().rows().cloned().collect();
            if let Err(err) = disk.write_table(name, &rows).await {
                warn!(tx = id, table = %name, error = %err, "Could not restore table file after failed commit");
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.active && !state.undo.is_empty() {
            let undone = state.rollback();
            warn!(tx = self.id, undone, "Transaction dropped without commit, rolled back");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("scope", &self.scope)
            .finish()
    }
}
