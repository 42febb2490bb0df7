//! Store - named tables plus their transactions
//!
//! A store is opened once per client. Opening runs the upgrade callback when
//! the requested version is newer than the one on disk (always, for a fresh or
//! in-memory store); the callback declares tables and indexes.

use super::disk::{Disk, StoreMeta};
use super::table::{IndexDef, Table, TableDef};
use super::transaction::{TableGuard, Transaction, TxMode};
use crate::config::{ClientConfig, StorageConfig};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Table declarations made while a store is being upgraded
#[derive(Debug, Default)]
pub struct Upgrade {
    tables: BTreeMap<String, Table>,
    changed: bool,
}

impl Upgrade {
    /// Declare a table. Redeclaring an existing table with a different
    /// definition re-indexes its rows under the new one.
    pub fn create_table(&mut self, def: TableDef) -> Result<()> {
        crate::validation::validate_entity_name(&def.name)?;
        match self.tables.remove(&def.name) {
            Some(existing) if existing.def() == &def => {
                self.tables.insert(def.name.clone(), existing);
            }
            Some(existing) => {
                let rows = existing.rows().cloned().collect();
                self.tables.insert(def.name.clone(), Table::with_rows(def, rows)?);
                self.changed = true;
            }
            None => {
                self.tables.insert(def.name.clone(), Table::new(def));
                self.changed = true;
            }
        }
        Ok(())
    }

    /// Add a secondary index to a declared table
    pub fn create_index(&mut self, table: &str, index: IndexDef) -> Result<()> {
        let existing = self.tables.get(table).ok_or_else(|| Error::TableNotFound {
            name: table.to_string(),
        })?;
        if existing.def().indexes.iter().any(|idx| idx.name == index.name) {
            return Ok(());
        }
        let mut def = existing.def().clone();
        def.indexes.push(index);
        self.create_table(def)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

/// A transactional key-value table store
pub struct Store {
    name: String,
    version: u32,
    tables: BTreeMap<String, Arc<RwLock<Table>>>,
    disk: Option<Arc<Mutex<Disk>>>,
    next_tx: AtomicU64,
}

impl Store {
    /// Open the store described by `config`, running `upgrade` with the
    /// previously stored version if `config.version` is newer
    pub async fn open<F>(config: &ClientConfig, upgrade: F) -> Result<Self>
    where
        F: FnOnce(&mut Upgrade, u32) -> Result<()>,
    {
        crate::validation::validate_entity_name(&config.name)?;

        let (tables, disk) = match &config.storage {
            StorageConfig::Memory => {
                let mut up = Upgrade::default();
                upgrade(&mut up, 0)?;
                (up.tables, None)
            }
            StorageConfig::Directory { path, git } => {
                let disk = Disk::open(path, *git, config.author.clone())?;
                let tables = Self::open_directory(&disk, config, upgrade).await?;
                (tables, Some(Arc::new(Mutex::new(disk))))
            }
        };

        debug!(store = %config.name, tables = tables.len(), "Store opened");
        Ok(Self {
            name: config.name.clone(),
            version: config.version,
            tables: tables
                .into_iter()
                .map(|(name, table)| (name, Arc::new(RwLock::new(table))))
                .collect(),
            disk,
            next_tx: AtomicU64::new(1),
        })
    }

    async fn open_directory<F>(disk: &Disk, config: &ClientConfig, upgrade: F) -> Result<BTreeMap<String, Table>>
    where
        F: FnOnce(&mut Upgrade, u32) -> Result<()>,
    {
        let meta = disk.read_meta().await?;
        let old_version = meta.as_ref().map(|m| m.version).unwrap_or(0);
        let tables = match &meta {
            Some(meta) => disk.load_tables(meta).await?,
            None => BTreeMap::new(),
        };

        if old_version > config.version {
            return Err(Error::Storage(anyhow::anyhow!(
                "store '{}' is at version {}, newer than requested version {}",
                config.name,
                old_version,
                config.version
            )));
        }
        if meta.is_some() && old_version == config.version {
            return Ok(tables);
        }

        let mut up = Upgrade {
            tables,
            changed: false,
        };
        upgrade(&mut up, old_version)?;

        let meta = StoreMeta {
            name: config.name.clone(),
            version: config.version,
            tables: up.tables.values().map(|t| t.def().clone()).collect(),
        };
        disk.write_meta(&meta).await?;
        if up.changed {
            for table in up.tables.values() {
                let rows: Vec<_> = table.rows().cloned().collect();
                disk.write_table(table.name(), &rows).await?;
            }
        }
        disk.commit(&format!("Upgrade store '{}' to version {}", config.name, config.version))?;
        info!(store = %config.name, from = old_version, to = config.version, "Store upgraded");

        Ok(up.tables)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Open a transaction over `tables`. Waits until every lock is available;
    /// locks are taken in name order.
    pub async fn transaction<I, S>(&self, tables: I, mode: TxMode) -> Result<Transaction>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = tables.into_iter().map(Into::into).collect();
        let mut guards = BTreeMap::new();

        for name in names {
            let lock = self
                .tables
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::TableNotFound { name: name.clone() })?;
            let guard = match mode {
                TxMode::ReadOnly => TableGuard::Read(lock.read_owned().await),
                TxMode::ReadWrite => TableGuard::Write(lock.write_owned().await),
            };
            guards.insert(name, guard);
        }

        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        debug!(tx = id, ?mode, tables = ?guards.keys().collect::<Vec<_>>(), "Transaction opened");
        Ok(Transaction::new(id, mode, guards, self.disk.clone()))
    }
}
