//! Table - the rows of one entity, keyed by its primary-key path
//!
//! Tables are the store's only collection type. Each keeps its rows ordered by
//! primary key and maintains any declared secondary indexes on every write.
//! Index entries are skipped for rows whose indexed fields contain a null, so
//! unique indexes only constrain rows that actually carry a value.

use super::value::{Fields, Key};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Declared shape of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    /// Fields forming the primary key, in order
    pub key_path: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

/// Declared secondary index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone)]
struct Index {
    def: IndexDef,
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl Index {
    fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
        }
    }

    fn key_for(&self, row: &Fields) -> Option<Key> {
        let key = Key::from_fields(&self.def.fields, row);
        (!key.has_null()).then_some(key)
    }
}

/// A table of rows
#[derive(Debug, Clone)]
pub struct Table {
    def: TableDef,
    rows: BTreeMap<Key, Fields>,
    indexes: Vec<Index>,
}

impl Table {
    pub fn new(def: TableDef) -> Self {
        let indexes = def.indexes.iter().cloned().map(Index::new).collect();
        Self {
            def,
            rows: BTreeMap::new(),
            indexes,
        }
    }

    /// Rebuild a table from persisted rows
    pub fn with_rows(def: TableDef, rows: Vec<Fields>) -> Result<Self> {
        let mut table = Self::new(def);
        for row in rows {
            table.add(row)?;
        }
        Ok(table)
    }

    pub fn def(&self) -> &TableDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn key_of(&self, row: &Fields) -> Key {
        Key::from_fields(&self.def.key_path, row)
    }

    pub fn get(&self, key: &Key) -> Option<&Fields> {
        self.rows.get(key)
    }

    /// All rows in ascending key order
    pub fn rows(&self) -> impl Iterator<Item = &Fields> {
        self.rows.values()
    }

    /// Highest key, as seen by a key-descending cursor
    pub fn last_key(&self) -> Option<&Key> {
        self.rows.keys().next_back()
    }

    /// Name of an index covering exactly `fields`, if one exists
    pub fn index_for(&self, fields: &[String]) -> Option<&str> {
        self.indexes
            .iter()
            .find(|idx| idx.def.fields == fields)
            .map(|idx| idx.def.name.as_str())
    }

    /// Rows whose index value equals `key`, in primary-key order
    pub fn index_lookup(&self, index: &str, key: &Key) -> Result<Vec<&Fields>> {
        let idx = self
            .indexes
            .iter()
            .find(|idx| idx.def.name == index)
            .ok_or_else(|| Error::IndexNotFound {
                table: self.def.name.clone(),
                index: index.to_string(),
            })?;
        Ok(idx
            .entries
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|pk| self.rows.get(pk))
            .collect())
    }

    /// Insert a new row; fails if the key or a unique index value is taken
    pub fn add(&mut self, row: Fields) -> Result<Key> {
        let key = self.require_key(&row)?;
        if self.rows.contains_key(&key) {
            return Err(Error::UniqueViolation {
                entity: self.def.name.clone(),
                fields: self.def.key_path.clone(),
            });
        }
        self.check_unique(&key, &row)?;
        self.index_row(&key, &row);
        self.rows.insert(key.clone(), row);
        Ok(key)
    }

    /// Insert or replace a row
    pub fn put(&mut self, row: Fields) -> Result<Key> {
        let key = self.require_key(&row)?;
        self.check_unique(&key, &row)?;
        if let Some(old) = self.rows.remove(&key) {
            self.unindex_row(&key, &old);
        }
        self.index_row(&key, &row);
        self.rows.insert(key.clone(), row);
        Ok(key)
    }

    /// Remove a row, returning it if it existed
    pub fn delete(&mut self, key: &Key) -> Option<Fields> {
        let old = self.rows.remove(key)?;
        self.unindex_row(key, &old);
        Some(old)
    }

    /// Put back a previous state of `key` without constraint checks
    pub(crate) fn restore(&mut self, key: &Key, previous: Option<Fields>) {
        if let Some(old) = self.rows.remove(key) {
            self.unindex_row(key, &old);
        }
        if let Some(row) = previous {
            self.index_row(key, &row);
            self.rows.insert(key.clone(), row);
        }
    }

    fn require_key(&self, row: &Fields) -> Result<Key> {
        let key = self.key_of(row);
        if key.has_null() {
            return Err(Error::InvalidValue {
                entity: self.def.name.clone(),
                field: self.def.key_path.join(","),
                reason: "primary key cannot be null".to_string(),
            });
        }
        Ok(key)
    }

    fn check_unique(&self, key: &Key, row: &Fields) -> Result<()> {
        for idx in self.indexes.iter().filter(|idx| idx.def.unique) {
            let Some(value) = idx.key_for(row) else { continue };
            let taken = idx
                .entries
                .get(&value)
                .is_some_and(|owners| owners.iter().any(|owner| owner != key));
            if taken {
                return Err(Error::UniqueViolation {
                    entity: self.def.name.clone(),
                    fields: idx.def.fields.clone(),
                });
            }
        }
        Ok(())
    }

    fn index_row(&mut self, key: &Key, row: &Fields) {
        for idx in &mut self.indexes {
            if let Some(value) = idx.key_for(row) {
                idx.entries.entry(value).or_default().insert(key.clone());
            }
        }
    }

    fn unindex_row(&mut self, key: &Key, row: &Fields) {
        for idx in &mut self.indexes {
            if let Some(value) = idx.key_for(row) {
                if let Some(owners) = idx.entries.get_mut(&value) {
                    owners.remove(key);
                    if owners.is_empty() {
                        idx.entries.remove(&value);
                    }
                }
            }
        }
    }
}
