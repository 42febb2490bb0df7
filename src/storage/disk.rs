//! Directory backing for a store
//!
//! Directory structure:
//! ```text
//! /<root>/
//!   .relkv/store.yaml      name, version and table definitions
//!   tables/
//!     User.json            one JSON array of rows per table
//!     Post.json
//! ```
//!
//! Files are only written at commit time, for the tables the transaction
//! changed. Every changed table is staged as `<name>.json.tmp` first and the
//! staged files are renamed into place only once all of them were written.
//! With git enabled every commit of the store is also a git commit.

use super::table::{Table, TableDef};
use super::value::Fields;
use crate::config::Author;
use crate::git;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Contents of `.relkv/store.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

pub(crate) struct Disk {
    root: PathBuf,
    git: Option<git::Repository>,
}

impl Disk {
    pub fn open(root: &Path, use_git: bool, author: Author) -> Result<Self> {
        std::fs::create_dir_all(root.join(".relkv"))?;
        std::fs::create_dir_all(root.join("tables"))?;
        let git = if use_git {
            Some(git::Repository::open_or_init(root, author)?)
        } else {
            None
        };
        Ok(Self {
            root: root.to_path_buf(),
            git,
        })
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join(".relkv").join("store.yaml")
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.root.join("tables").join(format!("{}.json", name))
    }

    pub async fn read_meta(&self) -> Result<Option<StoreMeta>> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_yaml::from_str(&content)?))
    }

    pub async fn write_meta(&self, meta: &StoreMeta) -> Result<()> {
        let content = serde_yaml::to_string(meta)?;
        fs::write(self.meta_path(), content).await?;
        Ok(())
    }

    /// Load every table declared in `meta`. Tables without a file start empty;
    /// files without a declaration are ignored.
    pub async fn load_tables(&self, meta: &StoreMeta) -> Result<BTreeMap<String, Table>> {
        let mut defs: BTreeMap<&str, &TableDef> = meta.tables.iter().map(|def| (def.name.as_str(), def)).collect();
        let mut tables = BTreeMap::new();

        let files: Vec<PathBuf> = WalkDir::new(self.root.join("tables"))
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();

        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let Some(def) = defs.remove(stem) else {
                warn!(file = %path.display(), "Ignoring table file with no table definition");
                continue;
            };
            let content = fs::read_to_string(&path).await?;
            let rows: Vec<Fields> = serde_json::from_str(&content)?;
            debug!(table = %def.name, rows = rows.len(), "Loaded table");
            tables.insert(def.name.clone(), Table::with_rows(def.clone(), rows)?);
        }

        for def in defs.into_values() {
            tables.insert(def.name.clone(), Table::new(def.clone()));
        }

        Ok(tables)
    }

    fn staged_path(&self, name: &str) -> PathBuf {
        self.root.join("tables").join(format!("{}.json.tmp", name))
    }

    /// Write `rows` next to the live table file. Nothing is visible to
    /// [`Disk::load_tables`] until [`Disk::publish_table`].
    pub async fn stage_table(&self, name: &str, rows: &[Fields]) -> Result<()> {
        let content = serde_json::to_string_pretty(rows)?;
        fs::write(self.staged_path(name), content).await?;
        Ok(())
    }

    /// Replace the live table file with the staged one
    pub async fn publish_table(&self, name: &str) -> Result<()> {
        fs::rename(self.staged_path(name), self.table_path(name)).await?;
        Ok(())
    }

    /// Drop a staged file, if any
    pub async fn discard_staged(&self, name: &str) {
        let path = self.staged_path(name);
        if fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            if let Err(err) = fs::remove_file(&path).await {
                warn!(file = %path.display(), error = %err, "Could not remove staged table file");
            }
        }
    }

    /// Stage then publish one table
    pub async fn write_table(&self, name: &str, rows: &[Fields]) -> Result<()> {
        self.stage_table(name, rows).await?;
        self.publish_table(name).await
    }

    /// Commit pending file changes to git, if enabled and anything changed
    pub fn commit(&self, message: &str) -> Result<()> {
        if let Some(repo) = &self.git {
            if repo.has_changes()? {
                let oid = repo.commit(message)?;
                debug!(%oid, message, "Committed store changes");
            }
        }
        Ok(())
    }
}
