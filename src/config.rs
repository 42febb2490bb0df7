//! Client configuration
//!
//! Configuration is plain serde data, usually read from a YAML file:
//!
//! ```yaml
//! name: blog
//! version: 1
//! storage:
//!   type: directory
//!   path: ./data
//!   git: true
//! author:
//!   name: Blog Service
//!   email: blog@example.com
//! ```

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for opening a [`Client`](crate::Client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Store name, recorded in the store metadata
    pub name: String,
    /// Schema version; raising it runs the table upgrade again
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Identity used for git commits
    #[serde(default)]
    pub author: Author,
}

/// Where the tables live
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Tables only live as long as the client
    #[default]
    Memory,
    /// Tables are persisted as JSON files under `path`
    Directory {
        path: PathBuf,
        /// Record each committed readwrite transaction as a git commit
        #[serde(default = "default_git")]
        git: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "relkv".to_string(),
            email: "relkv@localhost".to_string(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_git() -> bool {
    true
}

impl ClientConfig {
    /// In-memory store
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            storage: StorageConfig::Memory,
            author: Author::default(),
        }
    }

    /// Directory-backed store with git history
    pub fn directory(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::Directory {
                path: path.into(),
                git: true,
            },
            ..Self::memory(name)
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn without_git(mut self) -> Self {
        if let StorageConfig::Directory { git, .. } = &mut self.storage {
            *git = false;
        }
        self
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        crate::validation::validate_entity_name(&config.name)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
