//! relkv - relational queries over a key-value table store
//!
//! Filters, ordering, relation loading, nested writes and cascading deletes,
//! implemented on a store that only knows tables, primary keys and secondary
//! indexes.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Client                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │   RelQL     │  │  Notifiers  │  │   Schema                │  │
//! │  │   Payloads  │  │  (per       │  │   (Entities, Relations, │  │
//! │  │             │  │   entity)   │  │    Dependents)          │  │
//! │  └──────┬──────┘  └──────▲──────┘  └───────────┬─────────────┘  │
//! │         │                │                     │                │
//! │         ▼                │                     ▼                │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                 Per-Entity Engine                           ││
//! │  │  scope -> filter -> order -> relations -> write             ││
//! │  └──────────────────────────┬──────────────────────────────────┘│
//! │                             │                                   │
//! │                             ▼                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                   Storage Layer                             ││
//! │  │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  ││
//! │  │  │  Tables     │  │  Secondary  │  │  Scoped             │  ││
//! │  │  │  (by key)   │  │  Indexes    │  │  Transactions       │  ││
//! │  │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  ││
//! │  └─────────┼────────────────┼────────────────────┼─────────────┘│
//! │            ▼                ▼                    ▼              │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │     Memory, or Directory (tables/*.json + git history)      ││
//! │  └─────────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> relkv::Result<()> {
//! use relkv::{Client, ClientConfig, Schema};
//!
//! let schema = Schema::load("schema".as_ref())?;
//! let client = Client::open(schema, &ClientConfig::memory("blog")).await?;
//!
//! let users = client.entity("User")?;
//! let query = relql::parse(r#"{ "data": { "name": "Ada", "posts": { "create": [{ "title": "Notes" }] } } }"#)?;
//! let ada = users.create(&query, None).await?;
//! println!("{}", ada.to_json());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod git;
pub mod notify;
pub mod query;
pub mod schema;
pub mod storage;
pub mod validation;

pub use config::{ClientConfig, StorageConfig};
pub use error::{Error, Result};
pub use notify::{ChangeEvent, EventKind, Listener, SubscriptionId};
pub use query::{CountResult, Engine};
pub use relql;
pub use schema::{DefaultValue, EntityDef, FieldDef, OnDelete, RelationDef, ScalarKind, Schema};
pub use storage::{Key, Record, Related, Transaction, TxMode, Value};

use notify::Notifier;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use storage::Store;
use tracing::info;

static GLOBAL: OnceLock<Arc<Client>> = OnceLock::new();

/// The main handle: schema, store and one notifier per entity
pub struct Client {
    schema: Schema,
    store: Store,
    notifiers: BTreeMap<String, Notifier>,
}

impl Client {
    /// Open the store described by `config` with one table per entity
    pub async fn open(schema: Schema, config: &ClientConfig) -> Result<Self> {
        let store = Store::open(config, |upgrade, _old_version| {
            for meta in schema.entities() {
                upgrade.create_table(meta.table_def())?;
            }
            Ok(())
        })
        .await?;

        let notifiers = schema
            .entities()
            .map(|meta| (meta.name.clone(), Notifier::new(meta.name.clone())))
            .collect();

        info!(store = %config.name, entities = schema.entities().count(), "Client opened");
        Ok(Self {
            schema,
            store,
            notifiers,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Operations on the entity called `name`
    pub fn entity(&self, name: &str) -> Result<Engine<'_>> {
        let meta = self.schema.require(name)?;
        let notifier = self.notifiers.get(name).ok_or_else(|| Error::UnknownEntity {
            name: name.to_string(),
        })?;
        Ok(Engine::new(self, meta, notifier))
    }

    /// Open a transaction to thread through several operations
    pub async fn transaction<I, S>(&self, tables: I, mode: TxMode) -> Result<Transaction>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.store.transaction(tables, mode).await
    }

    pub(crate) fn dispatch(&self, events: Vec<ChangeEvent>) {
        for event in &events {
            if let Some(notifier) = self.notifiers.get(&event.entity) {
                notifier.emit(event);
            }
        }
    }

    /// Make this client the process-wide instance. Returns false if one was
    /// already installed.
    pub fn install_global(self: &Arc<Self>) -> bool {
        GLOBAL.set(Arc::clone(self)).is_ok()
    }

    /// The process-wide instance, if one was installed
    pub fn global() -> Option<Arc<Client>> {
        GLOBAL.get().cloned()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("store", &self.store.name())
            .field("entities", &self.notifiers.keys().collect::<Vec<_>>())
            .finish()
    }
}
