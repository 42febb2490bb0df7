//! Storage layer for relkv
//!
//! A plain transactional key-value table store: no joins, no foreign keys,
//! only primary keys and secondary indexes. Everything relational lives in
//! [`crate::query`].

mod disk;
pub mod store;
pub mod table;
pub mod transaction;
pub mod value;

pub use disk::StoreMeta;
pub use store::{Store, Upgrade};
pub use table::{IndexDef, Table, TableDef};
pub use transaction::{Transaction, TxMode};
pub use value::{Fields, Key, Record, Related, Value};
