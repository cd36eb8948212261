//! A JSON document store on SQLite with secondary indexes built from logic
//! expressions, optional uniqueness, transactions and ordered range queries.
//!
//! ```
//! use jsondocdb::{Database, IndexDefinition, KeyRange, Scalar};
//! use serde_json::json;
//!
//! let mut db = Database::open_in_memory().unwrap();
//! db.create_index(IndexDefinition::new("by_kind", "kind")).unwrap();
//!
//! db.transaction(|db| {
//!     db.put("a", json!({"kind": "bolt"}))?;
//!     db.put("b", json!({"kind": "nut"}))
//! })
//! .unwrap();
//!
//! assert_eq!(db.lookup("by_kind", &Scalar::from("nut")).unwrap(), vec!["b"]);
//! assert_eq!(db.range("by_kind", &KeyRange::below("c")).unwrap().len(), 1);
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod index;
pub mod logic;
pub mod query;
pub mod storage;
pub mod store;

pub use config::OpenOptions;
pub use error::{DocDbError, Result};
pub use index::{IndexDefinition, IndexInfo, Scalar};
pub use query::KeyRange;
pub use store::{Database, DatabaseInfo, Scope};
