mod iter;
mod transaction;

pub use iter::{DocumentIds, Documents, Paged};
pub use transaction::Scope;

use crate::catalog::IndexCatalog;
use crate::config::OpenOptions;
use crate::error::{DocDbError, Result};
use crate::index::{IndexDefinition, IndexInfo, Scalar};
use crate::logic::Predicate;
use crate::query::KeyRange;
use crate::storage::Storage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

const DOCUMENT_SAVEPOINT: &str = "doc_write";

/// Summary counts for a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    pub version: String,
    pub documents: u64,
    pub indexes: u64,
}

/// A JSON document store with secondary indexes.
///
/// Documents are JSON objects keyed by a string id. Every write goes through
/// each defined index, and writes are only accepted inside a transaction.
pub struct Database {
    storage: Storage,
    catalog: IndexCatalog,
}

impl Database {
    /// Open a database file with the default options, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &OpenOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let storage = Storage::open(path.as_ref(), options)?;
        Self::from_storage(storage)
    }

    /// Create a new database file. Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(DocDbError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        Self::open_with(path, &OpenOptions::default())
    }

    /// A transient database that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_storage(Storage::open_in_memory()?)
    }

    fn from_storage(storage: Storage) -> Result<Self> {
        let catalog = IndexCatalog::load(&storage)?;
        Ok(Database { storage, catalog })
    }

    pub fn info(&self) -> Result<DatabaseInfo> {
        Ok(DatabaseInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            documents: self.storage.count_documents()?,
            indexes: self.storage.count_indexes()?,
        })
    }

    // ── Documents ────────────────────────────────────────────────────

    pub fn len(&self) -> Result<u64> {
        self.storage.count_documents()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        self.storage.document_exists(id)
    }

    pub fn get(&self, id: &str) -> Result<Value> {
        self.storage
            .get_document(id)?
            .ok_or_else(|| DocDbError::NoSuchDocument(id.to_string()))
    }

    /// The document body, or `default` when there is no such document.
    pub fn get_or(&self, id: &str, default: Value) -> Result<Value> {
        Ok(self.storage.get_document(id)?.unwrap_or(default))
    }

    /// Fetch a document and deserialize it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(id)?)?)
    }

    /// Insert or overwrite a document and update every index. If any index
    /// rejects the document, the write is undone and the error returned; the
    /// rest of the transaction is untouched.
    pub fn put(&mut self, id: &str, body: Value) -> Result<()> {
        self.require_transaction("put")?;
        if !body.is_object() {
            return Err(DocDbError::InvalidDocument(format!(
                "document {id} is not a JSON object"
            )));
        }

        self.atomically(|storage, catalog| {
            storage.put_document(id, &body)?;
            catalog.put_document(storage, id, &body)
        })
    }

    /// Serialize `value` and store it under `id`.
    pub fn put_as<T: Serialize>(&mut self, id: &str, value: &T) -> Result<()> {
        let body = serde_json::to_value(value)?;
        self.put(id, body)
    }

    /// Store `body` under a freshly generated id and return the id.
    pub fn add(&mut self, body: Value) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.add_with_id(&id, body)?;
        Ok(id)
    }

    /// Store a new document. Fails if `id` is already taken.
    pub fn add_with_id(&mut self, id: &str, body: Value) -> Result<()> {
        self.require_transaction("add")?;
        if self.contains(id)? {
            return Err(DocDbError::DocumentExists(id.to_string()));
        }
        self.put(id, body)
    }

    /// Overwrite an existing document. Fails if there is none.
    pub fn update(&mut self, id: &str, body: Value) -> Result<()> {
        self.require_transaction("update")?;
        if !self.contains(id)? {
            return Err(DocDbError::NoSuchDocument(id.to_string()));
        }
        self.put(id, body)
    }

    /// Remove a document and all of its index entries.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        self.require_transaction("delete")?;
        if !self.contains(id)? {
            return Err(DocDbError::NoSuchDocument(id.to_string()));
        }

        self.atomically(|storage, catalog| {
            catalog.remove_document(storage, id)?;
            storage.delete_document(id)?;
            Ok(())
        })
    }

    /// Lazy iterator over every id in ascending order. Each call starts a
    /// fresh scan.
    pub fn ids(&self) -> DocumentIds<'_> {
        Paged::ids(&self.storage)
    }

    /// Lazy iterator over every `(id, body)` pair in ascending id order.
    pub fn documents(&self) -> Documents<'_> {
        Paged::documents(&self.storage)
    }

    /// Ids of the documents for which `expression` is truthy, ascending. An
    /// empty expression matches every document.
    pub fn filter(&self, expression: &Value) -> Result<Vec<String>> {
        let predicate = Predicate::parse(Some(expression))?;
        let mut ids = Vec::new();
        for entry in self.documents() {
            let (id, body) = entry?;
            if predicate.test(&body) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Run one document write under a savepoint so that it lands in full or
    /// not at all.
    fn atomically<F>(&mut self, write: F) -> Result<()>
    where
        F: FnOnce(&Storage, &IndexCatalog) -> Result<()>,
    {
        self.storage.savepoint(DOCUMENT_SAVEPOINT)?;
        match write(&self.storage, &self.catalog) {
            Ok(()) => self.storage.release_savepoint(DOCUMENT_SAVEPOINT),
            Err(e) => {
                self.storage.rollback_to_savepoint(DOCUMENT_SAVEPOINT)?;
                Err(e)
            }
        }
    }

    // ── Transactions ─────────────────────────────────────────────────

    pub fn in_transaction(&self) -> bool {
        self.storage.in_transaction()
    }

    /// Start a transaction. Transactions do not nest.
    pub fn begin(&mut self) -> Result<()> {
        if self.in_transaction() {
            return Err(DocDbError::TransactionState(
                "a transaction is already active".into(),
            ));
        }
        self.storage.begin_transaction()?;
        log::debug!("Transaction started");
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        self.storage.commit_transaction()?;
        log::debug!("Transaction committed");
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.require_transaction("rollback")?;
        self.storage.rollback_transaction()?;
        log::debug!("Transaction rolled back");
        Ok(())
    }

    fn require_transaction(&self, operation: &str) -> Result<()> {
        if self.in_transaction() {
            Ok(())
        } else {
            Err(DocDbError::TransactionState(format!(
                "{operation} requires an active transaction"
            )))
        }
    }

    // ── Indexes ──────────────────────────────────────────────────────

    /// Define an index and build it from the stored documents. Runs as its
    /// own transaction, so it cannot be called while one is active.
    pub fn create_index(&mut self, definition: IndexDefinition) -> Result<()> {
        self.catalog.create(&self.storage, definition)
    }

    pub fn delete_index(&mut self, name: &str) -> Result<()> {
        self.catalog.delete(&self.storage, name)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.catalog.list()
    }

    pub fn index_exists(&self, name: &str) -> bool {
        self.catalog.exists(name)
    }

    /// The definition of an index with its entry count and key bounds.
    pub fn index(&self, name: &str) -> Result<IndexInfo> {
        self.catalog.info(&self.storage, name)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Ids of the documents with `key` in the index, ascending.
    pub fn lookup(&self, index: &str, key: &Scalar) -> Result<Vec<String>> {
        self.catalog.get(index)?.lookup(&self.storage, key)
    }

    pub fn lookup_documents(&self, index: &str, key: &Scalar) -> Result<Vec<(String, Value)>> {
        self.catalog.get(index)?.lookup_documents(&self.storage, key)
    }

    /// `(id, key)` entries with keys inside `range`, ordered by key.
    pub fn range(&self, index: &str, range: &KeyRange) -> Result<Vec<(String, Scalar)>> {
        self.catalog.get(index)?.range(&self.storage, range)
    }

    pub fn range_documents(
        &self,
        index: &str,
        range: &KeyRange,
    ) -> Result<Vec<(String, Scalar, Value)>> {
        self.catalog.get(index)?.range_documents(&self.storage, range)
    }

    /// Every entry of an index, ordered by key.
    pub fn entries(&self, index: &str) -> Result<Vec<(String, Scalar)>> {
        self.range(index, &KeyRange::all())
    }

    pub fn index_contains(&self, index: &str, key: &Scalar) -> Result<bool> {
        self.catalog.get(index)?.contains(&self.storage, key)
    }

    /// Whether the document has at least one entry in the index.
    pub fn in_index(&self, index: &str, id: &str) -> Result<bool> {
        self.catalog.get(index)?.indexes(&self.storage, id)
    }

    // ── Backup ───────────────────────────────────────────────────────

    /// Copy the database into a new file.
    pub fn backup(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.in_transaction() {
            return Err(DocDbError::TransactionState(
                "cannot back up while a transaction is active".into(),
            ));
        }
        if path.exists() {
            return Err(DocDbError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        self.storage.backup(path)?;
        log::info!("Backed up database to {}", path.display());
        Ok(())
    }
}
