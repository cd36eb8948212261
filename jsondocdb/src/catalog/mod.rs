use crate::error::{DocDbError, Result};
use crate::index::{Index, IndexDefinition, IndexInfo};
use crate::storage::Storage;
use serde_json::Value;
use std::collections::BTreeMap;

/// Every index defined on a database, compiled once and kept for the life of
/// the connection. Keyed by lowercase name so lookups ignore case.
#[derive(Debug, Default)]
pub struct IndexCatalog {
    indexes: BTreeMap<String, Index>,
}

impl IndexCatalog {
    /// Read and compile every persisted definition.
    pub fn load(storage: &Storage) -> Result<Self> {
        let mut indexes = BTreeMap::new();
        for record in storage.list_index_records()? {
            let index = Index::from_record(&record)?;
            indexes.insert(index.name().to_lowercase(), index);
        }
        Ok(IndexCatalog { indexes })
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Index names in case-insensitive order, as they were defined.
    pub fn list(&self) -> Vec<String> {
        self.indexes
            .values()
            .map(|index| index.name().to_string())
            .collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.indexes.contains_key(&name.to_lowercase())
    }

    pub fn get(&self, name: &str) -> Result<&Index> {
        self.indexes
            .get(&name.to_lowercase())
            .ok_or_else(|| DocDbError::NoSuchIndex(name.to_string()))
    }

    pub fn info(&self, storage: &Storage, name: &str) -> Result<IndexInfo> {
        self.get(name)?.info(storage)
    }

    /// Define an index and backfill it from every stored document, as one
    /// transaction of its own. On any failure nothing of the index remains.
    pub fn create(&mut self, storage: &Storage, definition: IndexDefinition) -> Result<()> {
        if storage.in_transaction() {
            return Err(DocDbError::TransactionState(
                "cannot create an index while a transaction is active".into(),
            ));
        }

        let index = Index::new(definition)?;
        if self.exists(index.name()) {
            return Err(DocDbError::IndexSpecification(format!(
                "index '{}' already exists",
                index.name()
            )));
        }

        storage.begin_transaction()?;
        match Self::build(storage, &index) {
            Ok(count) => {
                storage.commit_transaction()?;
                log::info!("Created index '{}' with {} entries", index.name(), count);
            }
            Err(e) => {
                if let Err(rollback) = storage.rollback_transaction() {
                    log::warn!("Rollback of index '{}' failed: {}", index.name(), rollback);
                }
                log::warn!("Creating index '{}' rolled back: {}", index.name(), e);
                return Err(e);
            }
        }

        self.indexes.insert(index.name().to_lowercase(), index);
        Ok(())
    }

    fn build(storage: &Storage, index: &Index) -> Result<usize> {
        if !storage.insert_index_record(&index.to_record()?)? {
            return Err(DocDbError::IndexSpecification(format!(
                "index '{}' already exists",
                index.name()
            )));
        }
        storage.create_entry_table(index.table(), index.is_unique())?;

        let mut count = 0;
        for (id, body) in storage.all_documents()? {
            count += index.put(storage, &id, &body)?;
        }
        log::debug!("Backfilled index '{}': {} entries", index.name(), count);
        Ok(count)
    }

    /// Remove an index definition and all of its entries.
    pub fn delete(&mut self, storage: &Storage, name: &str) -> Result<()> {
        if storage.in_transaction() {
            return Err(DocDbError::TransactionState(
                "cannot delete an index while a transaction is active".into(),
            ));
        }
        let index = self.get(name)?;

        storage.begin_transaction()?;
        let dropped = storage
            .delete_index_record(index.name())
            .and_then(|_| storage.drop_entry_table(index.table()));
        match dropped {
            Ok(()) => storage.commit_transaction()?,
            Err(e) => {
                storage.rollback_transaction()?;
                return Err(e);
            }
        }

        log::info!("Deleted index '{}'", index.name());
        self.indexes.remove(&name.to_lowercase());
        Ok(())
    }

    /// Bring every index up to date with a document write.
    pub fn put_document(&self, storage: &Storage, id: &str, body: &Value) -> Result<()> {
        for index in self.indexes.values() {
            index.put(storage, id, body)?;
        }
        Ok(())
    }

    /// Drop a document's entries from every index.
    pub fn remove_document(&self, storage: &Storage, id: &str) -> Result<()> {
        for index in self.indexes.values() {
            index.remove(storage, id)?;
        }
        Ok(())
    }
}
