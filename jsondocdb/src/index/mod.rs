//! Secondary indexes: a named mapping from keys extracted out of document
//! bodies to document identifiers.

mod key;

pub use key::Scalar;

use crate::error::{DocDbError, Result};
use crate::logic::{Expression, Predicate};
use crate::query::KeyRange;
use crate::storage::{IndexRecord, Storage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^[a-z][a-z0-9_]*$").ok())
        .as_ref()
}

/// Check that `name` can name an index.
pub fn validate_name(name: &str) -> Result<()> {
    if name_pattern().is_some_and(|pattern| pattern.is_match(name)) {
        Ok(())
    } else {
        Err(DocDbError::IndexSpecification(format!(
            "invalid index name '{name}': must start with a letter and \
             contain only letters, digits and '_'"
        )))
    }
}

/// Strip an optional `$` / `$.` prefix and check the remaining dot path.
pub fn normalize_keypath(keypath: &str) -> Result<String> {
    let path = keypath.trim();
    let path = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);

    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(DocDbError::IndexSpecification(format!(
            "invalid keypath '{keypath}'"
        )));
    }
    Ok(path.to_string())
}

/// The persisted description of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub keypath: String,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require: Option<Value>,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, keypath: impl Into<String>) -> Self {
        IndexDefinition {
            name: name.into(),
            keypath: keypath.into(),
            unique: false,
            require: None,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn require(mut self, require: Value) -> Self {
        self.require = Some(require);
        self
    }
}

/// An index definition together with its entry statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    #[serde(flatten)]
    pub definition: IndexDefinition,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Scalar>,
}

/// A compiled index: the definition plus its parsed keypath and require
/// expressions.
#[derive(Debug, Clone)]
pub struct Index {
    definition: IndexDefinition,
    table: String,
    keypath: Expression,
    require: Predicate,
}

impl Index {
    /// Validate a definition and compile its expressions. The keypath is
    /// stored normalized.
    pub fn new(mut definition: IndexDefinition) -> Result<Self> {
        validate_name(&definition.name)?;
        definition.keypath = normalize_keypath(&definition.keypath)?;
        let require = Predicate::parse(definition.require.as_ref())?;
        if require.is_vacuous() {
            definition.require = None;
        }

        Ok(Index {
            table: format!("i_{}", definition.name.to_lowercase()),
            keypath: Expression::var(&definition.keypath),
            require,
            definition,
        })
    }

    pub fn from_record(record: &IndexRecord) -> Result<Self> {
        let require = match &record.require {
            Some(text) => Some(serde_json::from_str(text)?),
            None => None,
        };
        Index::new(IndexDefinition {
            name: record.name.clone(),
            keypath: record.keypath.clone(),
            unique: record.unique,
            require,
        })
    }

    pub fn to_record(&self) -> Result<IndexRecord> {
        let require = match &self.definition.require {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        Ok(IndexRecord {
            name: self.definition.name.clone(),
            keypath: self.definition.keypath.clone(),
            unique: self.definition.unique,
            require,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    pub fn is_unique(&self) -> bool {
        self.definition.unique
    }

    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    /// The distinct keys `body` contributes to this index, compared the way
    /// they are stored. Empty when the require predicate fails or the keypath
    /// yields null.
    pub fn keys_for(&self, id: &str, body: &Value) -> Result<Vec<Scalar>> {
        if !self.require.test(body) {
            return Ok(Vec::new());
        }

        let value = self.keypath.evaluate(body);
        let candidates = match &value {
            Value::Null => return Ok(Vec::new()),
            Value::Array(items) => items.as_slice(),
            single => std::slice::from_ref(single),
        };

        let mut keys: Vec<Scalar> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let key = Scalar::from_value(candidate).ok_or_else(|| DocDbError::InvalidKeyType {
                index: self.definition.name.clone(),
                document: id.to_string(),
                key: candidate.to_string(),
            })?;
            if !keys.iter().any(|seen| seen.same_key(&key)) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Replace the entries of `id` with those computed from `body`.
    pub fn put(&self, storage: &Storage, id: &str, body: &Value) -> Result<usize> {
        self.remove(storage, id)?;
        let keys = self.keys_for(id, body)?;
        for key in &keys {
            if !storage.insert_entry(&self.table, id, key)? {
                return Err(DocDbError::NotUnique {
                    index: self.definition.name.clone(),
                    document: id.to_string(),
                    key: key.to_string(),
                });
            }
        }
        Ok(keys.len())
    }

    /// Drop every entry of `id`. Not an error when there are none.
    pub fn remove(&self, storage: &Storage, id: &str) -> Result<usize> {
        storage.delete_entries(&self.table, id)
    }

    pub fn lookup(&self, storage: &Storage, key: &Scalar) -> Result<Vec<String>> {
        storage.entry_ids(&self.table, key)
    }

    pub fn lookup_documents(
        &self,
        storage: &Storage,
        key: &Scalar,
    ) -> Result<Vec<(String, Value)>> {
        storage.entry_documents(&self.table, key)
    }

    pub fn range(&self, storage: &Storage, range: &KeyRange) -> Result<Vec<(String, Scalar)>> {
        storage.range_entries(&self.table, range)
    }

    pub fn range_documents(
        &self,
        storage: &Storage,
        range: &KeyRange,
    ) -> Result<Vec<(String, Scalar, Value)>> {
        storage.range_entry_documents(&self.table, range)
    }

    pub fn contains(&self, storage: &Storage, key: &Scalar) -> Result<bool> {
        storage.contains_key(&self.table, key)
    }

    /// Whether `id` has at least one entry.
    pub fn indexes(&self, storage: &Storage, id: &str) -> Result<bool> {
        storage.contains_identifier(&self.table, id)
    }

    pub fn info(&self, storage: &Storage) -> Result<IndexInfo> {
        let (count, min, max) = storage.entry_stats(&self.table)?;
        Ok(IndexInfo {
            definition: self.definition.clone(),
            count,
            min,
            max,
        })
    }
}
