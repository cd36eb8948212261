use super::Database;
use crate::error::Result;
use std::ops::{Deref, DerefMut};

/// An open transaction on a [`Database`].
///
/// Derefs to the database, so writes go through the guard. `commit` applies
/// them; dropping the guard without committing rolls them back.
///
/// ```
/// use jsondocdb::Database;
/// use serde_json::json;
///
/// let mut db = Database::open_in_memory().unwrap();
/// let mut scope = db.scope().unwrap();
/// scope.put("a", json!({"v": 1})).unwrap();
/// scope.commit().unwrap();
/// assert!(db.contains("a").unwrap());
/// ```
pub struct Scope<'a> {
    db: &'a mut Database,
    finished: bool,
}

impl<'a> Scope<'a> {
    pub(super) fn open(db: &'a mut Database) -> Result<Self> {
        db.begin()?;
        Ok(Scope { db, finished: false })
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.db.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.db.rollback()
    }
}

impl Deref for Scope<'_> {
    type Target = Database;

    fn deref(&self) -> &Database {
        self.db
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut Database {
        self.db
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if self.finished || !self.db.in_transaction() {
            return;
        }
        if let Err(e) = self.db.rollback() {
            log::warn!("Rollback of dropped transaction failed: {}", e);
        }
    }
}

impl Database {
    /// Begin a transaction that rolls back unless committed.
    pub fn scope(&mut self) -> Result<Scope<'_>> {
        Scope::open(self)
    }

    /// Run `f` inside a transaction. It commits when `f` returns `Ok` and
    /// rolls back when it returns `Err`, handing the error back unchanged.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T>,
    {
        self.begin()?;
        match f(&mut *self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if self.in_transaction() {
                    if let Err(rollback) = self.rollback() {
                        log::warn!("Rollback after error failed: {}", rollback);
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DocDbError;
    use crate::index::IndexDefinition;
    use crate::Database;
    use serde_json::json;

    #[test]
    fn test_dropped_scope_rolls_back() {
        let mut db = Database::open_in_memory().unwrap();
        {
            let mut scope = db.scope().unwrap();
            scope.put("a", json!({"v": 1})).unwrap();
            assert!(scope.in_transaction());
        }
        assert!(!db.in_transaction());
        assert!(!db.contains("a").unwrap());
    }

    #[test]
    fn test_scope_rollback_and_commit() {
        let mut db = Database::open_in_memory().unwrap();

        let mut scope = db.scope().unwrap();
        scope.put("a", json!({})).unwrap();
        scope.rollback().unwrap();
        assert_eq!(db.len().unwrap(), 0);

        let mut scope = db.scope().unwrap();
        scope.put("b", json!({})).unwrap();
        scope.commit().unwrap();
        assert_eq!(db.len().unwrap(), 1);
    }

    #[test]
    fn test_scope_refuses_nesting() {
        let mut db = Database::open_in_memory().unwrap();
        let mut scope = db.scope().unwrap();
        assert!(matches!(scope.begin(), Err(DocDbError::TransactionState(_))));
    }

    #[test]
    fn test_transaction_closure_commits() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db.transaction(|db| db.add(json!({"v": 1}))).unwrap();

        assert_eq!(db.get(&id).unwrap(), json!({"v": 1}));
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_transaction_closure_rolls_back_and_propagates() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_index(IndexDefinition::new("key", "key").unique(true))
            .unwrap();

        let result = db.transaction(|db| {
            db.put("a", json!({"key": "k1"}))?;
            db.put("b", json!({"key": "k1"}))?;
            Ok(())
        });

        assert!(matches!(result, Err(DocDbError::NotUnique { .. })));
        assert!(!db.contains("a").unwrap());
        assert_eq!(db.index("key").unwrap().count, 0);
    }
}
