use crate::error::Result;
use crate::storage::Storage;
use serde_json::Value;
use std::collections::VecDeque;

const PAGE_SIZE: usize = 256;

type Fetch<T> = fn(&Storage, Option<&str>, usize) -> Result<Vec<T>>;

/// A lazy scan over the documents table in ascending id order, fetched a page
/// at a time. Each page resumes after the last id seen, so writes made
/// between pages are picked up rather than skipped or repeated.
pub struct Paged<'a, T> {
    storage: &'a Storage,
    fetch: Fetch<T>,
    key: fn(&T) -> &str,
    page: VecDeque<T>,
    last: Option<String>,
    done: bool,
}

/// Document ids, ascending.
pub type DocumentIds<'a> = Paged<'a, String>;

/// `(id, body)` pairs, ascending by id.
pub type Documents<'a> = Paged<'a, (String, Value)>;

#[allow(clippy::ptr_arg)]
fn id_key(id: &String) -> &str {
    id
}

fn document_key(entry: &(String, Value)) -> &str {
    &entry.0
}

impl<'a> Paged<'a, String> {
    pub(crate) fn ids(storage: &'a Storage) -> Self {
        Paged::new(storage, Storage::document_ids_after, id_key)
    }
}

impl<'a> Paged<'a, (String, Value)> {
    pub(crate) fn documents(storage: &'a Storage) -> Self {
        Paged::new(storage, Storage::documents_after, document_key)
    }
}

impl<'a, T> Paged<'a, T> {
    fn new(storage: &'a Storage, fetch: Fetch<T>, key: fn(&T) -> &str) -> Self {
        Paged {
            storage,
            fetch,
            key,
            page: VecDeque::new(),
            last: None,
            done: false,
        }
    }

    /// Start over from the smallest id.
    pub fn restart(&mut self) {
        self.page.clear();
        self.last = None;
        self.done = false;
    }

    fn refill(&mut self) -> Result<()> {
        let rows = (self.fetch)(self.storage, self.last.as_deref(), PAGE_SIZE)?;
        if rows.len() < PAGE_SIZE {
            self.done = true;
        }
        if let Some(row) = rows.last() {
            self.last = Some((self.key)(row).to_string());
        }
        self.page.extend(rows);
        Ok(())
    }
}

impl<T> Iterator for Paged<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.done {
            if let Err(e) = self.refill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_cross_pages() {
        let storage = Storage::open_in_memory().unwrap();
        let total = PAGE_SIZE * 2 + 3;
        for i in 0..total {
            storage.put_document(&format!("doc{i:05}"), &json!({"i": i})).unwrap();
        }

        let ids: Vec<String> = DocumentIds::ids(&storage).collect::<Result<_>>().unwrap();
        assert_eq!(ids.len(), total);
        assert_eq!(ids[0], "doc00000");
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_restart() {
        let storage = Storage::open_in_memory().unwrap();
        storage.put_document("a", &json!({"v": 1})).unwrap();
        storage.put_document("b", &json!({"v": 2})).unwrap();

        let mut docs = Documents::documents(&storage);
        assert_eq!(docs.next().unwrap().unwrap(), ("a".to_string(), json!({"v": 1})));
        assert_eq!(docs.next().unwrap().unwrap().0, "b");
        assert!(docs.next().is_none());

        docs.restart();
        assert_eq!(docs.count(), 2);
    }

    #[test]
    fn test_empty() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(DocumentIds::ids(&storage).next().is_none());
    }
}
