use crate::config::OpenOptions;
use crate::error::{DocDbError, Result};
use crate::index::Scalar;
use crate::query::KeyRange;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, DatabaseName, ErrorCode, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::path::Path;

const REQUIRED_TABLES: [&str; 2] = ["documents", "indexes"];

/// SQLite-backed storage for documents, the index catalog and one entries
/// table per index.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open the database file, creating and initialising it if allowed.
    pub fn open(path: &Path, options: &OpenOptions) -> Result<Self> {
        if path.exists() {
            let conn = if options.read_only {
                Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            } else {
                Connection::open(path)
            }
            .map_err(|e| DocDbError::InvalidFile(e.to_string()))?;
            let storage = Storage { conn };
            storage.check_tables()?;
            return Ok(storage);
        }

        if options.read_only {
            return Err(DocDbError::InvalidFile(format!(
                "{} does not exist and cannot be created read-only",
                path.display()
            )));
        }
        if !options.create_if_missing {
            return Err(DocDbError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }

        let conn = Connection::open(path)?;
        let storage = Storage { conn };
        storage.initialize_tables()?;
        log::info!("Created database file {}", path.display());
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Storage { conn };
        storage.initialize_tables()?;
        Ok(storage)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                identifier TEXT PRIMARY KEY,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS indexes (
                name TEXT PRIMARY KEY COLLATE NOCASE,
                keypath TEXT NOT NULL,
                is_unique INTEGER NOT NULL,
                require TEXT
            );
            ",
        )?;
        Ok(())
    }

    fn check_tables(&self) -> Result<()> {
        let names = self
            .query_strings("SELECT name FROM sqlite_master WHERE type = 'table'", [])
            .map_err(|e| DocDbError::InvalidFile(e.to_string()))?;
        for required in REQUIRED_TABLES {
            if !names.iter().any(|name| name == required) {
                return Err(DocDbError::InvalidFile(format!(
                    "database does not contain the '{required}' table"
                )));
            }
        }
        Ok(())
    }

    fn query_strings<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get(0))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }

    // ── Documents ────────────────────────────────────────────────────

    pub fn count_documents(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn document_exists(&self, id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM documents WHERE identifier = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Value>> {
        let text: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM documents WHERE identifier = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite a document row.
    pub fn put_document(&self, id: &str, body: &Value) -> Result<()> {
        let text = serde_json::to_string(body)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO documents (identifier, document) VALUES (?1, ?2)",
            params![id, text],
        )?;
        Ok(())
    }

    /// Delete a document row. Returns false if there was none.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM documents WHERE identifier = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Up to `limit` ids in ascending order, strictly after `after`.
    pub fn document_ids_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        match after {
            Some(after) => self.query_strings(
                "SELECT identifier FROM documents WHERE identifier > ?1
                 ORDER BY identifier LIMIT ?2",
                params![after, limit as i64],
            ),
            None => self.query_strings(
                "SELECT identifier FROM documents ORDER BY identifier LIMIT ?1",
                params![limit as i64],
            ),
        }
    }

    /// Up to `limit` documents in ascending id order, strictly after `after`.
    pub fn documents_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Value)>> {
        let mut stmt = self.conn.prepare(
            "SELECT identifier, document FROM documents
             WHERE ?1 IS NULL OR identifier > ?1
             ORDER BY identifier LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        parse_document_rows(rows)
    }

    /// Every document, in no particular order.
    pub fn all_documents(&self) -> Result<Vec<(String, Value)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT identifier, document FROM documents")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        parse_document_rows(rows)
    }

    // ── Index Catalog ────────────────────────────────────────────────

    pub fn insert_index_record(&self, record: &IndexRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO indexes (name, keypath, is_unique, require) VALUES (?1, ?2, ?3, ?4)",
            params![record.name, record.keypath, record.unique, record.require],
        );
        match inserted {
            Ok(_) => Ok(true),
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_index_record(&self, name: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM indexes WHERE name = ?1", params![name])?;
        Ok(deleted > 0)
    }

    pub fn list_index_records(&self) -> Result<Vec<IndexRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, keypath, is_unique, require FROM indexes ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(IndexRecord {
                name: row.get(0)?,
                keypath: row.get(1)?,
                unique: row.get(2)?,
                require: row.get(3)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn count_indexes(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM indexes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ── Index Entries ────────────────────────────────────────────────

    /// Create the entries table for an index. `table` must already be a
    /// validated identifier. Its SQLite indexes carry a '/' so they cannot
    /// clash with the table of another index.
    pub fn create_entry_table(&self, table: &str, unique: bool) -> Result<()> {
        let unique = if unique { "UNIQUE " } else { "" };
        self.conn.execute_batch(&format!(
            "
            CREATE TABLE \"{table}\" (
                identifier TEXT NOT NULL,
                key NOT NULL,
                is_bool INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX \"{table}/identifier\" ON \"{table}\" (identifier);
            CREATE {unique}INDEX \"{table}/key\" ON \"{table}\" (key);
            "
        ))?;
        Ok(())
    }

    pub fn drop_entry_table(&self, table: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\""))?;
        Ok(())
    }

    /// Insert one entry. Returns false when a unique key constraint rejects it.
    pub fn insert_entry(&self, table: &str, id: &str, key: &Scalar) -> Result<bool> {
        let inserted = self.conn.execute(
            &format!("INSERT INTO \"{table}\" (identifier, key, is_bool) VALUES (?1, ?2, ?3)"),
            params![id, key, matches!(key, Scalar::Bool(_))],
        );
        match inserted {
            Ok(_) => Ok(true),
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_entries(&self, table: &str, id: &str) -> Result<usize> {
        let deleted = self.conn.execute(
            &format!("DELETE FROM \"{table}\" WHERE identifier = ?1"),
            params![id],
        )?;
        Ok(deleted)
    }

    pub fn entry_ids(&self, table: &str, key: &Scalar) -> Result<Vec<String>> {
        self.query_strings(
            &format!("SELECT identifier FROM \"{table}\" WHERE key = ?1 ORDER BY identifier"),
            params![key],
        )
    }

    pub fn entry_documents(&self, table: &str, key: &Scalar) -> Result<Vec<(String, Value)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT i.identifier, d.document FROM \"{table}\" AS i
             JOIN documents AS d ON d.identifier = i.identifier
             WHERE i.key = ?1 ORDER BY i.identifier"
        ))?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        parse_document_rows(rows)
    }

    pub fn contains_key(&self, table: &str, key: &Scalar) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM \"{table}\" WHERE key = ?1 LIMIT 1"),
                params![key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn contains_identifier(&self, table: &str, id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM \"{table}\" WHERE identifier = ?1 LIMIT 1"),
                params![id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Entry count with the smallest and largest keys.
    pub fn entry_stats(&self, table: &str) -> Result<(u64, Option<Scalar>, Option<Scalar>)> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{table}\""),
            [],
            |row| row.get(0),
        )?;
        let min = self.edge_key(table, "ASC")?;
        let max = self.edge_key(table, "DESC")?;
        Ok((count as u64, min, max))
    }

    fn edge_key(&self, table: &str, direction: &str) -> Result<Option<Scalar>> {
        let key = self
            .conn
            .query_row(
                &format!("SELECT key, is_bool FROM \"{table}\" ORDER BY key {direction} LIMIT 1"),
                [],
                |row| Ok(row.get::<_, Scalar>(0)?.restore(row.get(1)?)),
            )
            .optional()?;
        Ok(key)
    }

    pub fn range_entries(&self, table: &str, range: &KeyRange) -> Result<Vec<(String, Scalar)>> {
        let (tail, bound) = range.sql_tail("");
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT identifier, key, is_bool FROM \"{table}\"{tail}"))?;
        let bound: Vec<&dyn ToSql> = bound.into_iter().map(|key| key as &dyn ToSql).collect();
        let rows = stmt.query_map(bound.as_slice(), |row| {
            Ok((row.get(0)?, row.get::<_, Scalar>(1)?.restore(row.get(2)?)))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn range_entry_documents(
        &self,
        table: &str,
        range: &KeyRange,
    ) -> Result<Vec<(String, Scalar, Value)>> {
        let (tail, bound) = range.sql_tail("i.");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT i.identifier, i.key, i.is_bool, d.document FROM \"{table}\" AS i
             JOIN documents AS d ON d.identifier = i.identifier{tail}"
        ))?;
        let bound: Vec<&dyn ToSql> = bound.into_iter().map(|key| key as &dyn ToSql).collect();
        let rows = stmt.query_map(bound.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Scalar>(1)?.restore(row.get(2)?),
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, key, text) = row?;
            entries.push((id, key, serde_json::from_str(&text)?));
        }
        Ok(entries)
    }

    // ── Transaction Support ──────────────────────────────────────────

    /// True while an explicit transaction is open on the connection.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn savepoint(&self, name: &str) -> Result<()> {
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(())
    }

    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        self.conn.execute_batch(&format!("RELEASE {name}"))?;
        Ok(())
    }

    /// Undo everything since the savepoint and discard it.
    pub fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
        Ok(())
    }

    // ── Backup ───────────────────────────────────────────────────────

    /// Copy the whole database into a new file.
    pub fn backup(&self, path: &Path) -> Result<()> {
        self.conn.backup(DatabaseName::Main, path, None)?;
        Ok(())
    }
}

/// A row from the index catalog table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub name: String,
    pub keypath: String,
    pub unique: bool,
    /// Require expression as JSON text.
    pub require: Option<String>,
}

fn parse_document_rows<I>(rows: I) -> Result<Vec<(String, Value)>>
where
    I: Iterator<Item = rusqlite::Result<(String, String)>>,
{
    let mut docs = Vec::new();
    for row in rows {
        let (id, text) = row?;
        docs.push((id, serde_json::from_str(&text)?));
    }
    Ok(docs)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get_document() {
        let db = Storage::open_in_memory().unwrap();
        let body = json!({"key": "k1", "n": 3});

        db.put_document("id1", &body).unwrap();

        assert_eq!(db.get_document("id1").unwrap(), Some(body));
        assert!(db.document_exists("id1").unwrap());
        assert!(db.get_document("nope").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let db = Storage::open_in_memory().unwrap();
        db.put_document("a", &json!({"v": 1})).unwrap();
        db.put_document("a", &json!({"v": 2})).unwrap();

        assert_eq!(db.count_documents().unwrap(), 1);
        assert_eq!(db.get_document("a").unwrap(), Some(json!({"v": 2})));
    }

    #[test]
    fn test_delete_document() {
        let db = Storage::open_in_memory().unwrap();
        db.put_document("a", &json!({})).unwrap();

        assert!(db.delete_document("a").unwrap());
        assert!(!db.delete_document("a").unwrap());
        assert_eq!(db.count_documents().unwrap(), 0);
    }

    #[test]
    fn test_paging_ids() {
        let db = Storage::open_in_memory().unwrap();
        for id in ["c", "a", "d", "b"] {
            db.put_document(id, &json!({"id": id})).unwrap();
        }

        assert_eq!(db.document_ids_after(None, 2).unwrap(), vec!["a", "b"]);
        assert_eq!(db.document_ids_after(Some("b"), 10).unwrap(), vec!["c", "d"]);
        let docs = db.documents_after(Some("c"), 10).unwrap();
        assert_eq!(docs, vec![("d".to_string(), json!({"id": "d"}))]);
        assert_eq!(db.documents_after(None, 10).unwrap().len(), 4);
    }

    #[test]
    fn test_index_records_are_case_insensitive() {
        let db = Storage::open_in_memory().unwrap();
        let record = IndexRecord {
            name: "Kind".into(),
            keypath: "kind".into(),
            unique: false,
            require: None,
        };
        assert!(db.insert_index_record(&record).unwrap());

        let clash = IndexRecord { name: "kind".into(), ..record.clone() };
        assert!(!db.insert_index_record(&clash).unwrap());

        assert_eq!(db.list_index_records().unwrap(), vec![record]);
        assert!(db.delete_index_record("KIND").unwrap());
        assert_eq!(db.count_indexes().unwrap(), 0);
    }

    #[test]
    fn test_unique_entries() {
        let db = Storage::open_in_memory().unwrap();
        db.create_entry_table("i_u", true).unwrap();

        assert!(db.insert_entry("i_u", "a", &Scalar::from("x")).unwrap());
        assert!(!db.insert_entry("i_u", "b", &Scalar::from("x")).unwrap());
        assert_eq!(db.entry_ids("i_u", &Scalar::from("x")).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_range_entries() {
        let db = Storage::open_in_memory().unwrap();
        db.create_entry_table("i_n", false).unwrap();
        for (id, key) in [("a", 1i64), ("b", 2), ("c", 3), ("d", 4)] {
            db.put_document(id, &json!({"n": key})).unwrap();
            db.insert_entry("i_n", id, &Scalar::from(key)).unwrap();
        }

        let found = db.range_entries("i_n", &KeyRange::between(2i64, 4i64)).unwrap();
        assert_eq!(
            found,
            vec![("b".to_string(), Scalar::from(2i64)), ("c".to_string(), Scalar::from(3i64))]
        );

        let found = db
            .range_entry_documents("i_n", &KeyRange::at_least(3i64).reversed())
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c"]);
        assert_eq!(found[0].2, json!({"n": 4}));

        let (count, min, max) = db.entry_stats("i_n").unwrap();
        assert_eq!(count, 4);
        assert_eq!(min, Some(Scalar::from(1i64)));
        assert_eq!(max, Some(Scalar::from(4i64)));
    }

    #[test]
    fn test_entry_stats_empty() {
        let db = Storage::open_in_memory().unwrap();
        db.create_entry_table("i_e", false).unwrap();
        assert_eq!(db.entry_stats("i_e").unwrap(), (0, None, None));
    }

    #[test]
    fn test_entry_tables_with_suffixed_names() {
        let db = Storage::open_in_memory().unwrap();
        for table in ["i_x", "i_x_key", "i_x_identifier"] {
            db.create_entry_table(table, true).unwrap();
        }
        assert!(db.insert_entry("i_x_key", "a", &Scalar::from("k")).unwrap());
    }

    #[test]
    fn test_bool_entries_read_back_as_bool() {
        let db = Storage::open_in_memory().unwrap();
        db.create_entry_table("i_b", false).unwrap();
        db.insert_entry("i_b", "a", &Scalar::Bool(true)).unwrap();
        db.insert_entry("i_b", "b", &Scalar::Bool(false)).unwrap();
        db.insert_entry("i_b", "c", &Scalar::from(5i64)).unwrap();

        let found = db.range_entries("i_b", &KeyRange::all()).unwrap();
        assert_eq!(
            found,
            vec![
                ("b".to_string(), Scalar::Bool(false)),
                ("a".to_string(), Scalar::Bool(true)),
                ("c".to_string(), Scalar::from(5i64)),
            ]
        );
        assert_eq!(
            db.entry_stats("i_b").unwrap(),
            (3, Some(Scalar::Bool(false)), Some(Scalar::from(5i64)))
        );
        // A boolean key still matches the integer it is stored as.
        assert_eq!(db.entry_ids("i_b", &Scalar::from(1i64)).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Storage::open_in_memory().unwrap();

        db.begin_transaction().unwrap();
        assert!(db.in_transaction());
        db.put_document("a", &json!({})).unwrap();
        db.rollback_transaction().unwrap();

        assert!(!db.in_transaction());
        assert!(db.get_document("a").unwrap().is_none());
    }

    #[test]
    fn test_savepoint_rollback_keeps_outer_transaction() {
        let db = Storage::open_in_memory().unwrap();

        db.begin_transaction().unwrap();
        db.put_document("kept", &json!({})).unwrap();
        db.savepoint("doc_write").unwrap();
        db.put_document("undone", &json!({})).unwrap();
        db.rollback_to_savepoint("doc_write").unwrap();
        assert!(db.in_transaction());
        db.commit_transaction().unwrap();

        assert!(db.document_exists("kept").unwrap());
        assert!(!db.document_exists("undone").unwrap());
    }

    #[test]
    fn test_open_file_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("docs.db");
        {
            let db = Storage::open(&path, &OpenOptions::default()).unwrap();
            db.put_document("a", &json!({"x": 1})).unwrap();
        }
        let db = Storage::open(&path, &OpenOptions::new().read_only(true)).unwrap();
        assert_eq!(db.get_document("a").unwrap(), Some(json!({"x": 1})));
    }

    #[test]
    fn test_open_missing_file_without_create() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing.db");

        let err = Storage::open(&path, &OpenOptions::new().create_if_missing(false));
        assert!(matches!(err, Err(DocDbError::Io(_))));
        let err = Storage::open(&path, &OpenOptions::new().read_only(true));
        assert!(matches!(err, Err(DocDbError::InvalidFile(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_open_rejects_foreign_files() {
        let tmp = TempDir::new().unwrap();

        let text = tmp.path().join("notes.txt");
        std::fs::write(&text, "not a database file\n".repeat(100)).unwrap();
        assert!(matches!(
            Storage::open(&text, &OpenOptions::default()),
            Err(DocDbError::InvalidFile(_))
        ));

        let other = tmp.path().join("other.db");
        let conn = Connection::open(&other).unwrap();
        conn.execute_batch("CREATE TABLE stuff (i INTEGER PRIMARY KEY)").unwrap();
        drop(conn);
        assert!(matches!(
            Storage::open(&other, &OpenOptions::default()),
            Err(DocDbError::InvalidFile(_))
        ));
    }

    #[test]
    fn test_backup() {
        let tmp = TempDir::new().unwrap();
        let db = Storage::open_in_memory().unwrap();
        db.put_document("a", &json!({"x": 1})).unwrap();

        let copy = tmp.path().join("copy.db");
        db.backup(&copy).unwrap();

        let restored = Storage::open(&copy, &OpenOptions::default()).unwrap();
        assert_eq!(restored.get_document("a").unwrap(), Some(json!({"x": 1})));
    }
}
