//! Disk tier - SQLite database in a private scratch directory.
//!
//! Receives a set's elements once the process is under memory pressure.
//! Nothing here outlives the set: the database lives in a fresh
//! [`tempfile::TempDir`] that is removed on [`DiskBackend::close`] (or on drop).
//!
//! # Layout
//! ```text
//! <tmp>/stringset<random>/elements.db
//!   elements(key BLOB PRIMARY KEY, value BLOB NOT NULL) WITHOUT ROWID
//! ```
//!
//! `WITHOUT ROWID` keeps rows clustered on the key, so a full scan yields
//! elements in native key order.
//!
//! Every primitive runs in its own transaction. Errors are logged and absorbed:
//! a failed lookup reads as absent, a failed write is a no-op.

use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::types::Backend;
use crate::error::{Result, StringSetError};

const SCRATCH_PREFIX: &str = "stringset";
const DB_FILE: &str = "elements.db";

/// Value stored against every key. Only presence matters.
const MARKER: &[u8] = b"y";

const SCHEMA: &str = "
    PRAGMA journal_mode = OFF;
    PRAGMA synchronous = OFF;
    CREATE TABLE IF NOT EXISTS elements (
        key BLOB PRIMARY KEY NOT NULL,
        value BLOB NOT NULL
    ) WITHOUT ROWID;
";

/// SQLite-backed set storage.
pub struct DiskBackend {
    conn: Connection,
    dir: TempDir,
}

impl std::fmt::Debug for DiskBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBackend")
            .field("dir", &self.dir.path())
            .finish()
    }
}

impl DiskBackend {
    /// Create a scratch directory (under `scratch_root`, or the system temp
    /// directory) and open an empty store inside it.
    pub fn open(scratch_root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(StringSetError::ScratchDir)?;

        // On error `dir` is dropped here, which removes it again.
        let conn = Connection::open(dir.path().join(DB_FILE))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn, dir })
    }

    /// Scratch directory holding the database.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Close the database and delete the scratch directory.
    ///
    /// Best effort: failures are logged, never returned.
    pub fn close(self) {
        let path: PathBuf = self.dir.path().to_path_buf();

        if let Err((_conn, e)) = self.conn.close() {
            warn!("Failed to close disk store at {}: {}", path.display(), e);
        }
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove scratch directory {}: {}", path.display(), e);
        }
    }

    /// Removes the elements table so every later statement fails.
    #[cfg(test)]
    pub(crate) fn drop_table(&self) {
        self.conn.execute_batch("DROP TABLE elements").unwrap();
    }

    fn try_has(&self, element: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let found = tx
            .query_row(
                "SELECT 1 FROM elements WHERE key = ?1",
                params![element.as_bytes()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        tx.commit()?;
        Ok(found)
    }

    /// Insert `elements` in one read-write transaction, reporting failure.
    pub(crate) fn try_insert_many<'a, I>(&mut self, elements: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR REPLACE INTO elements (key, value) VALUES (?1, ?2)")?;
            for element in elements {
                stmt.execute(params![element.as_bytes(), MARKER])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn try_remove(&mut self, element: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM elements WHERE key = ?1",
            params![element.as_bytes()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Scan into `out`, keeping whatever was read before a failure.
    fn try_scan(&self, out: &mut Vec<String>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare("SELECT key FROM elements ORDER BY key")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let key: Vec<u8> = row.get(0)?;
                match String::from_utf8(key) {
                    Ok(element) => out.push(element),
                    Err(e) => warn!("Skipping non UTF-8 key in disk store: {}", e),
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl Backend for DiskBackend {
    fn has(&self, element: &str) -> bool {
        self.try_has(element).unwrap_or_else(|e| {
            warn!("Disk lookup failed, treating element as absent: {}", e);
            false
        })
    }

    fn insert(&mut self, element: &str) {
        if let Err(e) = self.try_insert_many(std::iter::once(element)) {
            warn!("Disk insert failed: {}", e);
        }
    }

    fn insert_many(&mut self, elements: &[String]) {
        if let Err(e) = self.try_insert_many(elements.iter().map(String::as_str)) {
            warn!("Disk bulk insert of {} elements failed: {}", elements.len(), e);
        }
    }

    fn remove(&mut self, element: &str) {
        if let Err(e) = self.try_remove(element) {
            warn!("Disk remove failed: {}", e);
        }
    }

    fn all(&self) -> Vec<String> {
        let mut elements = Vec::new();
        if let Err(e) = self.try_scan(&mut elements) {
            warn!(
                "Disk scan failed after {} elements: {}",
                elements.len(),
                e
            );
        }
        elements
    }

    /// Derived from a full scan; there is no separate counter.
    fn count(&self) -> usize {
        self.all().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_backend_open_creates_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(Some(root.path())).unwrap();

        assert!(backend.path().exists());
        assert!(backend.path().starts_with(root.path()));
        assert!(backend
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SCRATCH_PREFIX));
    }

    #[test]
    fn test_disk_backend_primitives() {
        let root = tempfile::tempdir().unwrap();
        let mut backend = DiskBackend::open(Some(root.path())).unwrap();

        backend.insert("test2");
        backend.insert("test1");
        backend.insert("test1");
        assert!(backend.has("test1"));
        assert!(!backend.has("test3"));
        assert_eq!(backend.count(), 2);

        backend.remove("test3");
        backend.remove("test2");
        assert_eq!(backend.all(), vec!["test1".to_string()]);
    }

    #[test]
    fn test_disk_backend_scan_follows_key_order() {
        let root = tempfile::tempdir().unwrap();
        let mut backend = DiskBackend::open(Some(root.path())).unwrap();

        let input: Vec<String> = ["c", "a", "b", ""].iter().map(|s| s.to_string()).collect();
        backend.insert_many(&input);

        assert_eq!(backend.all(), vec!["", "a", "b", "c"]);
    }

    #[test]
    fn test_disk_backend_close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut backend = DiskBackend::open(Some(root.path())).unwrap();
        backend.insert("x");

        let path = backend.path().to_path_buf();
        backend.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_disk_backend_open_fails_for_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");

        let err = DiskBackend::open(Some(&missing)).unwrap_err();
        assert!(matches!(err, StringSetError::ScratchDir(_)));
    }

    #[test]
    fn test_disk_backend_absorbs_store_errors() {
        let root = tempfile::tempdir().unwrap();
        let mut backend = DiskBackend::open(Some(root.path())).unwrap();
        backend.insert("present");
        assert!(backend.has("present"));

        backend.drop_table();

        assert!(!backend.has("present"));
        backend.insert("new");
        backend.insert_many(&["a".to_string(), "b".to_string()]);
        backend.remove("present");
        assert!(backend.all().is_empty());
        assert_eq!(backend.count(), 0);
        assert!(backend.try_insert_many(std::iter::once("x")).is_err());
    }
}
