//! Connection setup, schema, and the write side of the store.
//!
//! Readers never go through [`SqliteStore`]: the window sources take the
//! caller's transaction directly. Writes happen here, after which the caller
//! tells the window what changed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pagewindow_core::RowId;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction, params};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT_MS: u64 = 5_000;
const CACHE_SIZE_KB: i64 = -16_000;

pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags)?;
        apply_pragmas(&conn, true)?;
        initialize_schema(&conn)?;

        info!(target: "SqliteStore::open", path = %path.display(), "opened store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn, false)?;
        initialize_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin the read transaction a window pass runs inside. The returned
    /// transaction derefs to [`Connection`], which is what the sources take.
    pub fn read_transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    pub fn insert_media(
        &self,
        unique_id: &str,
        received_at_ms: i64,
        caption: Option<&str>,
    ) -> Result<RowId> {
        self.conn
            .execute(
                "INSERT INTO media (unique_id, received_at_ms, caption) VALUES (?1, ?2, ?3)",
                params![unique_id, received_at_ms, caption],
            )
            .map_err(|e| duplicate_or(e, unique_id))?;
        let row = RowId(self.conn.last_insert_rowid());
        debug!(
            target: "SqliteStore::insert_media",
            %unique_id,
            %row,
            received_at_ms,
            "inserted media"
        );
        Ok(row)
    }

    /// Delete by unique id, returning the removed row and its timestamp.
    pub fn delete_media(&self, unique_id: &str) -> Result<Option<(RowId, i64)>> {
        let removed = self
            .conn
            .query_row(
                "DELETE FROM media WHERE unique_id = ?1 RETURNING row_id, received_at_ms",
                params![unique_id],
                |row| Ok((RowId(row.get(0)?), row.get(1)?)),
            )
            .optional()?;
        debug!(
            target: "SqliteStore::delete_media",
            %unique_id,
            found = removed.is_some(),
            "deleted media"
        );
        Ok(removed)
    }

    pub fn update_caption(&self, unique_id: &str, caption: Option<&str>) -> Result<Option<RowId>> {
        let row = self
            .conn
            .query_row(
                "UPDATE media SET caption = ?2 WHERE unique_id = ?1 RETURNING row_id",
                params![unique_id, caption],
                |row| row.get(0).map(RowId),
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_message(
        &self,
        unique_id: &str,
        author: &str,
        body: &str,
        sent_at_ms: i64,
    ) -> Result<RowId> {
        self.conn
            .execute(
                "INSERT INTO messages (unique_id, author, body, sent_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![unique_id, author, body, sent_at_ms],
            )
            .map_err(|e| duplicate_or(e, unique_id))?;
        let row = RowId(self.conn.last_insert_rowid());
        debug!(target: "SqliteStore::insert_message", %unique_id, %row, "inserted message");
        Ok(row)
    }

    /// Returns whether a message was removed.
    pub fn delete_message(&self, unique_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM messages WHERE unique_id = ?1", params![unique_id])?;
        Ok(changed > 0)
    }

    pub fn update_message_body(&self, unique_id: &str, body: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE messages SET body = ?2 WHERE unique_id = ?1",
            params![unique_id, body],
        )?;
        Ok(changed > 0)
    }
}

fn duplicate_or(err: rusqlite::Error, unique_id: &str) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::DuplicateId(unique_id.to_string()),
        _ => StoreError::Sqlite(err),
    }
}

fn apply_pragmas(conn: &Connection, on_disk: bool) -> Result<()> {
    if on_disk {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "cache_size", CACHE_SIZE_KB)?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    Ok(())
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    match version {
        0 => {
            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS media (
                    row_id INTEGER PRIMARY KEY,
                    unique_id TEXT NOT NULL UNIQUE,
                    received_at_ms INTEGER NOT NULL,
                    caption TEXT
                );
                CREATE INDEX IF NOT EXISTS media_received_at
                    ON media (received_at_ms, row_id);

                CREATE TABLE IF NOT EXISTS messages (
                    row_id INTEGER PRIMARY KEY,
                    unique_id TEXT NOT NULL UNIQUE,
                    author TEXT NOT NULL,
                    body TEXT NOT NULL,
                    sent_at_ms INTEGER NOT NULL
                );
                ",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            debug!(
                target: "SqliteStore::initialize_schema",
                version = SCHEMA_VERSION,
                "created schema"
            );
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        got => Err(StoreError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION,
            got,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_is_recorded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let version: i64 = store
            .connection()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_media("m-1", 1_000, None).unwrap();
        let err = store.insert_media("m-1", 2_000, None).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(id) if id == "m-1"));
    }

    #[test]
    fn writes_report_missing_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.delete_media("absent").unwrap(), None);
        assert_eq!(store.update_caption("absent", Some("x")).unwrap(), None);
        assert!(!store.delete_message("absent").unwrap());
        assert!(!store.update_message_body("absent", "x").unwrap());
    }

    #[test]
    fn delete_media_returns_the_removed_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let row = store.insert_media("m-1", 42, Some("beach")).unwrap();
        assert_eq!(store.delete_media("m-1").unwrap(), Some((row, 42)));
        assert_eq!(store.delete_media("m-1").unwrap(), None);
    }
}
