use std::collections::HashMap;

use pagewindow_core::source::IdEnumeration;
use pagewindow_core::{EnumerationCompletion, MessageSource, RowId, SourceError, WindowItem};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params, params_from_iter};
use tracing::debug;

use crate::media::FETCH_CHUNK;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub unique_id: String,
    pub row_id: RowId,
    pub author: String,
    pub body: String,
    pub sent_at_ms: i64,
}

impl Message {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: RowId(row.get(0)?),
            unique_id: row.get(1)?,
            author: row.get(2)?,
            body: row.get(3)?,
            sent_at_ms: row.get(4)?,
        })
    }
}

impl WindowItem for Message {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn row_id(&self) -> RowId {
        self.row_id
    }
}

/// A conversation transcript ordered by insertion.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteMessageSource;

impl SqliteMessageSource {
    pub fn new() -> Self {
        Self
    }

    fn enumerate(
        txn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
        count: usize,
    ) -> Result<IdEnumeration, SourceError> {
        let mut stmt = txn.prepare_cached(sql).map_err(SourceError::database)?;
        let mut found = stmt.query(params).map_err(SourceError::database)?;

        let mut rows = Vec::new();
        while let Some(row) = found.next().map_err(SourceError::database)? {
            let row_id: i64 = row.get(0).map_err(SourceError::database)?;
            let unique_id: String = row.get(1).map_err(SourceError::database)?;
            rows.push((RowId(row_id), unique_id));
        }
        let completion = EnumerationCompletion::for_visited(rows.len(), count);
        Ok(IdEnumeration { rows, completion })
    }
}

impl MessageSource for SqliteMessageSource {
    type Item = Message;
    type Txn = Connection;

    fn ids_before(
        &self,
        row: Option<RowId>,
        count: usize,
        txn: &Connection,
    ) -> Result<IdEnumeration, SourceError> {
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        match row {
            Some(row) => Self::enumerate(
                txn,
                "SELECT row_id, unique_id FROM messages
                 WHERE row_id < ?1 ORDER BY row_id DESC LIMIT ?2",
                params![row.0, limit],
                count,
            ),
            None => Self::enumerate(
                txn,
                "SELECT row_id, unique_id FROM messages ORDER BY row_id DESC LIMIT ?1",
                params![limit],
                count,
            ),
        }
    }

    fn ids_after(
        &self,
        row: Option<RowId>,
        count: usize,
        txn: &Connection,
    ) -> Result<IdEnumeration, SourceError> {
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        match row {
            Some(row) => Self::enumerate(
                txn,
                "SELECT row_id, unique_id FROM messages WHERE row_id > ?1 ORDER BY row_id LIMIT ?2",
                params![row.0, limit],
                count,
            ),
            None => Self::enumerate(
                txn,
                "SELECT row_id, unique_id FROM messages ORDER BY row_id LIMIT ?1",
                params![limit],
                count,
            ),
        }
    }

    fn row_for_id(&self, id: &str, txn: &Connection) -> Result<Option<RowId>, SourceError> {
        txn.query_row(
            "SELECT row_id FROM messages WHERE unique_id = ?1",
            params![id],
            |row| row.get(0).map(RowId),
        )
        .optional()
        .map_err(SourceError::database)
    }

    fn fetch_records(
        &self,
        ids: &[String],
        txn: &Connection,
    ) -> Result<HashMap<String, Message>, SourceError> {
        let mut records = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT row_id, unique_id, author, body, sent_at_ms FROM messages
                 WHERE unique_id IN ({placeholders})"
            );
            let mut stmt = txn.prepare(&sql).map_err(SourceError::database)?;
            let mut found = stmt.query(params_from_iter(chunk)).map_err(SourceError::database)?;
            while let Some(row) = found.next().map_err(SourceError::database)? {
                let message = Message::from_row(row).map_err(SourceError::database)?;
                records.insert(message.unique_id.clone(), message);
            }
        }
        debug!(
            target: "SqliteMessageSource::fetch_records",
            requested = ids.len(),
            found = records.len(),
            "fetched messages"
        );
        Ok(records)
    }
}
