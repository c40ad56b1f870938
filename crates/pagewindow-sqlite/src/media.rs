use std::collections::HashMap;

use pagewindow_core::source::KeyEnumeration;
use pagewindow_core::{
    EnumerationCompletion, GalleryMonth, RowId, SectionItem, SectionSource, SourceError,
    WindowItem,
};
use rusqlite::{Connection, Row, ToSql, params, params_from_iter};
use tracing::debug;

/// SQLite's default bound-parameter ceiling is 999 on older builds.
pub(crate) const FETCH_CHUNK: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub unique_id: String,
    pub row_id: RowId,
    pub received_at_ms: i64,
    pub caption: Option<String>,
}

impl MediaItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: RowId(row.get(0)?),
            unique_id: row.get(1)?,
            received_at_ms: row.get(2)?,
            caption: row.get(3)?,
        })
    }
}

impl WindowItem for MediaItem {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn row_id(&self) -> RowId {
        self.row_id
    }
}

impl SectionItem<GalleryMonth> for MediaItem {
    fn section_key(&self) -> GalleryMonth {
        GalleryMonth::from_millis(self.received_at_ms)
    }
}

/// Gallery media grouped by calendar month of receipt.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteMediaSource;

impl SqliteMediaSource {
    pub fn new() -> Self {
        Self
    }

    fn enumerate(
        txn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
        count: usize,
    ) -> Result<KeyEnumeration<GalleryMonth>, SourceError> {
        let mut stmt = txn.prepare_cached(sql).map_err(SourceError::database)?;
        let mut rows = stmt.query(params).map_err(SourceError::database)?;

        let mut visited = Vec::new();
        while let Some(row) = rows.next().map_err(SourceError::database)? {
            let row_id: i64 = row.get(0).map_err(SourceError::database)?;
            let received_at_ms: i64 = row.get(1).map_err(SourceError::database)?;
            visited.push((GalleryMonth::from_millis(received_at_ms), RowId(row_id)));
        }
        let completion = EnumerationCompletion::for_visited(visited.len(), count);
        Ok(KeyEnumeration { visited, completion })
    }
}

fn limit(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

impl SectionSource for SqliteMediaSource {
    type Key = GalleryMonth;
    type Item = MediaItem;
    type Txn = Connection;

    fn rows_in_section(
        &self,
        key: &GalleryMonth,
        txn: &Connection,
    ) -> Result<Vec<RowId>, SourceError> {
        let mut stmt = txn
            .prepare_cached(
                "SELECT row_id FROM media
                 WHERE received_at_ms >= ?1 AND received_at_ms < ?2
                 ORDER BY received_at_ms, row_id",
            )
            .map_err(SourceError::database)?;
        let mut rows = stmt
            .query(params![key.start_millis(), key.end_millis()])
            .map_err(SourceError::database)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(SourceError::database)? {
            out.push(RowId(row.get(0).map_err(SourceError::database)?));
        }
        Ok(out)
    }

    fn keys_before(
        &self,
        key: Option<&GalleryMonth>,
        count: usize,
        txn: &Connection,
    ) -> Result<KeyEnumeration<GalleryMonth>, SourceError> {
        let limit = limit(count);
        match key {
            Some(key) => Self::enumerate(
                txn,
                "SELECT row_id, received_at_ms FROM media
                 WHERE received_at_ms < ?1
                 ORDER BY received_at_ms DESC, row_id DESC LIMIT ?2",
                params![key.start_millis(), limit],
                count,
            ),
            None => Self::enumerate(
                txn,
                "SELECT row_id, received_at_ms FROM media
                 ORDER BY received_at_ms DESC, row_id DESC LIMIT ?1",
                params![limit],
                count,
            ),
        }
    }

    fn keys_after(
        &self,
        key: Option<&GalleryMonth>,
        count: usize,
        txn: &Connection,
    ) -> Result<KeyEnumeration<GalleryMonth>, SourceError> {
        let limit = limit(count);
        match key {
            Some(key) => Self::enumerate(
                txn,
                "SELECT row_id, received_at_ms FROM media
                 WHERE received_at_ms >= ?1
                 ORDER BY received_at_ms, row_id LIMIT ?2",
                params![key.end_millis(), limit],
                count,
            ),
            None => Self::enumerate(
                txn,
                "SELECT row_id, received_at_ms FROM media
                 ORDER BY received_at_ms, row_id LIMIT ?1",
                params![limit],
                count,
            ),
        }
    }

    fn fetch_items(
        &self,
        rows: &[RowId],
        txn: &Connection,
    ) -> Result<HashMap<RowId, MediaItem>, SourceError> {
        let mut items = HashMap::with_capacity(rows.len());
        for chunk in rows.chunks(FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT row_id, unique_id, received_at_ms, caption FROM media
                 WHERE row_id IN ({placeholders})"
            );
            let mut stmt = txn.prepare(&sql).map_err(SourceError::database)?;
            let mut found = stmt
                .query(params_from_iter(chunk.iter().map(|row| row.0)))
                .map_err(SourceError::database)?;
            while let Some(row) = found.next().map_err(SourceError::database)? {
                let item = MediaItem::from_row(row).map_err(SourceError::database)?;
                items.insert(item.row_id, item);
            }
        }
        debug!(
            target: "SqliteMediaSource::fetch_items",
            requested = rows.len(),
            found = items.len(),
            "fetched media"
        );
        Ok(items)
    }
}
