//! Query surface the windows use to talk to the backing store.
//!
//! Adapters never open transactions themselves; every call receives the read
//! transaction the caller is holding for the current pass.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::SourceError;
use crate::types::{EnumerationCompletion, RowId, SectionItem, WindowItem};

/// Rows visited by a section-key enumeration, in visit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEnumeration<K> {
    pub visited: Vec<(K, RowId)>,
    pub completion: EnumerationCompletion,
}

/// Rows visited by an id enumeration, in visit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdEnumeration {
    pub rows: Vec<(RowId, String)>,
    pub completion: EnumerationCompletion,
}

/// A page centered on one item, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AroundPage {
    pub rows: Vec<(RowId, String)>,
    pub reached_oldest: bool,
    pub reached_newest: bool,
}

pub trait SectionSource {
    type Key: Clone + Ord + Hash + Debug;
    type Item: SectionItem<Self::Key> + Clone;
    type Txn: ?Sized;

    /// Every row in the section, ascending.
    fn rows_in_section(&self, key: &Self::Key, txn: &Self::Txn) -> Result<Vec<RowId>, SourceError>;

    /// Up to `count` rows strictly before the section `key` (or from the
    /// newest row when `None`), newest first.
    fn keys_before(
        &self,
        key: Option<&Self::Key>,
        count: usize,
        txn: &Self::Txn,
    ) -> Result<KeyEnumeration<Self::Key>, SourceError>;

    /// Up to `count` rows strictly after the section `key` (or from the
    /// oldest row when `None`), oldest first.
    fn keys_after(
        &self,
        key: Option<&Self::Key>,
        count: usize,
        txn: &Self::Txn,
    ) -> Result<KeyEnumeration<Self::Key>, SourceError>;

    /// Hydrate rows. Rows that no longer exist are absent from the result.
    fn fetch_items(
        &self,
        rows: &[RowId],
        txn: &Self::Txn,
    ) -> Result<HashMap<RowId, Self::Item>, SourceError>;
}

pub trait MessageSource {
    type Item: WindowItem + Clone;
    type Txn: ?Sized;

    /// Up to `count` rows strictly older than `row` (or the newest rows when
    /// `None`), newest first.
    fn ids_before(
        &self,
        row: Option<RowId>,
        count: usize,
        txn: &Self::Txn,
    ) -> Result<IdEnumeration, SourceError>;

    /// Up to `count` rows strictly newer than `row` (or the oldest rows when
    /// `None`), oldest first.
    fn ids_after(
        &self,
        row: Option<RowId>,
        count: usize,
        txn: &Self::Txn,
    ) -> Result<IdEnumeration, SourceError>;

    fn row_for_id(&self, id: &str, txn: &Self::Txn) -> Result<Option<RowId>, SourceError>;

    /// Rows surrounding `id`, including it, up to `count` in total. Space not
    /// used on one side is offered to the other. `None` if `id` is unknown.
    fn ids_around(
        &self,
        id: &str,
        count: usize,
        txn: &Self::Txn,
    ) -> Result<Option<AroundPage>, SourceError> {
        let Some(focus) = self.row_for_id(id, txn)? else {
            return Ok(None);
        };
        let count = count.max(1);

        let before_count = count / 2;
        let before = if before_count > 0 {
            self.ids_before(Some(focus), before_count, txn)?
        } else {
            IdEnumeration {
                rows: Vec::new(),
                completion: EnumerationCompletion::Finished,
            }
        };

        let after_count = count.saturating_sub(1 + before.rows.len());
        let after = if after_count > 0 {
            self.ids_after(Some(focus), after_count, txn)?
        } else {
            IdEnumeration {
                rows: Vec::new(),
                completion: EnumerationCompletion::Finished,
            }
        };

        let mut older: Vec<(RowId, String)> = before.rows.into_iter().rev().collect();
        let mut reached_oldest = before.completion.reached_boundary();
        let spare = after_count.saturating_sub(after.rows.len());
        if spare > 0 && !reached_oldest {
            let from = older.first().map_or(focus, |(row, _)| *row);
            let extra = self.ids_before(Some(from), spare, txn)?;
            reached_oldest = extra.completion.reached_boundary();
            let mut extended: Vec<(RowId, String)> = extra.rows.into_iter().rev().collect();
            extended.append(&mut older);
            older = extended;
        }

        let mut rows = older;
        rows.push((focus, id.to_string()));
        rows.extend(after.rows);
        Ok(Some(AroundPage {
            rows,
            reached_oldest,
            reached_newest: after.completion.reached_boundary(),
        }))
    }

    /// Hydrate records by unique id. Unknown ids are absent from the result.
    fn fetch_records(
        &self,
        ids: &[String],
        txn: &Self::Txn,
    ) -> Result<HashMap<String, Self::Item>, SourceError>;
}
