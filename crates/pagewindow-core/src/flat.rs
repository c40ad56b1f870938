//! FlatWindow - a window over a single ordered transcript
//!
//! Rows are keyed by unique id and kept oldest first. Pages are fetched as
//! id lists, then hydrated in one record fetch. The window never holds more
//! than `max_loaded_count` rows; growing one edge past that trims the other
//! and re-opens it for loading.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use tracing::{debug, warn};

use crate::config::WindowConfig;
use crate::error::{Result, WindowError};
use crate::merge::{LoadedBatch, checked_merge_plan, keyed};
use crate::ordered_map::OrderedMap;
use crate::source::MessageSource;
use crate::types::{RowId, Slot, WindowItem};

/// What a page load did to the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageLoad {
    pub added: usize,
    /// Rows dropped from the opposite edge (or replaced by a jump).
    pub trimmed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Oldest,
    Newest,
}

pub struct FlatWindow<S: MessageSource> {
    source: S,
    config: WindowConfig,
    rows: OrderedMap<String, Slot<S::Item>>,
    can_load_older: bool,
    can_load_newer: bool,
}

impl<S: MessageSource> FlatWindow<S> {
    pub fn new(source: S, config: WindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            rows: OrderedMap::new(),
            can_load_older: false,
            can_load_newer: false,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn can_load_older(&self) -> bool {
        self.can_load_older
    }

    pub fn can_load_newer(&self) -> bool {
        self.can_load_newer
    }

    pub fn ids(&self) -> Vec<&str> {
        self.rows.keys().map(String::as_str).collect()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot<S::Item>> {
        self.rows.get_index(index).map(|(_, slot)| slot)
    }

    pub fn item(&self, index: usize) -> Option<&S::Item> {
        self.slot(index)?.loaded()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.rows.index_of(&id.to_string())
    }

    /// Snapshot of the window as a mergeable batch. Unloaded rows are skipped.
    pub fn loaded_batch(&self) -> LoadedBatch<S::Item> {
        LoadedBatch {
            rows: self
                .rows
                .values()
                .filter_map(Slot::loaded)
                .cloned()
                .collect(),
            can_load_older: self.can_load_older,
            can_load_newer: self.can_load_newer,
        }
    }

    // Page loads

    pub fn load_initial_page(&mut self, focus: Option<&str>, txn: &S::Txn) -> Result<PageLoad> {
        match focus {
            Some(id) => self.load_page_around(id, txn),
            None => self.load_newest_page(txn),
        }
    }

    /// Replace the window with the newest rows of the transcript.
    pub fn load_newest_page(&mut self, txn: &S::Txn) -> Result<PageLoad> {
        let page = self.source.ids_before(None, self.config.initial_load_count, txn)?;
        let reached_oldest = page.completion.reached_boundary();
        let rows: Vec<(RowId, String)> = page.rows.into_iter().rev().collect();
        self.replace_rows(rows, !reached_oldest, false, txn)
    }

    /// Replace the window with rows surrounding `id`. An unknown id falls
    /// back to the newest page.
    pub fn load_page_around(&mut self, id: &str, txn: &S::Txn) -> Result<PageLoad> {
        let Some(page) = self.source.ids_around(id, self.config.initial_load_count, txn)? else {
            warn!(id, "Focus item not found; loading newest page instead");
            return self.load_newest_page(txn);
        };
        self.replace_rows(page.rows, !page.reached_oldest, !page.reached_newest, txn)
    }

    pub fn load_older_page(&mut self, txn: &S::Txn) -> Result<PageLoad> {
        if self.rows.is_empty() {
            return self.load_newest_page(txn);
        }
        if !self.can_load_older {
            return Ok(PageLoad::default());
        }

        let first = self.rows.first().map(|(_, slot)| slot.row_id());
        let page = self.source.ids_before(first, self.config.page_size, txn)?;
        let reached_oldest = page.completion.reached_boundary();
        self.check_new_rows(&page.rows, first, Edge::Oldest)?;
        let mut fetched = self.fetch_missing(&page.rows, txn)?;

        // Newest first, so each prepend lands before the previous one.
        let added = page.rows.len();
        for (row, id) in page.rows {
            let slot = hydrated(&mut fetched, row, &id);
            self.rows.prepend(id, slot)?;
        }
        self.can_load_older = !reached_oldest;
        let trimmed = self.trim_excess(Edge::Newest)?;

        debug!(
            target: "FlatWindow::load_older_page",
            added, trimmed, reached_oldest, "Loaded older page"
        );
        Ok(PageLoad { added, trimmed })
    }

    pub fn load_newer_page(&mut self, txn: &S::Txn) -> Result<PageLoad> {
        if self.rows.is_empty() {
            return self.load_newest_page(txn);
        }
        if !self.can_load_newer {
            return Ok(PageLoad::default());
        }
        self.extend_newer(txn)
    }

    fn extend_newer(&mut self, txn: &S::Txn) -> Result<PageLoad> {
        let last = self.rows.last().map(|(_, slot)| slot.row_id());
        let page = self.source.ids_after(last, self.config.page_size, txn)?;
        let reached_newest = page.completion.reached_boundary();
        self.check_new_rows(&page.rows, last, Edge::Newest)?;
        let mut fetched = self.fetch_missing(&page.rows, txn)?;

        let added = page.rows.len();
        for (row, id) in page.rows {
            let slot = hydrated(&mut fetched, row, &id);
            self.rows.append(id, slot)?;
        }
        self.can_load_newer = !reached_newest;
        let trimmed = self.trim_excess(Edge::Oldest)?;

        debug!(
            target: "FlatWindow::load_newer_page",
            added, trimmed, reached_newest, "Loaded newer page"
        );
        Ok(PageLoad { added, trimmed })
    }

    /// Reject pages that would duplicate rows or break the row order.
    fn check_new_rows(
        &self,
        rows: &[(RowId, String)],
        edge_row: Option<RowId>,
        edge: Edge,
    ) -> Result<()> {
        let mut previous = edge_row;
        for (row, id) in rows {
            if self.rows.contains_key(id) {
                return Err(WindowError::invariant(format!("row {id} is already in the window")));
            }
            let in_order = previous.is_none_or(|previous| match edge {
                Edge::Oldest => *row < previous,
                Edge::Newest => *row > previous,
            });
            if !in_order {
                return Err(WindowError::invariant(format!(
                    "row {row} is out of order at the {edge:?} edge"
                )));
            }
            previous = Some(*row);
        }
        Ok(())
    }

    /// Drop rows from `edge` until the window fits `max_loaded_count`.
    fn trim_excess(&mut self, edge: Edge) -> Result<usize> {
        let excess = self.rows.len().saturating_sub(self.config.max_loaded_count);
        for _ in 0..excess {
            let index = match edge {
                Edge::Oldest => 0,
                Edge::Newest => self.rows.len() - 1,
            };
            self.rows.remove(index)?;
        }
        if excess > 0 {
            match edge {
                Edge::Oldest => self.can_load_older = true,
                Edge::Newest => self.can_load_newer = true,
            }
        }
        Ok(excess)
    }

    /// Swap in a new contiguous run, keeping items that were already loaded.
    fn replace_rows(
        &mut self,
        rows: Vec<(RowId, String)>,
        can_load_older: bool,
        can_load_newer: bool,
        txn: &S::Txn,
    ) -> Result<PageLoad> {
        if rows.windows(2).any(|pair| pair[0].0 >= pair[1].0) {
            return Err(WindowError::invariant("page rows are not in ascending order"));
        }
        let mut fetched = self.fetch_missing(&rows, txn)?;

        let previous = std::mem::take(&mut self.rows);
        let mut replacement = OrderedMap::new();
        let mut added = 0;
        for (row, id) in rows {
            let slot = match previous.get(&id) {
                Some(Slot::Loaded(item)) => Slot::Loaded(item.clone()),
                Some(_) => hydrated(&mut fetched, row, &id),
                None => {
                    added += 1;
                    hydrated(&mut fetched, row, &id)
                }
            };
            if let Err(err) = replacement.append(id, slot) {
                self.rows = previous;
                return Err(err);
            }
        }
        let kept = replacement.len() - added;
        let trimmed = previous.len() - kept;

        self.rows = replacement;
        self.can_load_older = can_load_older;
        self.can_load_newer = can_load_newer;
        debug!(
            target: "FlatWindow::replace_rows",
            len = self.rows.len(), added, trimmed, can_load_older, can_load_newer,
            "Replaced window"
        );
        Ok(PageLoad { added, trimmed })
    }

    /// Fetch records for rows that are not already loaded in the window.
    fn fetch_missing(
        &self,
        rows: &[(RowId, String)],
        txn: &S::Txn,
    ) -> Result<HashMap<String, S::Item>> {
        let missing: Vec<String> = rows
            .iter()
            .filter(|(_, id)| !self.rows.get(id).is_some_and(Slot::is_loaded))
            .map(|(_, id)| id.clone())
            .collect();
        if missing.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self.source.fetch_records(&missing, txn)?)
    }

    // Materialization

    /// Hydrate unloaded rows in `range` with a single record fetch.
    /// Returns the number of rows loaded.
    pub fn ensure_loaded(&mut self, range: Range<usize>, txn: &S::Txn) -> Result<usize> {
        let range = range.start.min(self.rows.len())..range.end.min(self.rows.len());
        let range = self.trim_loaded_items_at_end(self.trim_loaded_items_at_start(range));
        if range.is_empty() {
            return Ok(0);
        }

        let wanted: Vec<(usize, String)> = range
            .filter_map(|index| match self.rows.get_index(index) {
                Some((id, Slot::Unloaded(_))) => Some((index, id.clone())),
                _ => None,
            })
            .collect();
        let ids: Vec<String> = wanted.iter().map(|(_, id)| id.clone()).collect();
        let mut fetched = self.source.fetch_records(&ids, txn)?;

        let mut loaded = 0;
        for (index, id) in wanted {
            let Some(item) = fetched.remove(&id) else {
                warn!(id, "Record vanished before it could be loaded");
                continue;
            };
            if item.unique_id() != id {
                return Err(WindowError::invariant(format!(
                    "fetched {} for row {id}",
                    item.unique_id()
                )));
            }
            if let Some((_, slot)) = self.rows.get_index_mut(index) {
                *slot = Slot::Loaded(item);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn trim_loaded_items_at_start(&self, range: Range<usize>) -> Range<usize> {
        let loaded = range
            .clone()
            .take_while(|&index| self.slot(index).is_some_and(Slot::is_loaded))
            .count();
        (range.start + loaded)..range.end
    }

    pub fn trim_loaded_items_at_end(&self, range: Range<usize>) -> Range<usize> {
        let loaded = range
            .clone()
            .rev()
            .take_while(|&index| self.slot(index).is_some_and(Slot::is_loaded))
            .count();
        range.start..(range.end - loaded)
    }

    // Reconciliation

    /// React to rows appended to the transcript. A window already showing
    /// the newest rows follows them; otherwise nothing changes until the
    /// caller loads newer pages.
    pub fn handle_new_items(&mut self, txn: &S::Txn) -> Result<PageLoad> {
        if self.rows.is_empty() {
            return self.load_newest_page(txn);
        }
        if self.can_load_newer {
            debug!("New rows are beyond the loaded window");
            return Ok(PageLoad::default());
        }
        self.extend_newer(txn)
    }

    /// Re-fetch loaded rows whose records changed. Returns their indices.
    pub fn handle_updated_items(&mut self, ids: &[String], txn: &S::Txn) -> Result<Vec<usize>> {
        let changed: HashSet<&String> = ids.iter().collect();
        let targets: Vec<(usize, RowId, String)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(index, (id, slot))| {
                (slot.is_loaded() && changed.contains(id))
                    .then(|| (index, slot.row_id(), id.clone()))
            })
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let request: Vec<String> = targets.iter().map(|(_, _, id)| id.clone()).collect();
        let mut fetched = self.source.fetch_records(&request, txn)?;
        let mut updated = Vec::with_capacity(targets.len());
        for (index, row, id) in targets {
            let slot = hydrated(&mut fetched, row, &id);
            self.rows.replace(index, slot)?;
            updated.push(index);
        }
        Ok(updated)
    }

    /// Remove rows deleted from the transcript. Returns their pre-removal
    /// indices, ascending.
    pub fn handle_deleted_items(&mut self, ids: &[String]) -> Result<Vec<usize>> {
        let mut indices: Vec<usize> = ids.iter().filter_map(|id| self.rows.index_of(id)).collect();
        indices.sort_unstable();
        indices.dedup();
        for &index in indices.iter().rev() {
            self.rows.remove(index)?;
        }
        Ok(indices)
    }

    /// Fold in a page fetched earlier that completed after the window moved.
    /// Returns `false`, leaving the window unchanged, when the batch does not
    /// line up with the loaded rows or its extra rows repeat an id or break
    /// the row order. Growing past `max_loaded_count` trims the opposite edge.
    pub fn merge_fetched_batch(&mut self, batch: LoadedBatch<S::Item>) -> Result<bool> {
        let existing: Vec<(RowId, &str)> = self
            .rows
            .iter()
            .map(|(id, slot)| (slot.row_id(), id.as_str()))
            .collect();
        let Some(plan) = checked_merge_plan(&existing, &keyed(&batch.rows)) else {
            debug!(
                rows = batch.rows.len(),
                "Discarding fetched batch that does not line up with the window"
            );
            return Ok(false);
        };

        let mut rows = batch.rows;
        let newer: Vec<S::Item> = rows.drain(plan.newer.clone()).collect();
        let older: Vec<S::Item> = rows.drain(plan.older.clone()).collect();
        let extends_newer = !newer.is_empty();
        let added = older.len() + newer.len();

        let previous = self.rows.clone();
        if let Err(err) = self.splice_batch(older, rows, newer) {
            self.rows = previous;
            return Err(err);
        }

        if plan.older_from_candidate {
            self.can_load_older = batch.can_load_older;
        }
        if plan.newer_from_candidate {
            self.can_load_newer = batch.can_load_newer;
        }
        let trimmed = if extends_newer {
            self.trim_excess(Edge::Oldest)?
        } else {
            self.trim_excess(Edge::Newest)?
        };

        debug!(
            target: "FlatWindow::merge_fetched_batch",
            added, trimmed, len = self.rows.len(), "Merged fetched batch"
        );
        Ok(true)
    }

    fn splice_batch(
        &mut self,
        older: Vec<S::Item>,
        shared: Vec<S::Item>,
        newer: Vec<S::Item>,
    ) -> Result<()> {
        for item in older.into_iter().rev() {
            self.rows
                .prepend(item.unique_id().to_string(), Slot::Loaded(item))?;
        }
        for item in newer {
            self.rows
                .append(item.unique_id().to_string(), Slot::Loaded(item))?;
        }
        for item in shared {
            if let Some(slot) = self.rows.get_mut(&item.unique_id().to_string())
                && !slot.is_loaded()
            {
                *slot = Slot::Loaded(item);
            }
        }
        Ok(())
    }

    pub fn check_invariants(&self) -> Result<()> {
        let mut previous: Option<RowId> = None;
        for (id, slot) in self.rows.iter() {
            let row = slot.row_id();
            if previous.is_some_and(|previous| previous >= row) {
                return Err(WindowError::invariant(format!("row {row} is out of order")));
            }
            if let Slot::Loaded(item) = slot
                && item.unique_id() != id
            {
                return Err(WindowError::invariant(format!(
                    "slot {id} holds {}",
                    item.unique_id()
                )));
            }
            previous = Some(row);
        }
        Ok(())
    }
}

fn hydrated<T>(fetched: &mut HashMap<String, T>, row: RowId, id: &str) -> Slot<T> {
    fetched.remove(id).map_or(Slot::Unloaded(row), Slot::Loaded)
}
