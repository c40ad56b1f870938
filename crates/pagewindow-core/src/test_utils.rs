//! In-memory sources and a checking surface, for tests and demos.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;

use crate::error::SourceError;
use crate::source::{IdEnumeration, KeyEnumeration, MessageSource, SectionSource};
use crate::surface::{RenderSurface, SurfaceOp};
use crate::types::{EnumerationCompletion, GalleryMonth, IndexPath, RowId, SectionItem, WindowItem};

/// Noon UTC on a compact date such as `2021_04_13`, in milliseconds.
/// Invalid dates map to the epoch.
pub fn day_millis(compact: u32) -> i64 {
    let year = i32::try_from(compact / 10_000).unwrap_or_default();
    let month = (compact / 100) % 100;
    let day = compact % 100;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .map_or(0, |time| time.and_utc().timestamp_millis())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeMedia {
    pub unique_id: String,
    pub row_id: RowId,
    pub timestamp_ms: i64,
    /// Bumped by [`InMemoryGallery::touch`] so updates are observable.
    pub revision: u32,
}

impl FakeMedia {
    pub fn new(row_id: RowId, day: u32) -> Self {
        Self {
            unique_id: format!("media-{}", row_id.0),
            row_id,
            timestamp_ms: day_millis(day),
            revision: 0,
        }
    }
}

impl WindowItem for FakeMedia {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn row_id(&self) -> RowId {
        self.row_id
    }
}

impl SectionItem<GalleryMonth> for FakeMedia {
    fn section_key(&self) -> GalleryMonth {
        GalleryMonth::from_millis(self.timestamp_ms)
    }
}

/// Gallery store kept in memory, ordered by timestamp then row.
#[derive(Debug, Default)]
pub struct InMemoryGallery {
    items: Vec<FakeMedia>,
    next_row: i64,
    fetch_log: RefCell<Vec<Vec<RowId>>>,
    enumeration_calls: Cell<usize>,
    fail_next_fetch: Cell<bool>,
}

impl InMemoryGallery {
    pub fn new() -> Self {
        Self {
            next_row: 1,
            ..Self::default()
        }
    }

    pub fn with_days(days: &[u32]) -> Self {
        let mut gallery = Self::new();
        for &day in days {
            gallery.insert(day);
        }
        gallery
    }

    /// Three items in January 2021, two in April and five in September.
    pub fn standard() -> Self {
        Self::with_days(&[
            2021_01_01, 2021_01_02, 2021_01_20, 2021_04_01, 2021_04_13, 2021_09_09, 2021_09_09,
            2021_09_09, 2021_09_30, 2021_09_30,
        ])
    }

    pub fn items(&self) -> &[FakeMedia] {
        &self.items
    }

    pub fn insert(&mut self, day: u32) -> RowId {
        let row = RowId(self.next_row);
        self.next_row += 1;
        let item = FakeMedia::new(row, day);
        let position = self
            .items
            .partition_point(|existing| {
                (existing.timestamp_ms, existing.row_id) < (item.timestamp_ms, row)
            });
        self.items.insert(position, item);
        row
    }

    pub fn delete_rows(&mut self, rows: &[RowId]) {
        let rows: HashSet<RowId> = rows.iter().copied().collect();
        self.items.retain(|item| !rows.contains(&item.row_id));
    }

    /// Delete every item in `month`, returning the removed rows.
    pub fn delete_month(&mut self, month: GalleryMonth) -> Vec<RowId> {
        let rows: Vec<RowId> = self
            .items
            .iter()
            .filter(|item| item.section_key() == month)
            .map(|item| item.row_id)
            .collect();
        self.delete_rows(&rows);
        rows
    }

    pub fn touch(&mut self, row: RowId) {
        if let Some(item) = self.items.iter_mut().find(|item| item.row_id == row) {
            item.revision += 1;
        }
    }

    /// Change an item's timestamp, possibly moving it to another month.
    pub fn move_row(&mut self, row: RowId, day: u32) {
        if let Some(position) = self.items.iter().position(|item| item.row_id == row) {
            let mut item = self.items.remove(position);
            item.timestamp_ms = day_millis(day);
            let position = self.items.partition_point(|existing| {
                (existing.timestamp_ms, existing.row_id) < (item.timestamp_ms, item.row_id)
            });
            self.items.insert(position, item);
        }
    }

    pub fn fetch_log(&self) -> Vec<Vec<RowId>> {
        self.fetch_log.borrow().clone()
    }

    pub fn last_fetch(&self) -> Option<Vec<RowId>> {
        self.fetch_log.borrow().last().cloned()
    }

    pub fn clear_fetch_log(&self) {
        self.fetch_log.borrow_mut().clear();
    }

    pub fn enumeration_calls(&self) -> usize {
        self.enumeration_calls.get()
    }

    /// Make the next `fetch_items` call fail.
    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.set(true);
    }

    fn enumerate<'a>(
        items: impl Iterator<Item = &'a FakeMedia>,
        count: usize,
    ) -> KeyEnumeration<GalleryMonth> {
        let visited: Vec<(GalleryMonth, RowId)> = items
            .take(count)
            .map(|item| (item.section_key(), item.row_id))
            .collect();
        let completion = EnumerationCompletion::for_visited(visited.len(), count);
        KeyEnumeration { visited, completion }
    }
}

impl SectionSource for InMemoryGallery {
    type Key = GalleryMonth;
    type Item = FakeMedia;
    type Txn = ();

    fn rows_in_section(&self, key: &GalleryMonth, _txn: &()) -> Result<Vec<RowId>, SourceError> {
        Ok(self
            .items
            .iter()
            .filter(|item| item.section_key() == *key)
            .map(|item| item.row_id)
            .collect())
    }

    fn keys_before(
        &self,
        key: Option<&GalleryMonth>,
        count: usize,
        _txn: &(),
    ) -> Result<KeyEnumeration<GalleryMonth>, SourceError> {
        self.enumeration_calls.set(self.enumeration_calls.get() + 1);
        let items = self
            .items
            .iter()
            .rev()
            .filter(|item| key.is_none_or(|key| item.section_key() < *key));
        Ok(Self::enumerate(items, count))
    }

    fn keys_after(
        &self,
        key: Option<&GalleryMonth>,
        count: usize,
        _txn: &(),
    ) -> Result<KeyEnumeration<GalleryMonth>, SourceError> {
        self.enumeration_calls.set(self.enumeration_calls.get() + 1);
        let items = self
            .items
            .iter()
            .filter(|item| key.is_none_or(|key| item.section_key() > *key));
        Ok(Self::enumerate(items, count))
    }

    fn fetch_items(
        &self,
        rows: &[RowId],
        _txn: &(),
    ) -> Result<HashMap<RowId, FakeMedia>, SourceError> {
        if self.fail_next_fetch.replace(false) {
            return Err(SourceError::database_message("injected fetch failure"));
        }
        self.fetch_log.borrow_mut().push(rows.to_vec());
        let wanted: HashSet<&RowId> = rows.iter().collect();
        Ok(self
            .items
            .iter()
            .filter(|item| wanted.contains(&item.row_id))
            .map(|item| (item.row_id, item.clone()))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeMessage {
    pub unique_id: String,
    pub row_id: RowId,
    pub body: String,
}

impl WindowItem for FakeMessage {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn row_id(&self) -> RowId {
        self.row_id
    }
}

/// Transcript kept in memory, ordered by row.
#[derive(Debug, Default)]
pub struct InMemoryTranscript {
    messages: Vec<FakeMessage>,
    next_row: i64,
    fetch_log: RefCell<Vec<Vec<String>>>,
    enumeration_calls: Cell<usize>,
    fail_next_fetch: Cell<bool>,
}

impl InMemoryTranscript {
    pub fn new() -> Self {
        Self {
            next_row: 1,
            ..Self::default()
        }
    }

    /// `count` messages with ids `msg-1` through `msg-{count}`.
    pub fn with_messages(count: usize) -> Self {
        let mut transcript = Self::new();
        for index in 1..=count {
            transcript.append(&format!("message {index}"));
        }
        transcript
    }

    pub fn messages(&self) -> &[FakeMessage] {
        &self.messages
    }

    pub fn append(&mut self, body: &str) -> String {
        let row = RowId(self.next_row);
        self.next_row += 1;
        let unique_id = format!("msg-{}", row.0);
        self.messages.push(FakeMessage {
            unique_id: unique_id.clone(),
            row_id: row,
            body: body.to_string(),
        });
        unique_id
    }

    pub fn delete(&mut self, ids: &[String]) {
        self.messages.retain(|message| !ids.contains(&message.unique_id));
    }

    pub fn edit(&mut self, id: &str, body: &str) {
        if let Some(message) = self.messages.iter_mut().find(|message| message.unique_id == id) {
            message.body = body.to_string();
        }
    }

    pub fn fetch_log(&self) -> Vec<Vec<String>> {
        self.fetch_log.borrow().clone()
    }

    pub fn clear_fetch_log(&self) {
        self.fetch_log.borrow_mut().clear();
    }

    pub fn enumeration_calls(&self) -> usize {
        self.enumeration_calls.get()
    }

    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.set(true);
    }

    fn enumerate<'a>(
        messages: impl Iterator<Item = &'a FakeMessage>,
        count: usize,
    ) -> IdEnumeration {
        let rows: Vec<(RowId, String)> = messages
            .take(count)
            .map(|message| (message.row_id, message.unique_id.clone()))
            .collect();
        let completion = EnumerationCompletion::for_visited(rows.len(), count);
        IdEnumeration { rows, completion }
    }
}

impl MessageSource for InMemoryTranscript {
    type Item = FakeMessage;
    type Txn = ();

    fn ids_before(
        &self,
        row: Option<RowId>,
        count: usize,
        _txn: &(),
    ) -> Result<IdEnumeration, SourceError> {
        self.enumeration_calls.set(self.enumeration_calls.get() + 1);
        let messages = self
            .messages
            .iter()
            .rev()
            .filter(|message| row.is_none_or(|row| message.row_id < row));
        Ok(Self::enumerate(messages, count))
    }

    fn ids_after(
        &self,
        row: Option<RowId>,
        count: usize,
        _txn: &(),
    ) -> Result<IdEnumeration, SourceError> {
        self.enumeration_calls.set(self.enumeration_calls.get() + 1);
        let messages = self
            .messages
            .iter()
            .filter(|message| row.is_none_or(|row| message.row_id > row));
        Ok(Self::enumerate(messages, count))
    }

    fn row_for_id(&self, id: &str, _txn: &()) -> Result<Option<RowId>, SourceError> {
        Ok(self
            .messages
            .iter()
            .find(|message| message.unique_id == id)
            .map(|message| message.row_id))
    }

    fn fetch_records(
        &self,
        ids: &[String],
        _txn: &(),
    ) -> Result<HashMap<String, FakeMessage>, SourceError> {
        if self.fail_next_fetch.replace(false) {
            return Err(SourceError::database_message("injected fetch failure"));
        }
        self.fetch_log.borrow_mut().push(ids.to_vec());
        Ok(self
            .messages
            .iter()
            .filter(|message| ids.contains(&message.unique_id))
            .map(|message| (message.unique_id.clone(), message.clone()))
            .collect())
    }
}

/// A surface that tracks per-section item counts and applies each batch the
/// way a list view does, so a batch that would crash a real view fails
/// [`ShadowSurface::commit`] instead.
#[derive(Debug, Default)]
pub struct ShadowSurface {
    counts: Vec<usize>,
    pending: Vec<SurfaceOp>,
    finished: Option<(usize, usize)>,
}

impl ShadowSurface {
    pub fn new(counts: Vec<usize>) -> Self {
        Self {
            counts,
            ..Self::default()
        }
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Apply the finished batch and check that the result matches
    /// `window_counts`, the per-section counts of the window after the batch.
    pub fn commit(&mut self, window_counts: &[usize]) -> Result<(), String> {
        let (before, after) = self
            .finished
            .take()
            .ok_or_else(|| "batch was not finished".to_string())?;
        if before != self.counts.len() {
            return Err(format!(
                "batch starts from {before} sections, surface has {}",
                self.counts.len()
            ));
        }
        if after != window_counts.len() {
            return Err(format!(
                "batch ends with {after} sections, window has {}",
                window_counts.len()
            ));
        }

        let mut deleted_sections = BTreeSet::new();
        let mut inserted_sections = BTreeSet::new();
        let mut reloaded_sections = BTreeSet::new();
        let mut deleted_items = BTreeSet::new();
        let mut reloaded_items = BTreeSet::new();
        for op in std::mem::take(&mut self.pending) {
            match op {
                SurfaceOp::DeleteSections(sections) => deleted_sections.extend(sections),
                SurfaceOp::InsertSections(sections) => inserted_sections.extend(sections),
                SurfaceOp::ReloadSections(sections) => reloaded_sections.extend(sections),
                SurfaceOp::DeleteItems(paths) => {
                    for path in paths {
                        if !deleted_items.insert(path) {
                            return Err(format!("item {path} deleted twice"));
                        }
                    }
                }
                SurfaceOp::ReloadItems(paths) => reloaded_items.extend(paths),
            }
        }

        for &section in deleted_sections.iter().chain(&reloaded_sections) {
            if section >= before {
                return Err(format!("section {section} does not exist before the batch"));
            }
        }
        if let Some(section) = deleted_sections.intersection(&reloaded_sections).next() {
            return Err(format!("section {section} is both deleted and reloaded"));
        }
        let check_item = |path: &IndexPath| -> Result<(), String> {
            let count = self.counts.get(path.section).copied().unwrap_or(0);
            if path.item >= count {
                return Err(format!("item {path} does not exist before the batch"));
            }
            if deleted_sections.contains(&path.section)
                || reloaded_sections.contains(&path.section)
            {
                return Err(format!("item {path} is inside a deleted or reloaded section"));
            }
            Ok(())
        };
        for path in deleted_items.iter().chain(&reloaded_items) {
            check_item(path)?;
        }
        if let Some(path) = deleted_items.intersection(&reloaded_items).next() {
            return Err(format!("item {path} is both deleted and reloaded"));
        }
        if let Some(section) = inserted_sections.iter().find(|&&section| section >= after) {
            return Err(format!("inserted section {section} is past the end"));
        }

        // Surviving sections keep their relative order and fill the slots
        // that were not inserted.
        let mut survivors = (0..before)
            .filter(|section| !deleted_sections.contains(section))
            .map(|section| {
                let removed = deleted_items
                    .iter()
                    .filter(|path| path.section == section)
                    .count();
                (section, self.counts[section] - removed)
            });
        for (index, &expected) in window_counts.iter().enumerate() {
            if inserted_sections.contains(&index) {
                continue;
            }
            let Some((old_index, count)) = survivors.next() else {
                return Err(format!("no surviving section for index {index}"));
            };
            if !reloaded_sections.contains(&old_index) && count != expected {
                return Err(format!(
                    "section {index} (was {old_index}) has {count} items, window has {expected}"
                ));
            }
        }
        if survivors.next().is_some() {
            return Err("more surviving sections than the window holds".to_string());
        }

        self.counts = window_counts.to_vec();
        Ok(())
    }
}

impl RenderSurface for ShadowSurface {
    fn delete_sections(&mut self, sections: &BTreeSet<usize>) {
        self.pending.push(SurfaceOp::DeleteSections(sections.clone()));
    }

    fn insert_sections(&mut self, sections: &BTreeSet<usize>) {
        self.pending.push(SurfaceOp::InsertSections(sections.clone()));
    }

    fn reload_sections(&mut self, sections: &BTreeSet<usize>) {
        self.pending.push(SurfaceOp::ReloadSections(sections.clone()));
    }

    fn delete_items(&mut self, paths: &[IndexPath]) {
        self.pending.push(SurfaceOp::DeleteItems(paths.to_vec()));
    }

    fn reload_items(&mut self, paths: &[IndexPath]) {
        self.pending.push(SurfaceOp::ReloadItems(paths.to_vec()));
    }

    fn did_finish_batch(&mut self, section_count_before: usize, section_count_after: usize) {
        self.finished = Some((section_count_before, section_count_after));
    }
}
