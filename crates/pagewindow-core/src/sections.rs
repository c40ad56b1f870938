//! SectionedWindow - a sparse, sectioned window over a [`SectionSource`]
//!
//! Sections are loaded whole (every row id of the section is known) but their
//! items are only hydrated on demand. Naive indices are window-relative
//! offsets anchored at a loaded section; they may be negative (reaching into
//! earlier sections) or overflow the anchor (reaching into later ones).

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Range;

use tracing::{debug, warn};

use crate::config::WindowConfig;
use crate::error::{Result, WindowError};
use crate::journal::{Checkpoint, Journal, JournalEntry, JournaledMap, SectionChange};
use crate::source::{KeyEnumeration, SectionSource};
use crate::types::{IndexPath, RowId, SectionItem, Slot, WindowItem};

type SlotsOf<S> = Vec<Slot<<S as SectionSource>::Item>>;

/// Result of [`SectionedWindow::reload_sections`], in pre-call section indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionReloads {
    pub reloaded: BTreeSet<usize>,
    pub deleted: BTreeSet<usize>,
}

/// Result of [`SectionedWindow::handle_new_items`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewItemsOutcome {
    pub sections_to_update: BTreeSet<usize>,
    pub did_append_at_end: bool,
    pub did_require_reset: bool,
}

/// A slot coordinate together with the row the caller believes lives there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub path: IndexPath,
    pub row_id: RowId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRemoval {
    /// Everything was removed. Sections left empty were deleted.
    Removed { emptied_sections: BTreeSet<usize> },
    /// `path` did not hold the expected loaded row; nothing was removed.
    Rejected { path: IndexPath },
}

/// Slots excised by [`SectionedWindow::handle_deleted_items`], in pre-call coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedItems {
    pub paths: Vec<IndexPath>,
    pub emptied_sections: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Older,
    Newer,
}

#[derive(Debug, Clone, Copy)]
struct WindowCheckpoint {
    journal: Checkpoint,
    has_fetched_oldest: bool,
    has_fetched_most_recent: bool,
}

pub struct SectionedWindow<S: SectionSource> {
    source: S,
    config: WindowConfig,
    sections: JournaledMap<S::Key, SlotsOf<S>>,
    has_fetched_oldest: bool,
    has_fetched_most_recent: bool,
}

impl<S: SectionSource> SectionedWindow<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            config: WindowConfig::default(),
            sections: JournaledMap::new(),
            has_fetched_oldest: false,
            has_fetched_most_recent: false,
        }
    }

    pub fn with_config(source: S, config: WindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(source)
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

    pub fn has_fetched_oldest(&self) -> bool {
        self.has_fetched_oldest
    }

    pub fn has_fetched_most_recent(&self) -> bool {
        self.has_fetched_most_recent
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Total slots across all loaded sections.
    pub fn item_count(&self) -> usize {
        self.sections.map().values().map(Vec::len).sum()
    }

    pub fn section_keys(&self) -> Vec<S::Key> {
        self.sections.map().keys().cloned().collect()
    }

    pub fn section(&self, index: usize) -> Option<(&S::Key, &[Slot<S::Item>])> {
        self.sections
            .map()
            .get_index(index)
            .map(|(key, slots)| (key, slots.as_slice()))
    }

    pub fn slots(&self, key: &S::Key) -> Option<&[Slot<S::Item>]> {
        self.sections.map().get(key).map(Vec::as_slice)
    }

    /// Per-section slot counts, in window order.
    pub fn section_lengths(&self) -> Vec<usize> {
        self.sections.map().values().map(Vec::len).collect()
    }

    /// Drain the structural changes since the last call. Section loads made
    /// by [`Self::ensure_items_loaded`] are included; callers that already
    /// inserted the sections it returned must not apply them again.
    pub fn take_journal(&mut self) -> Journal {
        self.sections.take_journal()
    }

    pub fn pending_journal(&self) -> &[JournalEntry] {
        self.sections.pending_entries()
    }

    fn section_slots(&self, index: usize) -> Option<&[Slot<S::Item>]> {
        self.section(index).map(|(_, slots)| slots)
    }

    fn section_len(&self, index: usize) -> usize {
        self.section_slots(index).map_or(0, <[_]>::len)
    }

    fn checked_anchor(&self, anchor: usize) -> Result<()> {
        if anchor < self.sections.len() {
            Ok(())
        } else {
            Err(WindowError::invariant(format!(
                "anchor section {anchor} out of range for {} sections",
                self.sections.len()
            )))
        }
    }

    fn checkpoint(&self) -> WindowCheckpoint {
        WindowCheckpoint {
            journal: self.sections.checkpoint(),
            has_fetched_oldest: self.has_fetched_oldest,
            has_fetched_most_recent: self.has_fetched_most_recent,
        }
    }

    fn restore(&mut self, checkpoint: WindowCheckpoint) -> Result<()> {
        self.sections.rollback(checkpoint.journal)?;
        self.has_fetched_oldest = checkpoint.has_fetched_oldest;
        self.has_fetched_most_recent = checkpoint.has_fetched_most_recent;
        Ok(())
    }

    // Sections

    /// Measure at least one section before the oldest loaded one. `batch_size`
    /// is the number of rows to enumerate, so several sections may be added.
    ///
    /// Returns the number of sections prepended.
    pub fn load_earlier_sections(&mut self, batch_size: usize, txn: &S::Txn) -> Result<usize> {
        if self.has_fetched_oldest || batch_size == 0 {
            return Ok(0);
        }

        let first_key = self.sections.map().first().map(|(key, _)| key.clone());
        let enumeration = self.source.keys_before(first_key.as_ref(), batch_size, txn)?;
        let reached_oldest = enumeration.completion.reached_boundary();
        let measured = self.measure(enumeration, Direction::Older, txn)?;
        if let (Some(first), Some((newest, _))) = (&first_key, measured.last())
            && newest >= first
        {
            return Err(WindowError::invariant(format!(
                "earlier section {newest:?} does not precede {first:?}"
            )));
        }

        let was_empty = self.sections.is_empty();
        let added = measured.len();
        for (key, rows) in measured.into_iter().rev() {
            self.sections.prepend(key, unloaded(rows))?;
        }
        if reached_oldest {
            self.has_fetched_oldest = true;
        }
        if was_empty {
            self.has_fetched_most_recent = true;
        }

        debug!(
            target: "SectionedWindow::load_earlier_sections",
            added, batch_size, reached_oldest, "Loaded earlier sections"
        );
        Ok(added)
    }

    /// Measure at least one section after the newest loaded one.
    ///
    /// Returns the number of sections appended.
    pub fn load_later_sections(&mut self, batch_size: usize, txn: &S::Txn) -> Result<usize> {
        if batch_size == 0 {
            debug!("Ignoring load of later sections with an empty batch");
            return Ok(0);
        }
        if self.has_fetched_most_recent {
            return Ok(0);
        }

        let last_key = self.sections.map().last().map(|(key, _)| key.clone());
        let enumeration = self.source.keys_after(last_key.as_ref(), batch_size, txn)?;
        let reached_newest = enumeration.completion.reached_boundary();
        let measured = self.measure(enumeration, Direction::Newer, txn)?;
        if let (Some(last), Some((oldest, _))) = (&last_key, measured.first())
            && oldest <= last
        {
            return Err(WindowError::invariant(format!(
                "later section {oldest:?} does not follow {last:?}"
            )));
        }

        let was_empty = self.sections.is_empty();
        let added = measured.len();
        for (key, rows) in measured {
            self.sections.append(key, unloaded(rows))?;
        }
        if reached_newest {
            self.has_fetched_most_recent = true;
        }
        if was_empty {
            self.has_fetched_oldest = true;
        }

        debug!(
            target: "SectionedWindow::load_later_sections",
            added, batch_size, reached_newest, "Loaded later sections"
        );
        Ok(added)
    }

    /// Initial "most recent" load using the configured batch size.
    pub fn load_most_recent_sections(&mut self, txn: &S::Txn) -> Result<usize> {
        if !self.sections.is_empty() {
            return Err(WindowError::invariant(
                "window already has sections; load earlier or later instead",
            ));
        }
        self.load_earlier_sections(self.config.section_batch_size, txn)
    }

    /// Initial load around a grouping key. Returns the section's item count.
    pub fn load_initial_section(&mut self, key: &S::Key, txn: &S::Txn) -> Result<usize> {
        if !self.sections.is_empty() {
            return Err(WindowError::invariant(
                "window already has sections; load earlier or later instead",
            ));
        }
        let rows = self.source.rows_in_section(key, txn)?;
        let count = rows.len();
        if count > 0 {
            self.sections.append(key.clone(), unloaded(rows))?;
        }
        Ok(count)
    }

    /// Group an enumeration into fully measured sections, oldest first.
    ///
    /// Only the section the enumeration stopped in can be partial, and only
    /// when the enumeration did not reach the edge of the store; that section
    /// is re-measured.
    fn measure(
        &self,
        enumeration: KeyEnumeration<S::Key>,
        direction: Direction,
        txn: &S::Txn,
    ) -> Result<Vec<(S::Key, Vec<RowId>)>> {
        let reached = enumeration.completion.reached_boundary();
        let mut groups: Vec<(S::Key, Vec<RowId>)> = Vec::new();
        for (key, row) in enumeration.visited {
            match groups.last_mut() {
                Some((last, rows)) if *last == key => rows.push(row),
                Some((last, _)) => {
                    let in_order = match direction {
                        Direction::Older => key < *last,
                        Direction::Newer => key > *last,
                    };
                    if !in_order {
                        return Err(WindowError::invariant(format!(
                            "source enumerated section {key:?} out of order after {last:?}"
                        )));
                    }
                    groups.push((key, vec![row]));
                }
                None => groups.push((key, vec![row])),
            }
        }

        if direction == Direction::Older {
            for (_, rows) in &mut groups {
                rows.reverse();
            }
        }
        if !reached && let Some((key, rows)) = groups.last_mut() {
            *rows = self.source.rows_in_section(key, txn)?;
        }
        if direction == Direction::Older {
            groups.reverse();
        }
        groups.retain(|(_, rows)| !rows.is_empty());
        Ok(groups)
    }

    // Index resolution

    /// Resolve an index in or before `anchor` without loading anything.
    ///
    /// Walking off the first loaded section clamps to `[0, 0]` when the oldest
    /// section is known to be loaded, and is inconclusive (`None`) otherwise.
    pub fn resolve_naive_start_index(&self, naive: isize, anchor: usize) -> Option<IndexPath> {
        let anchor_len = self.section_slots(anchor)?.len();
        if naive >= 0 {
            let item = naive as usize;
            return (item <= anchor_len).then_some(IndexPath::new(anchor, item));
        }

        let mut section = anchor;
        let mut offset = naive;
        while offset < 0 {
            if section == 0 {
                return self.has_fetched_oldest.then_some(IndexPath::new(0, 0));
            }
            section -= 1;
            offset += self.section_len(section) as isize;
        }
        Some(IndexPath::new(section, offset as usize))
    }

    /// Like [`Self::resolve_naive_start_index`], but loads earlier sections in
    /// batches of `batch_size` rows until the index resolves or the oldest
    /// section is reached.
    ///
    /// Returns the resolved path and the number of sections prepended, which
    /// shifts every previously known section index.
    pub fn resolve_naive_start_index_loading(
        &mut self,
        naive: isize,
        anchor: usize,
        batch_size: usize,
        txn: &S::Txn,
    ) -> Result<(Option<IndexPath>, usize)> {
        self.checked_anchor(anchor)?;
        let checkpoint = self.checkpoint();
        match self.resolve_start_loading(naive, anchor, batch_size, txn) {
            Ok(resolved) => Ok(resolved),
            Err(err) => {
                self.restore(checkpoint)?;
                Err(err)
            }
        }
    }

    fn resolve_start_loading(
        &mut self,
        naive: isize,
        anchor: usize,
        batch_size: usize,
        txn: &S::Txn,
    ) -> Result<(Option<IndexPath>, usize)> {
        if naive >= 0 {
            return Ok((self.resolve_naive_start_index(naive, anchor), 0));
        }

        let mut section = anchor;
        let mut offset = naive;
        let mut loaded = 0;
        while offset < 0 {
            if section == 0 {
                let added = self.load_earlier_sections(batch_size, txn)?;
                loaded += added;
                section = added;
                if section == 0 {
                    let clamped = self.has_fetched_oldest.then_some(IndexPath::new(0, 0));
                    return Ok((clamped, loaded));
                }
            }
            section -= 1;
            offset += self.section_len(section) as isize;
        }
        Ok((Some(IndexPath::new(section, offset as usize)), loaded))
    }

    /// Resolve an end index in or after `anchor`.
    ///
    /// An end equal to a section's length stays in that section (half-open
    /// ranges). Overflowing the last loaded section clamps to its end when the
    /// newest section is known to be loaded, and is inconclusive otherwise.
    pub fn resolve_naive_end_index(&self, naive: isize, anchor: usize) -> Option<IndexPath> {
        if naive < 0 {
            return None;
        }
        self.section_slots(anchor)?;

        let mut section = anchor;
        let mut limit = naive as usize;
        loop {
            let count = self.section_len(section);
            if limit <= count {
                break;
            }
            limit -= count;
            section += 1;
            if section == self.sections.len() {
                if self.has_fetched_most_recent {
                    section -= 1;
                    limit = count;
                    break;
                }
                return None;
            }
        }
        Some(IndexPath::new(section, limit))
    }

    // Trimming

    /// Drop the leading part of `range` that is already loaded. The walk
    /// never continues past `anchor`, even if later sections are loaded too.
    pub fn trim_loaded_items_at_start(&self, range: Range<isize>, anchor: usize) -> Range<isize> {
        let Some(start) = self.resolve_naive_start_index(range.start, anchor) else {
            return range;
        };

        let mut section = start.section;
        let mut offset = start.item;
        let mut loaded = 0;
        while let Some(slots) = self.section_slots(section) {
            let tail = slots.get(offset..).unwrap_or_default();
            let prefix = tail.iter().take_while(|slot| slot.is_loaded()).count();
            loaded += prefix;
            if prefix < tail.len() || section >= anchor {
                break;
            }
            section += 1;
            offset = 0;
        }

        let trim = loaded.min(range_len(&range)) as isize;
        (range.start + trim)..range.end
    }

    /// Drop the trailing part of `range` that is already loaded. The walk
    /// never continues before `anchor`.
    pub fn trim_loaded_items_at_end(&self, range: Range<isize>, anchor: usize) -> Range<isize> {
        let Some(end) = self.resolve_naive_end_index(range.end, anchor) else {
            return range;
        };

        let mut section = end.section;
        let mut limit = end.item;
        let mut loaded = 0;
        while let Some(slots) = self.section_slots(section) {
            let head = slots.get(..limit).unwrap_or(slots);
            let suffix = head
                .iter()
                .rev()
                .take_while(|slot| slot.is_loaded())
                .count();
            loaded += suffix;
            if suffix < head.len() || section <= anchor {
                break;
            }
            section -= 1;
            limit = self.section_len(section);
        }

        let trim = loaded.min(range_len(&range)) as isize;
        range.start..(range.end - trim)
    }

    // Items

    /// Hydrate every unloaded slot in `range`, loading earlier or later
    /// sections as needed. Loaded slots are never fetched again, and a range
    /// that trims to nothing makes no adapter call.
    ///
    /// Returns the indices of sections that were newly added, which are
    /// always before and/or after the previously loaded ones. The same
    /// sections are journaled as `Prepend`/`Append`, so a caller drives its
    /// surface from one of the two: insert these indices and discard the
    /// call's journal entries, or rely on [`translate`](crate::translate)
    /// of [`Self::take_journal`] alone.
    pub fn ensure_items_loaded(
        &mut self,
        range: Range<isize>,
        anchor: usize,
        txn: &S::Txn,
    ) -> Result<BTreeSet<usize>> {
        self.checked_anchor(anchor)?;
        let trimmed = self.trim_loaded_items_at_end(
            self.trim_loaded_items_at_start(range.clone(), anchor),
            anchor,
        );
        if trimmed.is_empty() {
            return Ok(BTreeSet::new());
        }

        let checkpoint = self.checkpoint();
        match self.load_items(trimmed, anchor, txn) {
            Ok(new_sections) => Ok(new_sections),
            Err(err) => {
                warn!(?range, anchor, %err, "Failed to load items; window left unchanged");
                self.restore(checkpoint)?;
                Err(err)
            }
        }
    }

    fn load_items(
        &mut self,
        trimmed: Range<isize>,
        anchor: usize,
        txn: &S::Txn,
    ) -> Result<BTreeSet<usize>> {
        let len = range_len(&trimmed);
        // A non-negative start may overflow the anchor; the walk below skips
        // forward through later sections instead of resolving it up front.
        let (mut section, mut skip, earlier) = if trimmed.start >= 0 {
            (anchor, trimmed.start as usize, 0)
        } else {
            let (start, earlier) = self.resolve_start_loading(trimmed.start, anchor, len, txn)?;
            let Some(start) = start else {
                return Err(WindowError::invariant(format!(
                    "failed to resolve {trimmed:?} despite loading {earlier} earlier sections"
                )));
            };
            (start.section, start.item, earlier)
        };

        let mut later = 0;
        let mut wanted: Vec<(usize, usize, RowId)> = Vec::new();
        let mut remaining = len;
        while remaining > 0 {
            let Some(slots) = self.section_slots(section) else {
                if self.has_fetched_most_recent {
                    break;
                }
                let added = self.load_later_sections(len, txn)?;
                later += added;
                if added == 0 {
                    break;
                }
                continue;
            };
            if skip >= slots.len() && section + 1 < self.sections.len() {
                skip -= slots.len();
                section += 1;
                continue;
            }

            let end = slots.len().min(skip + remaining);
            for (offset, slot) in slots.iter().enumerate().take(end).skip(skip) {
                if let Slot::Unloaded(row) = slot {
                    wanted.push((section, offset, *row));
                }
            }
            remaining -= end.saturating_sub(skip);
            if skip >= slots.len() && section + 1 == self.sections.len() {
                skip -= slots.len();
            } else {
                skip = 0;
            }
            section += 1;
        }

        if !wanted.is_empty() {
            let rows: Vec<RowId> = wanted.iter().map(|(_, _, row)| *row).collect();
            let mut fetched = self.source.fetch_items(&rows, txn)?;
            let mut hydrated = Vec::with_capacity(wanted.len());
            for (section, offset, row) in wanted {
                let Some(item) = fetched.remove(&row) else {
                    warn!(%row, section, offset, "Row vanished before it could be loaded");
                    continue;
                };
                self.check_item_placement(section, &item)?;
                hydrated.push((section, offset, item));
            }
            for (section, offset, item) in hydrated {
                if let Some(slot) = self
                    .sections
                    .materialize(section)
                    .and_then(|slots| slots.get_mut(offset))
                {
                    *slot = Slot::Loaded(item);
                }
            }
        }

        let total = self.sections.len();
        let mut new_sections: BTreeSet<usize> = (0..earlier).collect();
        new_sections.extend(total - later..total);
        Ok(new_sections)
    }

    fn check_item_placement(&self, section: usize, item: &S::Item) -> Result<()> {
        let (key, _) = self
            .section(section)
            .ok_or_else(|| WindowError::invariant(format!("section {section} disappeared")))?;
        let item_key = item.section_key();
        if item_key == *key {
            Ok(())
        } else {
            Err(WindowError::invariant(format!(
                "row {} belongs to {item_key:?} but was placed in {key:?}",
                item.row_id()
            )))
        }
    }

    pub fn loaded_item(&self, path: IndexPath) -> Option<&S::Item> {
        self.section_slots(path.section)?.get(path.item)?.loaded()
    }

    /// Locate an item by section key and row. A loaded slot must also carry the same unique id.
    pub fn index_path_for(&self, item: &S::Item) -> Option<IndexPath> {
        let section = self.sections.map().index_of(&item.section_key())?;
        let slots = self.section_slots(section)?;
        let offset = slots.iter().rposition(|slot| match slot {
            Slot::Unloaded(row) => *row == item.row_id(),
            Slot::Loaded(loaded) => {
                loaded.row_id() == item.row_id() && loaded.unique_id() == item.unique_id()
            }
        })?;
        Some(IndexPath::new(section, offset))
    }

    /// Next slot after `path`, crossing into the next section if needed.
    pub fn index_path_after(&self, path: IndexPath) -> Option<IndexPath> {
        if path.item + 1 < self.section_len(path.section) {
            return Some(IndexPath::new(path.section, path.item + 1));
        }
        let next = path.section + 1;
        (self.section_len(next) > 0).then_some(IndexPath::new(next, 0))
    }

    pub fn index_path_before(&self, path: IndexPath) -> Option<IndexPath> {
        if path.item > 0 {
            return Some(IndexPath::new(path.section, path.item - 1));
        }
        let previous = path.section.checked_sub(1)?;
        let len = self.section_len(previous);
        (len > 0).then(|| IndexPath::new(previous, len - 1))
    }

    /// Place an item fetched outside the window into its slot, unless the
    /// slot is already loaded. Returns whichever item now occupies the slot.
    pub fn get_or_insert_item(&mut self, item: S::Item, offset: usize) -> Result<S::Item> {
        let key = item.section_key();
        let section = self
            .sections
            .map()
            .index_of(&key)
            .ok_or_else(|| WindowError::NotFound(format!("section {key:?} is not loaded")))?;
        let slot = self
            .sections
            .materialize(section)
            .and_then(|slots| slots.get_mut(offset))
            .ok_or_else(|| {
                WindowError::invariant(format!("offset {offset} out of range in {key:?}"))
            })?;

        match slot {
            Slot::Loaded(existing) => return Ok(existing.clone()),
            Slot::Unloaded(row) if *row != item.row_id() => {
                return Err(WindowError::invariant(format!(
                    "slot {offset} in {key:?} holds row {row}, not {}",
                    item.row_id()
                )));
            }
            Slot::Unloaded(_) => {}
        }
        *slot = Slot::Loaded(item.clone());
        Ok(item)
    }

    // Reconciliation

    /// Re-measure one section and drop its loaded items. A section that
    /// became empty is removed. Returns the new item count.
    pub fn reload_section(&mut self, key: &S::Key, txn: &S::Txn) -> Result<usize> {
        let index = self
            .sections
            .map()
            .index_of(key)
            .ok_or_else(|| WindowError::NotFound(format!("section {key:?} is not loaded")))?;
        let rows = self.source.rows_in_section(key, txn)?;
        let count = rows.len();
        self.apply_reload(index, rows)?;
        Ok(count)
    }

    /// Batch form of [`Self::reload_section`]. Keys that are not loaded are ignored.
    pub fn reload_sections(&mut self, keys: &[S::Key], txn: &S::Txn) -> Result<SectionReloads> {
        let mut measured: BTreeMap<usize, Vec<RowId>> = BTreeMap::new();
        for key in keys {
            let Some(index) = self.sections.map().index_of(key) else {
                debug!(?key, "Skipping reload of a section outside the window");
                continue;
            };
            if !measured.contains_key(&index) {
                measured.insert(index, self.source.rows_in_section(key, txn)?);
            }
        }

        let mut result = SectionReloads::default();
        for (index, rows) in measured.into_iter().rev() {
            if rows.is_empty() {
                result.deleted.insert(index);
            } else {
                result.reloaded.insert(index);
            }
            self.apply_reload(index, rows)?;
        }
        Ok(result)
    }

    fn apply_reload(&mut self, index: usize, rows: Vec<RowId>) -> Result<()> {
        if rows.is_empty() {
            self.sections.remove(index)?;
        } else {
            self.sections
                .replace(index, unloaded(rows), vec![SectionChange::ReloadSection])?;
        }
        Ok(())
    }

    /// React to rows inserted into the store under `keys`.
    ///
    /// Loaded sections are re-measured. Sections newer than the window are
    /// appended only when the window already reached the newest edge. Keys
    /// that cannot be placed unambiguously (older than the window, or between
    /// loaded sections) trigger an immediate [`Self::reset`].
    pub fn handle_new_items(&mut self, keys: &[S::Key], txn: &S::Txn) -> Result<NewItemsOutcome> {
        let keys: BTreeSet<S::Key> = keys.iter().cloned().collect();
        let last_key = self.sections.map().last().map(|(key, _)| key.clone());

        let mut existing = Vec::new();
        let mut newer = Vec::new();
        let mut requires_reset = false;
        for key in keys {
            if self.sections.map().contains_key(&key) {
                existing.push(key);
            } else if last_key.as_ref().is_none_or(|last| key > *last) {
                newer.push(key);
            } else {
                debug!(?key, "New items cannot be placed in the loaded window");
                requires_reset = true;
            }
        }

        if requires_reset {
            self.reset(txn)?;
            return Ok(NewItemsOutcome {
                did_require_reset: true,
                ..NewItemsOutcome::default()
            });
        }

        let mut reloads: BTreeMap<usize, Vec<RowId>> = BTreeMap::new();
        for key in &existing {
            if let Some(index) = self.sections.map().index_of(key) {
                reloads.insert(index, self.source.rows_in_section(key, txn)?);
            }
        }
        let mut appends = Vec::new();
        if self.has_fetched_most_recent {
            for key in newer {
                let rows = self.source.rows_in_section(&key, txn)?;
                if !rows.is_empty() {
                    appends.push((key, rows));
                }
            }
        } else if !newer.is_empty() {
            debug!(count = newer.len(), "Newer sections will be discovered by a later load");
        }

        for (index, rows) in reloads.into_iter().rev() {
            self.apply_reload(index, rows)?;
        }
        let mut outcome = NewItemsOutcome::default();
        for key in &existing {
            if let Some(index) = self.sections.map().index_of(key) {
                outcome.sections_to_update.insert(index);
            }
        }
        for (key, rows) in appends {
            self.sections.append(key, unloaded(rows))?;
            outcome.did_append_at_end = true;
        }
        if outcome.did_append_at_end {
            self.has_fetched_most_recent = false;
        }
        Ok(outcome)
    }

    /// Re-fetch loaded slots whose rows changed. Unloaded slots are left
    /// alone; rows that no longer resolve become unloaded again.
    ///
    /// Returns the affected paths. A row that moved to a different section
    /// cannot be reconciled in place and resets the window instead.
    pub fn handle_updated_items(&mut self, rows: &[RowId], txn: &S::Txn) -> Result<Vec<IndexPath>> {
        let changed: HashSet<RowId> = rows.iter().copied().collect();
        let mut targets: Vec<(IndexPath, RowId)> = Vec::new();
        for (section, slots) in self.sections.map().values().enumerate() {
            for (item, slot) in slots.iter().enumerate() {
                if let Slot::Loaded(loaded) = slot
                    && changed.contains(&loaded.row_id())
                {
                    targets.push((IndexPath::new(section, item), loaded.row_id()));
                }
            }
        }
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let request: Vec<RowId> = targets.iter().map(|(_, row)| *row).collect();
        let mut fetched = self.source.fetch_items(&request, txn)?;
        for (path, row) in &targets {
            if let Some(item) = fetched.get(row)
                && self.check_item_placement(path.section, item).is_err()
            {
                debug!(%row, "Updated row moved between sections; resetting");
                self.reset(txn)?;
                return Ok(Vec::new());
            }
        }

        let mut by_section: BTreeMap<usize, Vec<(usize, Slot<S::Item>)>> = BTreeMap::new();
        for (path, row) in &targets {
            let slot = fetched
                .remove(row)
                .map_or(Slot::Unloaded(*row), Slot::Loaded);
            by_section.entry(path.section).or_default().push((path.item, slot));
        }
        for (section, updates) in by_section {
            let mut slots = self
                .sections
                .materialize(section)
                .map(std::mem::take)
                .unwrap_or_default();
            let mut changes = Vec::with_capacity(updates.len());
            for (item, slot) in updates {
                if let Some(existing) = slots.get_mut(item) {
                    *existing = slot;
                    changes.push(SectionChange::UpdateItem(item));
                }
            }
            self.sections.replace(section, slots, changes)?;
        }

        Ok(targets.into_iter().map(|(path, _)| path).collect())
    }

    /// Excise slots (loaded or not) whose rows were deleted from the store.
    pub fn handle_deleted_items(&mut self, rows: &[RowId]) -> Result<RemovedItems> {
        let deleted: HashSet<RowId> = rows.iter().copied().collect();
        let mut paths = Vec::new();
        for (section, slots) in self.sections.map().values().enumerate() {
            for (item, slot) in slots.iter().enumerate() {
                if deleted.contains(&slot.row_id()) {
                    paths.push(IndexPath::new(section, item));
                }
            }
        }
        let emptied_sections = self.remove_paths(&paths)?;
        Ok(RemovedItems {
            paths,
            emptied_sections,
        })
    }

    /// Remove specific loaded items. Every reference is checked against the
    /// slot it names before anything is removed; a single stale reference
    /// rejects the whole request.
    pub fn remove_loaded_items(&mut self, items: &[ItemRef]) -> Result<ItemRemoval> {
        let mut refs = items.to_vec();
        refs.sort_by_key(|item| item.path);
        refs.dedup_by_key(|item| item.path);

        for item in &refs {
            let matches = self
                .loaded_item(item.path)
                .is_some_and(|loaded| loaded.row_id() == item.row_id);
            if !matches {
                warn!(
                    path = %item.path,
                    row = %item.row_id,
                    "Rejecting removal of a stale coordinate"
                );
                return Ok(ItemRemoval::Rejected { path: item.path });
            }
        }

        let paths: Vec<IndexPath> = refs.iter().map(|item| item.path).collect();
        let emptied_sections = self.remove_paths(&paths)?;
        Ok(ItemRemoval::Removed { emptied_sections })
    }

    /// `paths` must be valid. Sections are processed from the back so earlier
    /// coordinates stay valid while later ones are removed.
    fn remove_paths(&mut self, paths: &[IndexPath]) -> Result<BTreeSet<usize>> {
        let mut by_section: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for path in paths {
            by_section.entry(path.section).or_default().insert(path.item);
        }

        let mut emptied = BTreeSet::new();
        for (section, offsets) in by_section.into_iter().rev() {
            let len = self.section_len(section);
            if offsets.len() >= len {
                self.sections.remove(section)?;
                emptied.insert(section);
                continue;
            }

            let mut slots = self
                .sections
                .materialize(section)
                .map(std::mem::take)
                .unwrap_or_default();
            let mut changes = Vec::with_capacity(offsets.len());
            for &offset in offsets.iter().rev() {
                if offset < slots.len() {
                    slots.remove(offset);
                    changes.push(SectionChange::RemoveItem(offset));
                }
            }
            self.sections.replace(section, slots, changes)?;
        }
        Ok(emptied)
    }

    /// Rebuild the window from the store.
    ///
    /// The rebuild starts at the oldest previously loaded section that still
    /// has rows and walks forward until it reaches the previously newest
    /// section (or the newest edge). If nothing survived, the newest sections
    /// are loaded instead. Loaded items are dropped.
    ///
    /// The oldest flag stays set only if it was set, the oldest section
    /// survived, and a one-row probe finds nothing before it. The newest flag
    /// is set when the walk runs into the newest edge; otherwise it follows
    /// the same rule as the oldest.
    pub fn reset(&mut self, txn: &S::Txn) -> Result<()> {
        let old_keys = self.section_keys();
        let (Some(old_first), Some(old_last)) = (old_keys.first(), old_keys.last()) else {
            self.has_fetched_oldest = false;
            self.has_fetched_most_recent = false;
            return Ok(());
        };
        let old_lengths = self.section_lengths();

        let mut rebuilt: Vec<(S::Key, Vec<RowId>)> = Vec::new();
        let mut anchor = None;
        for (position, key) in old_keys.iter().enumerate() {
            let rows = self.source.rows_in_section(key, txn)?;
            if !rows.is_empty() {
                rebuilt.push((key.clone(), rows));
                anchor = Some(position);
                break;
            }
        }

        let mut proved_newest = false;
        if let Some(position) = anchor {
            let mut batch = old_lengths[position + 1..].iter().sum::<usize>().max(1);
            while rebuilt.last().is_some_and(|(key, _)| key < old_last) {
                let last = rebuilt.last().map(|(key, _)| key.clone());
                let enumeration = self.source.keys_after(last.as_ref(), batch, txn)?;
                let reached = enumeration.completion.reached_boundary();
                let measured = self.measure(enumeration, Direction::Newer, txn)?;
                let progressed = !measured.is_empty();
                rebuilt.extend(measured);
                if reached {
                    proved_newest = true;
                    break;
                }
                if !progressed {
                    break;
                }
                batch = self.config.reset_follow_batch_size;
            }
        } else {
            let batch = old_lengths.iter().sum::<usize>().max(1);
            let enumeration = self.source.keys_before(None, batch, txn)?;
            rebuilt = self.measure(enumeration, Direction::Older, txn)?;
            proved_newest = true;
        }

        if rebuilt.windows(2).any(|pair| pair[0].0 >= pair[1].0) {
            return Err(WindowError::invariant("rebuilt sections are not strictly ordered"));
        }

        let new_first = rebuilt.first().map(|(key, _)| key.clone());
        let new_last = rebuilt.last().map(|(key, _)| key.clone());
        let oldest_survived = new_first.as_ref() == Some(old_first);
        let newest_survived = rebuilt.iter().any(|(key, _)| key == old_last);

        let has_fetched_oldest = if self.has_fetched_oldest && oldest_survived {
            self.source
                .keys_before(new_first.as_ref(), 1, txn)?
                .completion
                .reached_boundary()
        } else {
            false
        };
        let has_fetched_most_recent = if proved_newest {
            true
        } else if self.has_fetched_most_recent && newest_survived {
            self.source
                .keys_after(new_last.as_ref(), 1, txn)?
                .completion
                .reached_boundary()
        } else {
            false
        };

        self.apply_rebuild(&old_keys, rebuilt)?;
        self.has_fetched_oldest = has_fetched_oldest;
        self.has_fetched_most_recent = has_fetched_most_recent;
        debug!(
            target: "SectionedWindow::reset",
            sections = self.sections.len(),
            has_fetched_oldest,
            has_fetched_most_recent,
            "Reset window"
        );
        Ok(())
    }

    /// Swap in rebuilt sections. When the result is the surviving sections
    /// followed by new ones at the tip, the change is journaled section by
    /// section; anything else is journaled as remove-all plus appends.
    fn apply_rebuild(
        &mut self,
        old_keys: &[S::Key],
        rebuilt: Vec<(S::Key, Vec<RowId>)>,
    ) -> Result<()> {
        let old: HashSet<&S::Key> = old_keys.iter().collect();
        let new: HashSet<&S::Key> = rebuilt.iter().map(|(key, _)| key).collect();
        let survivors = rebuilt
            .iter()
            .take_while(|(key, _)| old.contains(key))
            .count();
        let tip_is_new = rebuilt[survivors..].iter().all(|(key, _)| !old.contains(key));

        if survivors == 0 || !tip_is_new {
            self.sections.remove_all();
            for (key, rows) in rebuilt {
                self.sections.append(key, unloaded(rows))?;
            }
            return Ok(());
        }

        for index in (0..old_keys.len()).rev() {
            if !new.contains(&old_keys[index]) {
                self.sections.remove(index)?;
            }
        }
        let mut rebuilt = rebuilt.into_iter();
        for index in 0..survivors {
            if let Some((key, rows)) = rebuilt.next() {
                if self.section(index).map(|(existing, _)| existing) != Some(&key) {
                    return Err(WindowError::invariant(format!(
                        "surviving section {key:?} is not at index {index}"
                    )));
                }
                self.sections
                    .replace(index, unloaded(rows), vec![SectionChange::ReloadSection])?;
            }
        }
        for (key, rows) in rebuilt {
            self.sections.append(key, unloaded(rows))?;
        }
        Ok(())
    }

    /// Check the structural invariants of the window.
    pub fn check_invariants(&self) -> Result<()> {
        let mut seen_rows = HashSet::new();
        let mut previous: Option<&S::Key> = None;
        for (key, slots) in self.sections.map().iter() {
            if previous.is_some_and(|previous| previous >= key) {
                return Err(WindowError::invariant(format!("section {key:?} is out of order")));
            }
            if slots.is_empty() {
                return Err(WindowError::invariant(format!("section {key:?} is empty")));
            }
            for slot in slots {
                if !seen_rows.insert(slot.row_id()) {
                    return Err(WindowError::invariant(format!(
                        "row {} appears twice",
                        slot.row_id()
                    )));
                }
                if let Slot::Loaded(item) = slot
                    && item.section_key() != *key
                {
                    return Err(WindowError::invariant(format!(
                        "row {} is loaded into {key:?}",
                        item.row_id()
                    )));
                }
            }
            previous = Some(key);
        }
        Ok(())
    }
}

fn unloaded<T>(rows: Vec<RowId>) -> Vec<Slot<T>> {
    rows.into_iter().map(Slot::Unloaded).collect()
}

fn range_len(range: &Range<isize>) -> usize {
    (range.end - range.start).max(0) as usize
}
