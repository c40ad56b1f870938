//! UpdateTranslator - turns a drained [`Journal`] into surface operations
//!
//! Journal entries carry indices as they were at the time of each edit. The
//! translator replays the entries over a list of section origins so every
//! deletion and reload can be expressed against the section's pre-batch index,
//! and every insertion against its post-batch index.

use std::collections::BTreeSet;

use tracing::debug;

use crate::journal::{Journal, JournalEntry, SectionChange};
use crate::surface::{RenderSurface, SurfaceOp};
use crate::types::IndexPath;

/// Surface operations for one batch, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateBatch {
    pub ops: Vec<SurfaceOp>,
    pub section_count_before: usize,
    pub section_count_after: usize,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Deliver the operations and close the batch.
    pub fn apply_to<R: RenderSurface + ?Sized>(&self, surface: &mut R) {
        for op in &self.ops {
            surface.apply(op);
        }
        surface.did_finish_batch(self.section_count_before, self.section_count_after);
    }
}

#[derive(Debug, Clone, Copy)]
enum Origin {
    Original(usize),
    Inserted,
}

#[derive(Debug, Default)]
struct OriginalSection {
    deleted: bool,
    reload: bool,
    /// Pre-batch offsets of removed items.
    removed: BTreeSet<usize>,
    /// Pre-batch offsets of updated items.
    updated: BTreeSet<usize>,
}

impl OriginalSection {
    /// Map an offset in the section's current state back to its pre-batch offset.
    fn original_offset(&self, offset: usize) -> usize {
        let mut original = offset;
        for &removed in &self.removed {
            if removed <= original {
                original += 1;
            } else {
                break;
            }
        }
        original
    }

    fn record(&mut self, change: SectionChange) {
        if self.reload {
            return;
        }
        match change {
            SectionChange::ReloadSection => {
                self.reload = true;
                self.removed.clear();
                self.updated.clear();
            }
            SectionChange::UpdateItem(offset) => {
                let original = self.original_offset(offset);
                self.updated.insert(original);
            }
            SectionChange::RemoveItem(offset) => {
                let original = self.original_offset(offset);
                self.updated.remove(&original);
                self.removed.insert(original);
            }
        }
    }
}

pub fn translate(journal: &Journal) -> UpdateBatch {
    let before = journal.section_count_before;
    let mut sections: Vec<Origin> = (0..before).map(Origin::Original).collect();
    let mut originals: Vec<OriginalSection> =
        (0..before).map(|_| OriginalSection::default()).collect();

    for entry in &journal.entries {
        match entry {
            JournalEntry::Append => sections.push(Origin::Inserted),
            JournalEntry::Prepend => sections.insert(0, Origin::Inserted),
            JournalEntry::Modify { index, changes } => match sections.get(*index) {
                Some(Origin::Original(original)) => {
                    if let Some(state) = originals.get_mut(*original) {
                        for change in changes {
                            state.record(*change);
                        }
                    }
                }
                Some(Origin::Inserted) => {}
                None => debug!(index, "Ignoring modification of an unknown section"),
            },
            JournalEntry::Remove { index } => {
                if *index >= sections.len() {
                    debug!(index, "Ignoring removal of an unknown section");
                    continue;
                }
                if let Origin::Original(original) = sections.remove(*index)
                    && let Some(state) = originals.get_mut(original)
                {
                    state.deleted = true;
                }
            }
            JournalEntry::RemoveAll => {
                for origin in sections.drain(..) {
                    if let Origin::Original(original) = origin
                        && let Some(state) = originals.get_mut(original)
                    {
                        state.deleted = true;
                    }
                }
            }
        }
    }

    let mut deleted_sections = BTreeSet::new();
    let mut reloaded_sections = BTreeSet::new();
    let mut deleted_items = Vec::new();
    let mut reloaded_items = Vec::new();
    for (index, state) in originals.iter().enumerate() {
        if state.deleted {
            deleted_sections.insert(index);
        } else if state.reload {
            reloaded_sections.insert(index);
        } else {
            deleted_items.extend(state.removed.iter().map(|&item| IndexPath::new(index, item)));
            reloaded_items.extend(state.updated.iter().map(|&item| IndexPath::new(index, item)));
        }
    }
    let inserted_sections: BTreeSet<usize> = sections
        .iter()
        .enumerate()
        .filter_map(|(index, origin)| matches!(origin, Origin::Inserted).then_some(index))
        .collect();

    let mut ops = Vec::new();
    if !deleted_sections.is_empty() {
        ops.push(SurfaceOp::DeleteSections(deleted_sections));
    }
    if !inserted_sections.is_empty() {
        ops.push(SurfaceOp::InsertSections(inserted_sections));
    }
    if !reloaded_sections.is_empty() {
        ops.push(SurfaceOp::ReloadSections(reloaded_sections));
    }
    if !deleted_items.is_empty() {
        ops.push(SurfaceOp::DeleteItems(deleted_items));
    }
    if !reloaded_items.is_empty() {
        ops.push(SurfaceOp::ReloadItems(reloaded_items));
    }

    debug!(
        target: "translator::translate",
        entries = journal.entries.len(),
        ops = ops.len(),
        before,
        after = sections.len(),
        "Translated journal"
    );
    UpdateBatch {
        ops,
        section_count_before: before,
        section_count_after: sections.len(),
    }
}
