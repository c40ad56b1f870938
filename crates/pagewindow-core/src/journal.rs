//! Journaled section storage.
//!
//! Every structural edit made through [`JournaledMap`] appends one
//! [`JournalEntry`] describing the edit at the index it had when the call was
//! made. [`JournaledMap::take_journal`] hands the log to the translator and
//! starts a new batch; the map itself is not touched by draining.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{Result, WindowError};
use crate::ordered_map::OrderedMap;

/// Change to the items of a single section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionChange {
    /// The value at this offset was replaced.
    UpdateItem(usize),
    /// The item at this offset was removed; later offsets shift down.
    RemoveItem(usize),
    /// The whole section must be redrawn.
    ReloadSection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Append,
    Prepend,
    Modify {
        index: usize,
        changes: Vec<SectionChange>,
    },
    Remove {
        index: usize,
    },
    RemoveAll,
}

/// The drained log of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    pub entries: Vec<JournalEntry>,
    /// Number of sections when the batch started.
    pub section_count_before: usize,
}

impl Journal {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Marks a point a failed operation can roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    journal_len: usize,
}

#[derive(Debug, Clone)]
pub struct JournaledMap<K, V> {
    map: OrderedMap<K, V>,
    entries: Vec<JournalEntry>,
    count_at_batch_start: usize,
}

impl<K, V> Default for JournaledMap<K, V> {
    fn default() -> Self {
        Self {
            map: OrderedMap::default(),
            entries: Vec::new(),
            count_at_batch_start: 0,
        }
    }
}

impl<K, V> JournaledMap<K, V>
where
    K: Hash + Eq + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the current state.
    pub fn map(&self) -> &OrderedMap<K, V> {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn append(&mut self, key: K, value: V) -> Result<()> {
        self.map.append(key, value)?;
        self.entries.push(JournalEntry::Append);
        Ok(())
    }

    pub fn prepend(&mut self, key: K, value: V) -> Result<()> {
        self.map.prepend(key, value)?;
        self.entries.push(JournalEntry::Prepend);
        Ok(())
    }

    /// Replace a section's value and record what changed inside it.
    pub fn replace(&mut self, index: usize, value: V, changes: Vec<SectionChange>) -> Result<V> {
        let previous = self.map.replace(index, value)?;
        self.entries.push(JournalEntry::Modify { index, changes });
        Ok(previous)
    }

    pub fn remove(&mut self, index: usize) -> Result<(K, V)> {
        let removed = self.map.remove(index)?;
        self.entries.push(JournalEntry::Remove { index });
        Ok(removed)
    }

    pub fn remove_all(&mut self) {
        self.map.remove_all();
        self.entries.push(JournalEntry::RemoveAll);
    }

    /// Mutable access for filling in fetched values. Not a structural change,
    /// so nothing is journaled.
    pub fn materialize(&mut self, index: usize) -> Option<&mut V> {
        self.map.get_index_mut(index).map(|(_, value)| value)
    }

    pub fn take_journal(&mut self) -> Journal {
        let journal = Journal {
            entries: std::mem::take(&mut self.entries),
            section_count_before: self.count_at_batch_start,
        };
        self.count_at_batch_start = self.map.len();
        journal
    }

    pub fn pending_entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            journal_len: self.entries.len(),
        }
    }

    /// Undo the appends and prepends recorded since `checkpoint`.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) -> Result<()> {
        while self.entries.len() > checkpoint.journal_len {
            match self.entries.pop() {
                Some(JournalEntry::Append) => {
                    let last = self.map.len().saturating_sub(1);
                    self.map.remove(last)?;
                }
                Some(JournalEntry::Prepend) => {
                    self.map.remove(0)?;
                }
                Some(other) => {
                    return Err(WindowError::invariant(format!(
                        "cannot roll back journal entry {other:?}"
                    )));
                }
                None => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_edit_records_one_entry() {
        let mut map = JournaledMap::new();
        map.append("apr", 2).unwrap();
        map.prepend("jan", 3).unwrap();
        map.append("sep", 5).unwrap();
        map.replace(1, 1, vec![SectionChange::RemoveItem(1)]).unwrap();
        map.remove(0).unwrap();

        let journal = map.take_journal();
        assert_eq!(
            journal.entries,
            vec![
                JournalEntry::Append,
                JournalEntry::Prepend,
                JournalEntry::Append,
                JournalEntry::Modify {
                    index: 1,
                    changes: vec![SectionChange::RemoveItem(1)]
                },
                JournalEntry::Remove { index: 0 },
            ]
        );
        assert_eq!(journal.section_count_before, 0);
    }

    #[test]
    fn draining_leaves_state_and_starts_a_new_batch() {
        let mut map = JournaledMap::new();
        map.append("jan", 3).unwrap();
        map.append("apr", 2).unwrap();
        let _ = map.take_journal();

        assert_eq!(map.len(), 2);
        map.remove_all();
        let journal = map.take_journal();
        assert_eq!(journal.entries, vec![JournalEntry::RemoveAll]);
        assert_eq!(journal.section_count_before, 2);
        assert!(map.take_journal().is_empty());
    }

    #[test]
    fn materializing_is_not_journaled() {
        let mut map = JournaledMap::new();
        map.append("jan", vec![0, 0]).unwrap();
        let _ = map.take_journal();

        if let Some(items) = map.materialize(0) {
            items[1] = 7;
        }
        assert_eq!(map.map().get(&"jan"), Some(&vec![0, 7]));
        assert!(map.take_journal().is_empty());
    }

    #[test]
    fn failed_edits_do_not_journal() {
        let mut map: JournaledMap<&str, u32> = JournaledMap::new();
        assert!(map.remove(0).is_err());
        assert!(map.replace(0, 1, vec![]).is_err());
        assert!(map.pending_entries().is_empty());
    }

    #[test]
    fn rollback_undoes_growth() {
        let mut map = JournaledMap::new();
        map.append("apr", 2).unwrap();
        let checkpoint = map.checkpoint();
        map.prepend("jan", 3).unwrap();
        map.append("sep", 5).unwrap();

        map.rollback(checkpoint).unwrap();
        assert_eq!(map.map().keys().copied().collect::<Vec<_>>(), vec!["apr"]);
        assert_eq!(map.pending_entries(), &[JournalEntry::Append]);
    }
}
