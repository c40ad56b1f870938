//! Rendering surface seam.
//!
//! A surface receives one batch at a time. Deletions and reloads are in
//! pre-batch coordinates, insertions in post-batch coordinates, matching how
//! list and grid views apply batched updates.

use std::collections::BTreeSet;

use crate::types::IndexPath;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOp {
    DeleteSections(BTreeSet<usize>),
    InsertSections(BTreeSet<usize>),
    ReloadSections(BTreeSet<usize>),
    DeleteItems(Vec<IndexPath>),
    ReloadItems(Vec<IndexPath>),
}

pub trait RenderSurface {
    fn delete_sections(&mut self, sections: &BTreeSet<usize>);
    fn insert_sections(&mut self, sections: &BTreeSet<usize>);
    fn reload_sections(&mut self, sections: &BTreeSet<usize>);
    fn delete_items(&mut self, paths: &[IndexPath]);
    fn reload_items(&mut self, paths: &[IndexPath]);

    /// Called once after every operation of a batch has been delivered.
    fn did_finish_batch(&mut self, section_count_before: usize, section_count_after: usize);

    fn apply(&mut self, op: &SurfaceOp) {
        match op {
            SurfaceOp::DeleteSections(sections) => self.delete_sections(sections),
            SurfaceOp::InsertSections(sections) => self.insert_sections(sections),
            SurfaceOp::ReloadSections(sections) => self.reload_sections(sections),
            SurfaceOp::DeleteItems(paths) => self.delete_items(paths),
            SurfaceOp::ReloadItems(paths) => self.reload_items(paths),
        }
    }
}

/// A batch as delivered to an [`OperationLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedBatch {
    pub ops: Vec<SurfaceOp>,
    pub section_count_before: usize,
    pub section_count_after: usize,
}

/// Records batches so they can be handed to a UI thread.
#[derive(Debug, Default)]
pub struct OperationLog {
    pending: Vec<SurfaceOp>,
    batches: Vec<LoggedBatch>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed batches, oldest first. Operations of an unfinished batch stay.
    pub fn drain(&mut self) -> Vec<LoggedBatch> {
        std::mem::take(&mut self.batches)
    }

    pub fn has_pending_ops(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl RenderSurface for OperationLog {
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
        self.batches.push(LoggedBatch {
            ops: std::mem::take(&mut self.pending),
            section_count_before,
            section_count_after,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_grouped_until_finished() {
        let mut log = OperationLog::new();
        log.insert_sections(&BTreeSet::from([0, 1]));
        assert!(log.drain().is_empty());
        assert!(log.has_pending_ops());

        log.did_finish_batch(0, 2);
        log.reload_items(&[IndexPath::new(1, 0)]);

        let batches = log.drain();
        assert_eq!(
            batches,
            vec![LoggedBatch {
                ops: vec![SurfaceOp::InsertSections(BTreeSet::from([0, 1]))],
                section_count_before: 0,
                section_count_after: 2,
            }]
        );
        assert!(log.has_pending_ops());
    }

    #[test]
    fn apply_dispatches_to_matching_method() {
        let mut log = OperationLog::new();
        log.apply(&SurfaceOp::DeleteItems(vec![IndexPath::new(0, 2)]));
        log.did_finish_batch(1, 1);
        assert_eq!(
            log.drain()[0].ops,
            vec![SurfaceOp::DeleteItems(vec![IndexPath::new(0, 2)])]
        );
    }
}
