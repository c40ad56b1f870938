//! Merging of page fetches that complete out of order.

use std::collections::HashSet;
use std::ops::Range;

use crate::types::{RowId, WindowItem};

/// A contiguous run of rows, oldest first, with the boundary flags observed
/// when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedBatch<T> {
    pub rows: Vec<T>,
    pub can_load_older: bool,
    pub can_load_newer: bool,
}

impl<T: WindowItem + Clone> LoadedBatch<T> {
    pub fn ids(&self) -> Vec<&str> {
        self.rows.iter().map(WindowItem::unique_id).collect()
    }

    /// Union with a batch that overlaps this one at an edge (or lies inside
    /// it). Existing order is kept and each edge flag comes from the batch
    /// that reaches further toward that edge. `None` if the batches share no
    /// ids, disagree about the order of the shared run, or the candidate's
    /// extra rows repeat an id or break the row order.
    pub fn merged_with(&self, candidate: &LoadedBatch<T>) -> Option<LoadedBatch<T>> {
        let plan = checked_merge_plan(&keyed(&self.rows), &keyed(&candidate.rows))?;

        let mut rows = Vec::with_capacity(plan.older.len() + self.rows.len() + plan.newer.len());
        rows.extend_from_slice(candidate.rows.get(plan.older.clone()).unwrap_or_default());
        rows.extend_from_slice(&self.rows);
        rows.extend_from_slice(candidate.rows.get(plan.newer.clone()).unwrap_or_default());

        Some(LoadedBatch {
            rows,
            can_load_older: if plan.older_from_candidate {
                candidate.can_load_older
            } else {
                self.can_load_older
            },
            can_load_newer: if plan.newer_from_candidate {
                candidate.can_load_newer
            } else {
                self.can_load_newer
            },
        })
    }
}

/// How a candidate id list extends an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MergePlan {
    /// Candidate positions to place before the existing ids.
    pub older: Range<usize>,
    /// Candidate positions to place after the existing ids.
    pub newer: Range<usize>,
    pub older_from_candidate: bool,
    pub newer_from_candidate: bool,
}

pub(crate) fn keyed<T: WindowItem>(rows: &[T]) -> Vec<(RowId, &str)> {
    rows.iter().map(|row| (row.row_id(), row.unique_id())).collect()
}

/// [`merge_plan`], then the checks a page load makes on its rows: every row
/// taken from the candidate must be new, and row ids must ascend across the
/// merged run.
pub(crate) fn checked_merge_plan<'a>(
    existing: &[(RowId, &'a str)],
    candidate: &[(RowId, &'a str)],
) -> Option<MergePlan> {
    let existing_ids: Vec<&str> = existing.iter().map(|(_, id)| *id).collect();
    let candidate_ids: Vec<&str> = candidate.iter().map(|(_, id)| *id).collect();
    let plan = merge_plan(&existing_ids, &candidate_ids)?;

    let older = candidate.get(plan.older.clone())?;
    let newer = candidate.get(plan.newer.clone())?;
    let mut seen: HashSet<&'a str> = existing_ids.into_iter().collect();
    let fresh = older.iter().chain(newer).all(|(_, id)| seen.insert(*id));

    let rows: Vec<RowId> = older
        .iter()
        .chain(existing)
        .chain(newer)
        .map(|(row, _)| *row)
        .collect();
    let ascending = rows.windows(2).all(|pair| pair[0] < pair[1]);
    (fresh && ascending).then_some(plan)
}

pub(crate) fn merge_plan(existing: &[&str], candidate: &[&str]) -> Option<MergePlan> {
    let (Some(first), Some(last)) = (existing.first(), existing.last()) else {
        return Some(MergePlan {
            older: 0..0,
            newer: 0..candidate.len(),
            older_from_candidate: true,
            newer_from_candidate: true,
        });
    };

    let start = candidate.iter().position(|id| id == first);
    let end = candidate.iter().position(|id| id == last);
    match (start, end) {
        (Some(start), Some(end)) => {
            (end >= start && candidate.get(start..=end)? == existing).then(|| MergePlan {
                older: 0..start,
                newer: end + 1..candidate.len(),
                older_from_candidate: true,
                newer_from_candidate: true,
            })
        }
        (Some(start), None) => {
            let shared = &candidate[start..];
            (existing.starts_with(shared)).then(|| MergePlan {
                older: 0..start,
                newer: 0..0,
                older_from_candidate: true,
                newer_from_candidate: false,
            })
        }
        (None, Some(end)) => {
            let shared = &candidate[..=end];
            (existing.ends_with(shared)).then(|| MergePlan {
                older: 0..0,
                newer: end + 1..candidate.len(),
                older_from_candidate: false,
                newer_from_candidate: true,
            })
        }
        (None, None) => {
            let contained = !candidate.is_empty()
                && existing
                    .windows(candidate.len())
                    .any(|window| window == candidate);
            contained.then_some(MergePlan {
                older: 0..0,
                newer: 0..0,
                older_from_candidate: false,
                newer_from_candidate: false,
            })
        }
    }
}
