use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned row identifier. Increases with insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Absolute coordinate of a slot: section-major, item-minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexPath {
    pub section: usize,
    pub item: usize,
}

impl IndexPath {
    pub fn new(section: usize, item: usize) -> Self {
        Self { section, item }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.item)
    }
}

/// A record the window can hold.
pub trait WindowItem {
    fn unique_id(&self) -> &str;
    fn row_id(&self) -> RowId;
}

/// A record that belongs to exactly one section.
pub trait SectionItem<K>: WindowItem {
    fn section_key(&self) -> K;
}

/// A position whose identity is known. The value may not have been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<T> {
    Unloaded(RowId),
    Loaded(T),
}

impl<T: WindowItem> Slot<T> {
    pub fn row_id(&self) -> RowId {
        match self {
            Slot::Unloaded(row_id) => *row_id,
            Slot::Loaded(item) => item.row_id(),
        }
    }
}

impl<T> Slot<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Slot::Loaded(_))
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            Slot::Loaded(item) => Some(item),
            Slot::Unloaded(_) => None,
        }
    }
}

/// How an adapter enumeration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationCompletion {
    /// The requested number of items was visited; more may follow.
    Finished,
    /// Fewer items than requested were visited; the edge of the store was reached.
    ReachedBoundary,
}

impl EnumerationCompletion {
    pub fn for_visited(visited: usize, requested: usize) -> Self {
        if visited < requested {
            Self::ReachedBoundary
        } else {
            Self::Finished
        }
    }

    pub fn reached_boundary(self) -> bool {
        self == Self::ReachedBoundary
    }
}

/// Calendar month (UTC) used to group gallery media into sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GalleryMonth {
    year: i32,
    month: u32,
}

impl GalleryMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    /// Month containing the given millisecond timestamp. Out-of-range
    /// timestamps map to the Unix epoch month.
    pub fn from_millis(millis: i64) -> Self {
        let date: DateTime<Utc> = DateTime::from_timestamp_millis(millis).unwrap_or_default();
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Inclusive start of the month, in milliseconds since the epoch.
    pub fn start_millis(&self) -> i64 {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map_or(i64::MIN, |start| start.and_utc().timestamp_millis())
    }

    /// Exclusive end of the month.
    pub fn end_millis(&self) -> i64 {
        self.next().start_millis()
    }

    pub fn contains_millis(&self, millis: i64) -> bool {
        (self.start_millis()..self.end_millis()).contains(&millis)
    }
}

impl fmt::Display for GalleryMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn millis(year: i32, month: u32, day: u32) -> i64 {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[rstest]
    #[case(2021, 1, 1, 2021, 1)]
    #[case(2021, 4, 13, 2021, 4)]
    #[case(2021, 12, 31, 2021, 12)]
    #[case(1970, 1, 1, 1970, 1)]
    fn month_is_derived_from_timestamp(
        #[case] year: i32,
        #[case] month: u32,
        #[case] day: u32,
        #[case] expected_year: i32,
        #[case] expected_month: u32,
    ) {
        let key = GalleryMonth::from_millis(millis(year, month, day));
        assert_eq!(key, GalleryMonth::new(expected_year, expected_month).unwrap());
    }

    #[test]
    fn month_interval_is_half_open() {
        let april = GalleryMonth::new(2021, 4).unwrap();
        assert!(april.contains_millis(april.start_millis()));
        assert!(!april.contains_millis(april.end_millis()));
        assert_eq!(april.end_millis(), GalleryMonth::new(2021, 5).unwrap().start_millis());
    }

    #[test]
    fn december_rolls_into_next_year() {
        let december = GalleryMonth::new(2021, 12).unwrap();
        assert_eq!(december.next(), GalleryMonth::new(2022, 1).unwrap());
        assert!(december < december.next());
    }

    #[test]
    fn invalid_months_are_rejected() {
        assert!(GalleryMonth::new(2021, 0).is_none());
        assert!(GalleryMonth::new(2021, 13).is_none());
    }

    #[test]
    fn enumeration_completion_tracks_short_reads() {
        assert_eq!(
            EnumerationCompletion::for_visited(3, 4),
            EnumerationCompletion::ReachedBoundary
        );
        assert_eq!(EnumerationCompletion::for_visited(4, 4), EnumerationCompletion::Finished);
        assert_eq!(EnumerationCompletion::for_visited(0, 0), EnumerationCompletion::Finished);
    }
}
