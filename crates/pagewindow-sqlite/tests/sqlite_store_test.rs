use chrono::{TimeZone, Utc};
use pagewindow_core::source::{MessageSource, SectionSource};
use pagewindow_core::{
    FlatWindow, GalleryMonth, IndexPath, RowId, SectionedWindow, Slot, WindowConfig, WindowItem,
};
use pagewindow_sqlite::{SqliteMediaSource, SqliteMessageSource, SqliteStore, StoreError};
use rstest::rstest;
use tempfile::TempDir;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .try_init();
}

fn noon(year: i32, month: u32, day: u32) -> i64 {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
        .single()
        .unwrap()
        .timestamp_millis()
}

fn month(year: i32, month: u32) -> GalleryMonth {
    GalleryMonth::new(year, month).unwrap()
}

fn add_media(store: &SqliteStore, received_at_ms: i64) -> RowId {
    store
        .insert_media(&Uuid::new_v4().to_string(), received_at_ms, None)
        .unwrap()
}

/// Three items in January 2021, two in April and five in September.
fn gallery_store() -> (SqliteStore, Vec<RowId>) {
    let store = SqliteStore::open_in_memory().unwrap();
    let days = [
        (1, 1),
        (1, 2),
        (1, 20),
        (4, 1),
        (4, 13),
        (9, 9),
        (9, 9),
        (9, 9),
        (9, 30),
        (9, 30),
    ];
    let rows = days
        .iter()
        .map(|&(m, d)| add_media(&store, noon(2021, m, d)))
        .collect();
    (store, rows)
}

/// `count` messages with ids `msg-1` through `msg-{count}`.
fn transcript_store(count: usize) -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    for index in 1..=count {
        let sent_at = noon(2024, 3, 1) + i64::try_from(index).unwrap() * 1_000;
        store
            .insert_message(&format!("msg-{index}"), "alice", &format!("message {index}"), sent_at)
            .unwrap();
    }
    store
}

fn small_config() -> WindowConfig {
    WindowConfig {
        initial_load_count: 10,
        page_size: 10,
        max_loaded_count: 50,
        ..WindowConfig::default()
    }
}

fn msg_ids(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|index| format!("msg-{index}")).collect()
}

fn window_ids(window: &FlatWindow<SqliteMessageSource>) -> Vec<String> {
    window.ids().into_iter().map(str::to_string).collect()
}

#[test]
fn test_sqlite_store_persists_across_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("gallery.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        add_media(&store, noon(2021, 4, 1));
        add_media(&store, noon(2021, 4, 13));
    }

    let mut store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.path(), Some(path.as_path()));
    let tx = store.read_transaction().unwrap();
    let rows = SqliteMediaSource::new()
        .rows_in_section(&month(2021, 4), &tx)
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn test_sqlite_store_rejects_unknown_schema_version() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gallery.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.connection().pragma_update(None, "user_version", 99).unwrap();
    }

    let Err(err) = SqliteStore::open(&path) else {
        panic!("expected a schema version mismatch");
    };
    assert!(matches!(err, StoreError::SchemaVersionMismatch { expected: 1, got: 99 }));
}

#[test]
fn test_sqlite_media_rows_in_section_are_ascending() {
    init_tracing();
    let (mut store, rows) = gallery_store();
    // Same day as the oldest September rows, inserted last.
    let late = add_media(&store, noon(2021, 9, 9));

    let tx = store.read_transaction().unwrap();
    let source = SqliteMediaSource::new();
    let september = source.rows_in_section(&month(2021, 9), &tx).unwrap();
    assert_eq!(september, vec![rows[5], rows[6], rows[7], late, rows[8], rows[9]]);
    assert!(source.rows_in_section(&month(2021, 2), &tx).unwrap().is_empty());
}

#[rstest]
#[case::newest_rows(None, 4, vec![(9, 4)], false)]
#[case::before_september(Some((2021, 9)), 10, vec![(4, 2), (1, 3)], true)]
#[case::exact_fit(Some((2021, 9)), 5, vec![(4, 2), (1, 3)], false)]
#[case::before_january(Some((2021, 1)), 3, vec![], true)]
fn test_sqlite_media_keys_before(
    #[case] key: Option<(i32, u32)>,
    #[case] count: usize,
    #[case] expected: Vec<(u32, usize)>,
    #[case] reached_boundary: bool,
) {
    init_tracing();
    let (mut store, _) = gallery_store();
    let tx = store.read_transaction().unwrap();
    let key = key.map(|(year, m)| month(year, m));

    let enumeration = SqliteMediaSource::new()
        .keys_before(key.as_ref(), count, &tx)
        .unwrap();

    let months: Vec<u32> = enumeration
        .visited
        .iter()
        .map(|(key, _)| key.month())
        .collect();
    let runs: Vec<(u32, usize)> = months
        .chunk_by(|a, b| a == b)
        .map(|run| (run[0], run.len()))
        .collect();
    assert_eq!(runs, expected);
    assert_eq!(enumeration.completion.reached_boundary(), reached_boundary);
}

#[test]
fn test_sqlite_media_keys_after_starts_past_the_month() {
    init_tracing();
    let (mut store, rows) = gallery_store();
    let tx = store.read_transaction().unwrap();
    let source = SqliteMediaSource::new();

    let after_january = source.keys_after(Some(&month(2021, 1)), 2, &tx).unwrap();
    assert_eq!(
        after_january.visited,
        vec![(month(2021, 4), rows[3]), (month(2021, 4), rows[4])]
    );
    assert!(!after_january.completion.reached_boundary());

    let from_oldest = source.keys_after(None, 1, &tx).unwrap();
    assert_eq!(from_oldest.visited, vec![(month(2021, 1), rows[0])]);

    let after_september = source.keys_after(Some(&month(2021, 9)), 5, &tx).unwrap();
    assert!(after_september.visited.is_empty());
    assert!(after_september.completion.reached_boundary());
}

#[test]
fn test_sqlite_media_fetch_skips_missing_rows() {
    init_tracing();
    let (mut store, rows) = gallery_store();
    let tx = store.read_transaction().unwrap();

    let fetched = SqliteMediaSource::new()
        .fetch_items(&[rows[0], RowId(9_999), rows[9]], &tx)
        .unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[&rows[9]].received_at_ms, noon(2021, 9, 30));
    assert!(!fetched.contains_key(&RowId(9_999)));
}

#[test]
fn test_sqlite_media_fetch_spans_chunks() {
    init_tracing();
    let mut store = SqliteStore::open_in_memory().unwrap();
    let rows: Vec<RowId> = (0..1_200)
        .map(|i| add_media(&store, noon(2022, 5, 1) + i))
        .collect();

    let tx = store.read_transaction().unwrap();
    let fetched = SqliteMediaSource::new().fetch_items(&rows, &tx).unwrap();
    assert_eq!(fetched.len(), rows.len());
}

#[test]
fn test_sectioned_window_over_sqlite() {
    init_tracing();
    let (mut store, rows) = gallery_store();
    let mut window = SectionedWindow::new(SqliteMediaSource::new());

    {
        let tx = store.read_transaction().unwrap();
        assert_eq!(window.load_earlier_sections(1, &tx).unwrap(), 1);
        assert!(window.has_fetched_most_recent());
        assert!(!window.has_fetched_oldest());

        let added = window.ensure_items_loaded(0..5, 0, &tx).unwrap();
        assert!(added.is_empty());
        let slots = window.slots(&month(2021, 9)).unwrap();
        assert!(slots.iter().all(Slot::is_loaded));
        let loaded: Vec<RowId> = slots.iter().map(Slot::row_id).collect();
        assert_eq!(loaded, rows[5..].to_vec());

        assert_eq!(window.load_earlier_sections(10, &tx).unwrap(), 2);
        assert!(window.has_fetched_oldest());
        assert_eq!(
            window.section_keys(),
            vec![month(2021, 1), month(2021, 4), month(2021, 9)]
        );
    }
    window.check_invariants().unwrap();
}

#[test]
fn test_sectioned_window_follows_sqlite_writes() {
    init_tracing();
    let (mut store, rows) = gallery_store();
    let mut window = SectionedWindow::new(SqliteMediaSource::new());
    {
        let tx = store.read_transaction().unwrap();
        window.load_earlier_sections(20, &tx).unwrap();
        window.ensure_items_loaded(0..2, 1, &tx).unwrap();
    }
    window.take_journal();

    // Caption edits refetch the loaded slot.
    let april_first = window.loaded_item(IndexPath::new(1, 0)).unwrap().unique_id.clone();
    let edited = store
        .update_caption(&april_first, Some("beach"))
        .unwrap()
        .unwrap();
    {
        let tx = store.read_transaction().unwrap();
        let paths = window.handle_updated_items(&[edited], &tx).unwrap();
        assert_eq!(paths, vec![IndexPath::new(1, 0)]);
    }
    let caption = window.loaded_item(IndexPath::new(1, 0)).unwrap().caption.clone();
    assert_eq!(caption.as_deref(), Some("beach"));

    // Emptying April removes its section.
    let april: Vec<String> = (0..2)
        .map(|item| window.loaded_item(IndexPath::new(1, item)).unwrap().unique_id().to_string())
        .collect();
    let mut deleted = Vec::new();
    for id in &april {
        let (row, _) = store.delete_media(id).unwrap().unwrap();
        deleted.push(row);
    }
    assert_eq!(deleted, vec![rows[3], rows[4]]);
    let removed = window.handle_deleted_items(&deleted).unwrap();
    assert_eq!(removed.emptied_sections.into_iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(window.section_keys(), vec![month(2021, 1), month(2021, 9)]);

    // New media past the tip is appended.
    add_media(&store, noon(2021, 10, 5));
    {
        let tx = store.read_transaction().unwrap();
        let outcome = window.handle_new_items(&[month(2021, 10)], &tx).unwrap();
        assert!(outcome.did_append_at_end);
        assert!(!outcome.did_require_reset);
    }
    assert_eq!(
        window.section_keys(),
        vec![month(2021, 1), month(2021, 9), month(2021, 10)]
    );
    window.check_invariants().unwrap();
}

#[test]
fn test_sqlite_message_enumeration() {
    init_tracing();
    let mut store = transcript_store(5);
    let tx = store.read_transaction().unwrap();
    let source = SqliteMessageSource::new();

    let newest = source.ids_before(None, 2, &tx).unwrap();
    let ids: Vec<&str> = newest.rows.iter().map(|(_, id)| id.as_str()).collect();
    assert_eq!(ids, vec!["msg-5", "msg-4"]);
    assert!(!newest.completion.reached_boundary());

    let focus = source.row_for_id("msg-3", &tx).unwrap().unwrap();
    let after = source.ids_after(Some(focus), 5, &tx).unwrap();
    let ids: Vec<&str> = after.rows.iter().map(|(_, id)| id.as_str()).collect();
    assert_eq!(ids, vec!["msg-4", "msg-5"]);
    assert!(after.completion.reached_boundary());

    assert_eq!(source.row_for_id("missing", &tx).unwrap(), None);

    let page = source.ids_around("msg-1", 3, &tx).unwrap().unwrap();
    let ids: Vec<&str> = page.rows.iter().map(|(_, id)| id.as_str()).collect();
    assert_eq!(ids, vec!["msg-1", "msg-2", "msg-3"]);
    assert!(page.reached_oldest);
    assert!(!page.reached_newest);
}

#[test]
fn test_flat_window_over_sqlite() {
    init_tracing();
    let mut store = transcript_store(100);
    let mut window = FlatWindow::new(SqliteMessageSource::new(), small_config()).unwrap();

    {
        let tx = store.read_transaction().unwrap();
        window.load_initial_page(None, &tx).unwrap();
        assert_eq!(window_ids(&window), msg_ids(91..=100));
        assert!(window.can_load_older());
        assert!(!window.can_load_newer());

        window.load_page_around("msg-50", &tx).unwrap();
        assert_eq!(window_ids(&window), msg_ids(45..=54));

        window.load_older_page(&tx).unwrap();
        assert_eq!(window_ids(&window), msg_ids(35..=54));
    }

    store.update_message_body("msg-40", "edited").unwrap();
    store.delete_message("msg-41").unwrap();
    {
        let tx = store.read_transaction().unwrap();
        let updated = window.handle_updated_items(&["msg-40".to_string()], &tx).unwrap();
        assert_eq!(updated, vec![5]);
        assert_eq!(window.item(5).unwrap().body, "edited");
    }
    let removed = window.handle_deleted_items(&["msg-41".to_string()]).unwrap();
    assert_eq!(removed, vec![6]);
    assert_eq!(window.len(), 19);
    window.check_invariants().unwrap();
}
