use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use hippo_memory::{
    HippoConfig, Insight, InsightStore, LegacyDocument, LegacyInsightStore, MigrationAdapter,
    MigrationOutcome, StoreMetadata,
};
use tempfile::tempdir;

fn write_legacy(path: &Path, contents: &[&str]) -> Vec<Insight> {
    let insights = contents
        .iter()
        .map(|content| Insight::create(*content, Vec::new(), 0.5, 3).expect("insight"))
        .collect::<Vec<_>>();
    LegacyInsightStore::new(path)
        .save(&LegacyDocument::new(
            insights.clone(),
            StoreMetadata {
                active_day_counter: 3,
                last_calendar_date_used: Some("2024-01-31".to_string()),
            },
        ))
        .expect("write legacy document");
    insights
}

fn record_files(root: &Path) -> usize {
    fs::read_dir(root.join("insights"))
        .expect("insights dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
        .count()
}

#[test]
fn integration_first_read_migrates_and_later_reads_ignore_legacy() {
    let temp = tempdir().expect("tempdir");
    let legacy_path = temp.path().join("hippo.json");
    let root = temp.path().join("store");
    write_legacy(&legacy_path, &["first legacy record", "second legacy record"]);

    let adapter =
        MigrationAdapter::open(&legacy_path, &root, HippoConfig::without_watching()).expect("open");
    assert_eq!(adapter.get_all().expect("first read").len(), 2);
    assert!(root.join(".migration_complete").exists());
    assert_eq!(record_files(&root), 2);

    fs::write(&legacy_path, "this is no longer json").expect("corrupt legacy");
    assert_eq!(adapter.get_all().expect("second read").len(), 2);

    let status = adapter.migration_status().expect("status");
    assert!(status.complete);
    assert_eq!(status.legacy_count, None);
    assert_eq!(status.primary_count, 2);
}

#[test]
fn regression_one_malformed_legacy_record_does_not_sink_the_rest() {
    let temp = tempdir().expect("tempdir");
    let legacy_path = temp.path().join("hippo.json");
    let root = temp.path().join("store");
    let originals = write_legacy(&legacy_path, &["kept one", "kept two"]);
    let mut raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&legacy_path).expect("read")).expect("json");
    raw["insights"]
        .as_array_mut()
        .expect("records array")
        .insert(1, serde_json::json!({ "content": "bad", "importance": "very high" }));
    fs::write(&legacy_path, raw.to_string()).expect("rewrite legacy");

    let adapter =
        MigrationAdapter::open(&legacy_path, &root, HippoConfig::without_watching()).expect("open");
    let MigrationOutcome::Migrated(report) = adapter.migrate_if_needed().expect("migrate") else {
        panic!("expected a migration run");
    };
    assert_eq!(report.migrated, 2);
    assert_eq!(report.failed, 1);
    assert!(root.join(".migration_complete").exists());
    assert!(!temp.path().join("hippo.json.backup").exists());
    assert_eq!(record_files(&root), 2);

    let mut ids = adapter
        .get_all()
        .expect("all")
        .iter()
        .map(Insight::id)
        .collect::<Vec<_>>();
    ids.sort();
    let mut expected = originals.iter().map(Insight::id).collect::<Vec<_>>();
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn integration_running_migration_twice_keeps_one_copy_per_record() {
    let temp = tempdir().expect("tempdir");
    let legacy_path = temp.path().join("hippo.json");
    let root = temp.path().join("store");
    write_legacy(&legacy_path, &["a", "b", "c"]);

    let first =
        MigrationAdapter::open(&legacy_path, &root, HippoConfig::without_watching()).expect("first");
    assert!(matches!(
        first.migrate_if_needed().expect("migrate"),
        MigrationOutcome::Migrated(report) if report.migrated == 3 && report.counter_migrated
    ));

    // Simulate an interrupted run: the marker vanished before anyone saw it.
    fs::remove_file(root.join(".migration_complete")).expect("remove marker");
    let second =
        MigrationAdapter::open(&legacy_path, &root, HippoConfig::without_watching()).expect("second");
    let MigrationOutcome::Migrated(report) = second.migrate_if_needed().expect("rerun") else {
        panic!("expected a second migration run");
    };
    assert_eq!(report.migrated, 0);
    assert_eq!(report.skipped_existing, 3);
    assert!(!report.counter_migrated);
    assert_eq!(record_files(&root), 3);
    assert_eq!(second.get_all().expect("all").len(), 3);
}

#[test]
fn integration_concurrent_adapters_converge_on_one_copy() {
    let temp = tempdir().expect("tempdir");
    let legacy_path = temp.path().join("hippo.json");
    let root = temp.path().join("store");
    let originals = write_legacy(&legacy_path, &["one", "two", "three", "four"]);

    let adapters = (0..2)
        .map(|_| {
            Arc::new(
                MigrationAdapter::open(&legacy_path, &root, HippoConfig::without_watching())
                    .expect("open adapter"),
            )
        })
        .collect::<Vec<_>>();
    let workers = adapters
        .iter()
        .cloned()
        .map(|adapter| thread::spawn(move || adapter.migrate_if_needed().map(|_| ())))
        .collect::<Vec<_>>();
    for worker in workers {
        worker.join().expect("worker").expect("migration");
    }

    assert_eq!(record_files(&root), originals.len());
    for adapter in &adapters {
        adapter.primary().refresh();
        let mut ids = adapter
            .get_all()
            .expect("all")
            .iter()
            .map(Insight::id)
            .collect::<Vec<_>>();
        ids.sort();
        let mut expected = originals.iter().map(Insight::id).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(ids, expected);
    }
}

#[test]
fn integration_force_complete_moves_legacy_aside() {
    let temp = tempdir().expect("tempdir");
    let legacy_path = temp.path().join("hippo.json");
    let root = temp.path().join("store");
    write_legacy(&legacy_path, &["kept"]);

    let adapter =
        MigrationAdapter::open(&legacy_path, &root, HippoConfig::without_watching()).expect("open");
    let moved = adapter.force_complete().expect("force").expect("legacy moved");
    assert_eq!(moved, temp.path().join("hippo.json.migrated"));
    assert!(!legacy_path.exists());
    assert_eq!(adapter.get_all().expect("all").len(), 1);
}
