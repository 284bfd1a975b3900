use std::thread;
use std::time::{Duration, Instant};

use hippo_memory::{FileInsightStore, HippoConfig, InsightStore};
use tempfile::tempdir;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

#[test]
fn integration_second_instance_sees_writes_after_periodic_refresh() {
    let temp = tempdir().expect("tempdir");
    let writer = FileInsightStore::open(temp.path(), HippoConfig::without_watching()).expect("writer");
    let reader = FileInsightStore::open(
        temp.path(),
        HippoConfig {
            cache_refresh_interval_ms: 150,
            ..HippoConfig::without_watching()
        },
    )
    .expect("reader");
    assert!(reader.get_all().expect("warm reader cache").is_empty());

    let created = writer
        .create("shared across processes".to_string(), Vec::new(), 0.6)
        .expect("create");

    assert!(wait_until(Duration::from_secs(5), || {
        reader
            .get_all()
            .map(|all| all.iter().any(|insight| insight.id() == created.id()))
            .unwrap_or(false)
    }));
}

#[test]
fn integration_deletes_propagate_to_other_instances() {
    let temp = tempdir().expect("tempdir");
    let config = HippoConfig {
        cache_refresh_interval_ms: 150,
        file_event_debounce_ms: 50,
        ..HippoConfig::default()
    };
    let first = FileInsightStore::open(temp.path(), config.clone()).expect("first");
    let second = FileInsightStore::open(temp.path(), config).expect("second");

    let created = first
        .create("short lived".to_string(), Vec::new(), 0.2)
        .expect("create");
    assert!(wait_until(Duration::from_secs(5), || {
        second.get(created.id()).map(|found| found.is_some()).unwrap_or(false)
    }));

    assert!(second.delete(created.id()).expect("delete"));
    assert!(wait_until(Duration::from_secs(5), || {
        first.get(created.id()).map(|found| found.is_none()).unwrap_or(false)
    }));

    first.shutdown();
    second.shutdown();
}
