use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use hippo_core::{Clock, ManualClock};
use hippo_memory::{
    FileInsightStore, HippoConfig, Insight, InsightStore, RankingQuery, Reinforcement,
    RefreshReport, RelevanceRanker,
};
use tempfile::tempdir;

fn open_store(root: &Path, clock: &ManualClock) -> FileInsightStore {
    FileInsightStore::open_with_clock(root, HippoConfig::without_watching(), Arc::new(clock.clone()))
        .expect("open store")
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 7, 45, 0).unwrap())
}

#[test]
fn integration_create_on_day_one_seeds_access_history() {
    let temp = tempdir().expect("tempdir");
    let clock = clock();
    let store = open_store(temp.path(), &clock);

    let created = store
        .create(
            "Flush the temp file before renaming it".to_string(),
            vec!["crash safety".to_string()],
            0.8,
        )
        .expect("create");

    assert_eq!(store.get_current_active_day().expect("active day"), 1);
    let loaded = store.get(created.id()).expect("get").expect("present");
    assert_eq!(loaded.daily_access_counts(), &[(1, 1)]);
    assert_eq!(loaded.importance(), 0.8);
}

#[test]
fn integration_upvote_without_decay_scales_importance() {
    let temp = tempdir().expect("tempdir");
    let clock = clock();
    let store = open_store(temp.path(), &clock);
    let created = store
        .create("Batch notifications".to_string(), Vec::new(), 0.5)
        .expect("create");

    let upvoted = store
        .reinforce(created.id(), Reinforcement::Upvote)
        .expect("reinforce")
        .expect("present");
    assert!((upvoted.importance() - 0.75).abs() < 1e-9);

    let capped = store
        .reinforce(created.id(), Reinforcement::Multiplier(10.0))
        .expect("reinforce")
        .expect("present");
    assert_eq!(capped.importance(), 1.0);
}

#[test]
fn integration_corrupted_records_are_skipped_on_reopen() {
    let temp = tempdir().expect("tempdir");
    let clock = clock();
    {
        let store = open_store(temp.path(), &clock);
        for index in 0..5 {
            store
                .create(format!("valid record {index}"), Vec::new(), 0.5)
                .expect("create");
        }
    }
    let insights_dir = temp.path().join("insights");
    for _ in 0..2 {
        fs::write(
            insights_dir.join(format!("{}.json", uuid::Uuid::new_v4())),
            "{ \"uuid\": \"truncated",
        )
        .expect("write corrupt record");
    }

    let reopened = open_store(temp.path(), &clock);
    let report = reopened.refresh();
    assert_eq!(
        report,
        RefreshReport {
            loaded: 5,
            skipped: 2,
            rolled_back: false
        }
    );
    assert_eq!(reopened.get_all().expect("all").len(), 5);
}

#[test]
fn integration_active_days_drive_ranking_across_restarts() {
    let temp = tempdir().expect("tempdir");
    let clock = clock();
    let (fresh_id, stale_id) = {
        let store = open_store(temp.path(), &clock);
        let stale = store
            .create("stale rule of thumb".to_string(), Vec::new(), 0.6)
            .expect("stale");
        clock.advance_days(1);
        let fresh = store
            .create("fresh rule of thumb".to_string(), Vec::new(), 0.6)
            .expect("fresh");
        (fresh.id(), stale.id())
    };

    // A long idle gap only costs one active day.
    clock.advance_days(60);
    let store = open_store(temp.path(), &clock);
    let today = store.get_current_active_day().expect("active day");
    assert_eq!(today, 3);
    store.record_access(fresh_id).expect("access");

    let insights = store.get_all().expect("all");
    let ranked = RelevanceRanker::new(store.config()).rank(
        &insights,
        &RankingQuery::default().text("rule of thumb"),
        today,
        clock.now(),
    );
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].insight.id(), fresh_id);
    assert_eq!(ranked[1].insight.id(), stale_id);
}

#[test]
fn integration_records_on_disk_use_documented_field_names() {
    let temp = tempdir().expect("tempdir");
    let clock = clock();
    let store = open_store(temp.path(), &clock);
    let created = store
        .create("shape check".to_string(), vec!["format".to_string()], 0.3)
        .expect("create");

    let raw = fs::read_to_string(
        temp.path()
            .join("insights")
            .join(format!("{}.json", created.id())),
    )
    .expect("read record");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["uuid"], created.id().to_string());
    assert_eq!(value["daily_access_counts"], serde_json::json!([[1, 1]]));
    assert!(value.get("content_last_modified_at").is_some());
    assert!(value.get("importance_last_modified_at").is_some());

    let parsed: Insight = serde_json::from_str(&raw).expect("parse back");
    assert_eq!(parsed, created);
}
