//! Foundational low-level utilities shared across Hippo crates.
//!
//! Provides the atomic write primitive every persisted Hippo file goes through, plus the
//! clock abstraction used for active-day bookkeeping and importance decay.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{
    move_aside, sibling_with_suffix, stage_write_atomic, write_text_atomic, StagedWrite,
};
pub use time_utils::{
    current_unix_timestamp_ms, fractional_days_between, Clock, ManualClock, SystemClock,
};

#[cfg(test)]
mod tests {
    use std::fs::{read_dir, read_to_string};

    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn large_payload(fill: char) -> String {
        std::iter::repeat(fill).take(4 * 1024 * 1024).collect()
    }

    #[test]
    fn write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.txt");
        write_text_atomic(&path, "hello world").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "hello world");
    }

    #[test]
    fn write_text_atomic_creates_missing_parent_and_leaves_no_temp_files() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested").join("record.json");
        write_text_atomic(&path, "{}").expect("write");
        let names = read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec![std::ffi::OsString::from("record.json")]);
    }

    #[test]
    fn write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory destination");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn regression_fault_before_rename_keeps_previous_file_intact() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("record.json");
        let original = large_payload('a');
        write_text_atomic(&path, &original).expect("seed");

        let staged = stage_write_atomic(&path, large_payload('b').as_bytes()).expect("stage");
        let temp_path = staged.temp_path().to_path_buf();
        assert!(temp_path.exists());
        drop(staged);

        assert!(!temp_path.exists());
        assert_eq!(read_to_string(&path).expect("read"), original);
    }

    #[test]
    fn regression_crash_between_write_and_rename_leaves_destination_whole() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("record.json");
        let original = large_payload('a');
        write_text_atomic(&path, &original).expect("seed");

        let replacement = large_payload('b');
        let orphan = stage_write_atomic(&path, replacement.as_bytes())
            .expect("stage")
            .abandon();

        assert_eq!(read_to_string(&path).expect("read"), original);
        assert_eq!(read_to_string(&orphan).expect("orphan"), replacement);
        assert!(orphan
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(".record.json.tmp-")));
    }

    #[test]
    fn staged_write_commit_replaces_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("record.json");
        write_text_atomic(&path, "old").expect("seed");
        stage_write_atomic(&path, b"new")
            .expect("stage")
            .commit()
            .expect("commit");
        assert_eq!(read_to_string(&path).expect("read"), "new");
    }

    #[test]
    fn move_aside_appends_suffix_to_file_name() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("insights.json");
        write_text_atomic(&path, "{broken").expect("seed");
        let moved = move_aside(&path, ".backup").expect("move aside");
        assert_eq!(moved, tempdir.path().join("insights.json.backup"));
        assert!(!path.exists());
        assert_eq!(read_to_string(&moved).expect("read"), "{broken");
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let handle = clock.clone();
        handle.advance_days(2);
        assert_eq!(clock.now(), start + Duration::days(2));
        assert_eq!(
            clock.today(),
            chrono::NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
        );
    }

    #[test]
    fn fractional_days_between_is_never_negative() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let later = start + Duration::hours(36);
        assert!((fractional_days_between(start, later) - 1.5).abs() < 1e-9);
        assert_eq!(fractional_days_between(later, start), 0.0);
    }
}
