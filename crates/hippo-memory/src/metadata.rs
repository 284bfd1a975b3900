//! Persisted active-day clock.
//!
//! The active day advances once per distinct calendar date on which the store is used, so
//! unused stretches of time do not age insights. Metadata is re-read from disk on every call
//! so concurrent processes observe each other's advances.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use hippo_core::{move_aside, write_text_atomic, Clock};

use crate::constants::CORRUPT_BACKUP_SUFFIX;
use crate::error::{StoreError, StoreResult};
use crate::store::StoreMetadata;

const CALENDAR_DATE_FORMAT: &str = "%Y-%m-%d";

/// Reads and writes `metadata.json` with the atomic write discipline used for records.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads metadata, writing defaults when the file is absent and moving a corrupted file
    /// aside to `metadata.json.backup` before resetting it.
    pub fn load(&self) -> StoreResult<StoreMetadata> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_locked()
    }

    pub fn save(&self, metadata: &StoreMetadata) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.save_locked(metadata)
    }

    /// Returns the active day, incrementing it on the first call of a new calendar date.
    pub fn get_current_active_day(&self) -> StoreResult<u32> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut metadata = self.load_locked()?;
        let today = self.clock.today();
        if advance_for_date(&mut metadata, today) {
            self.save_locked(&metadata)?;
            tracing::debug!(
                active_day = metadata.active_day_counter,
                date = %today,
                "advanced active day"
            );
        }
        Ok(metadata.active_day_counter)
    }

    /// Replaces the counter while keeping the recorded calendar date.
    pub fn adopt_counter(&self, counter: u32) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut metadata = self.load_locked()?;
        metadata.active_day_counter = counter;
        self.save_locked(&metadata)
    }

    fn load_locked(&self) -> StoreResult<StoreMetadata> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                let metadata = StoreMetadata::default();
                self.save_locked(&metadata)?;
                return Ok(metadata);
            }
            Err(error) => return Err(StoreError::io(&self.path, error)),
        };
        match serde_json::from_str::<StoreMetadata>(&raw) {
            Ok(metadata) => Ok(metadata),
            Err(error) => {
                let backup = move_aside(&self.path, CORRUPT_BACKUP_SUFFIX)?;
                tracing::warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    %error,
                    "metadata corrupted; moved aside and reset to defaults"
                );
                let metadata = StoreMetadata::default();
                self.save_locked(&metadata)?;
                Ok(metadata)
            }
        }
    }

    fn save_locked(&self, metadata: &StoreMetadata) -> StoreResult<()> {
        let encoded = serde_json::to_string_pretty(metadata)
            .map_err(|error| StoreError::json(&self.path, error))?;
        write_text_atomic(&self.path, &encoded)?;
        Ok(())
    }
}

/// Moves the counter forward by one when `today` differs from the recorded date. Returns
/// whether anything changed. An unparsable recorded date counts as a different date.
pub(crate) fn advance_for_date(metadata: &mut StoreMetadata, today: NaiveDate) -> bool {
    let last_date = metadata
        .last_calendar_date_used
        .as_deref()
        .and_then(|raw| NaiveDate::parse_from_str(raw, CALENDAR_DATE_FORMAT).ok());
    if last_date == Some(today) {
        return false;
    }
    metadata.active_day_counter = metadata.active_day_counter.saturating_add(1);
    metadata.last_calendar_date_used = Some(today.format(CALENDAR_DATE_FORMAT).to_string());
    true
}
