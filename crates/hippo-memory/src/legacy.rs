//! The single-document store that predates per-record files.
//!
//! Every operation loads the whole document, modifies it, and saves it back. It is kept so
//! existing documents can be read during migration and so older deployments keep working.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hippo_core::{move_aside, write_text_atomic, Clock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ReinforcementPolicy;
use crate::constants::CORRUPT_BACKUP_SUFFIX;
use crate::error::{StoreError, StoreResult};
use crate::insight::{Insight, InsightId, InsightUpdate};
use crate::metadata::advance_for_date;
use crate::store::{InsightStore, StoreMetadata};

/// Parsed legacy document.
///
/// Entries of `insights` that do not parse as an [`Insight`] are kept verbatim in
/// `malformed` and written back on save, so a bad record never takes its neighbours down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyDocument {
    pub insights: Vec<Insight>,
    pub metadata: StoreMetadata,
    pub malformed: Vec<Value>,
}

impl LegacyDocument {
    pub fn new(insights: Vec<Insight>, metadata: StoreMetadata) -> Self {
        Self {
            insights,
            metadata,
            malformed: Vec::new(),
        }
    }

    /// Parsed and unparseable entries together.
    pub fn record_count(&self) -> usize {
        self.insights.len() + self.malformed.len()
    }

    fn position(&self, id: InsightId) -> Option<usize> {
        self.insights.iter().position(|insight| insight.id() == id)
    }
}

/// On-disk shape; records stay untyped until parsed one at a time.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawLegacyDocument {
    #[serde(default)]
    insights: Vec<Value>,
    #[serde(flatten)]
    metadata: StoreMetadata,
}

#[derive(Debug)]
pub struct LegacyInsightStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    reinforcement: ReinforcementPolicy,
    lock: Mutex<()>,
}

impl LegacyInsightStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            reinforcement: ReinforcementPolicy::default(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_reinforcement(mut self, reinforcement: ReinforcementPolicy) -> Self {
        self.reinforcement = reinforcement;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the document. A missing file yields (and writes) an empty document; one that is
    /// not valid JSON is moved aside to `<file>.backup` and replaced by an empty document.
    pub fn load(&self) -> StoreResult<LegacyDocument> {
        let _guard = self.lock();
        self.load_locked()
    }

    /// Parses the document without any recovery side effects. Only a document that is not
    /// valid JSON as a whole is an error; individual bad records land in
    /// [`LegacyDocument::malformed`].
    pub fn read(&self) -> StoreResult<Option<LegacyDocument>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StoreError::io(&self.path, error)),
        };
        let raw = serde_json::from_str::<RawLegacyDocument>(&raw)
            .map_err(|error| StoreError::json(&self.path, error))?;
        Ok(Some(self.parse_records(raw)))
    }

    pub fn save(&self, document: &LegacyDocument) -> StoreResult<()> {
        let _guard = self.lock();
        self.save_locked(document)
    }

    /// Renames the document to `<file><suffix>`; `None` when there was nothing to move.
    pub fn retire(&self, suffix: &str) -> StoreResult<Option<PathBuf>> {
        let _guard = self.lock();
        if !self.path.exists() {
            return Ok(None);
        }
        let retired = move_aside(&self.path, suffix)?;
        tracing::info!(
            path = %self.path.display(),
            retired = %retired.display(),
            "legacy document moved aside"
        );
        Ok(Some(retired))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_locked(&self) -> StoreResult<LegacyDocument> {
        match self.read() {
            Ok(Some(document)) => Ok(document),
            Ok(None) => {
                let document = LegacyDocument::default();
                self.save_locked(&document)?;
                Ok(document)
            }
            Err(StoreError::Json { source, .. }) => {
                let backup = move_aside(&self.path, CORRUPT_BACKUP_SUFFIX)?;
                tracing::warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %source,
                    "legacy document corrupted; moved aside and reset"
                );
                let document = LegacyDocument::default();
                self.save_locked(&document)?;
                Ok(document)
            }
            Err(error) => Err(error),
        }
    }

    fn parse_records(&self, raw: RawLegacyDocument) -> LegacyDocument {
        let mut document = LegacyDocument::new(Vec::with_capacity(raw.insights.len()), raw.metadata);
        for (index, value) in raw.insights.into_iter().enumerate() {
            match serde_json::from_value::<Insight>(value.clone()) {
                Ok(insight) => document.insights.push(insight.normalized()),
                Err(error) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        index,
                        %error,
                        "skipping malformed legacy record"
                    );
                    document.malformed.push(value);
                }
            }
        }
        document
    }

    fn save_locked(&self, document: &LegacyDocument) -> StoreResult<()> {
        let mut insights = Vec::with_capacity(document.record_count());
        for insight in &document.insights {
            insights.push(
                serde_json::to_value(insight).map_err(|error| StoreError::json(&self.path, error))?,
            );
        }
        insights.extend(document.malformed.iter().cloned());
        let raw = RawLegacyDocument {
            insights,
            metadata: document.metadata.clone(),
        };
        let encoded = serde_json::to_string_pretty(&raw)
            .map_err(|error| StoreError::json(&self.path, error))?;
        write_text_atomic(&self.path, &encoded)?;
        Ok(())
    }

    fn modify<T>(
        &self,
        apply: impl FnOnce(&mut LegacyDocument) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        let _guard = self.lock();
        let mut document = self.load_locked()?;
        let (result, changed) = apply(&mut document)?;
        if changed {
            self.save_locked(&document)?;
        }
        Ok(result)
    }
}

impl InsightStore for LegacyInsightStore {
    fn get(&self, id: InsightId) -> StoreResult<Option<Insight>> {
        let document = self.load()?;
        Ok(document.position(id).map(|index| document.insights[index].clone()))
    }

    fn store(&self, insight: Insight) -> StoreResult<InsightId> {
        let id = insight.id();
        self.modify(|document| {
            match document.position(id) {
                Some(index) => document.insights[index] = insight,
                None => document.insights.push(insight),
            }
            Ok((id, true))
        })
    }

    fn update(&self, id: InsightId, update: &InsightUpdate) -> StoreResult<Option<Insight>> {
        let now = self.clock.now();
        self.modify(|document| {
            let Some(index) = document.position(id) else {
                return Ok((None, false));
            };
            let mut insight = document.insights[index].clone();
            insight.apply_update(update, &self.reinforcement, now)?;
            document.insights[index] = insight.clone();
            Ok((Some(insight), true))
        })
    }

    fn delete(&self, id: InsightId) -> StoreResult<bool> {
        self.modify(|document| match document.position(id) {
            Some(index) => {
                document.insights.remove(index);
                Ok((true, true))
            }
            None => Ok((false, false)),
        })
    }

    fn get_all(&self) -> StoreResult<Vec<Insight>> {
        Ok(self.load()?.insights)
    }

    fn record_access_on(&self, id: InsightId, active_day: u32) -> StoreResult<bool> {
        self.modify(|document| match document.position(id) {
            Some(index) => {
                document.insights[index].record_access(active_day);
                Ok((true, true))
            }
            None => Ok((false, false)),
        })
    }

    fn get_current_active_day(&self) -> StoreResult<u32> {
        let today = self.clock.today();
        self.modify(|document| {
            let changed = advance_for_date(&mut document.metadata, today);
            Ok((document.metadata.active_day_counter, changed))
        })
    }

    fn metadata_snapshot(&self) -> StoreResult<StoreMetadata> {
        Ok(self.load()?.metadata)
    }

    fn adopt_active_day_counter(&self, counter: u32) -> StoreResult<()> {
        self.modify(|document| {
            document.metadata.active_day_counter = counter;
            Ok(((), true))
        })
    }

    fn create(
        &self,
        content: String,
        situation: Vec<String>,
        importance: f64,
    ) -> StoreResult<Insight> {
        let active_day = self.get_current_active_day()?;
        let insight =
            Insight::create_at(content, situation, importance, active_day, self.clock.now())?;
        self.store(insight.clone())?;
        Ok(insight)
    }
}
