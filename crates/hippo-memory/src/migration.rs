//! Lazy, idempotent migration from the legacy document into a per-record store.
//!
//! Until the completion marker exists, reads are the union of both stores with the primary
//! winning on id conflicts. Writes always go to the primary. Once the marker exists the
//! legacy document is never consulted again, whatever state it is in.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hippo_core::{write_text_atomic, Clock, SystemClock};
use serde::Serialize;

use crate::config::HippoConfig;
use crate::constants::{MIGRATED_LEGACY_SUFFIX, MIGRATION_MARKER_FILE_NAME};
use crate::error::{StoreError, StoreResult};
use crate::file_store::FileInsightStore;
use crate::insight::{Insight, InsightId, InsightUpdate};
use crate::legacy::LegacyInsightStore;
use crate::store::{InsightStore, StoreMetadata};

/// Counts from one migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub counter_migrated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyComplete,
    /// Another call in this process is migrating right now.
    InProgressElsewhere,
    /// No legacy document, or one without records.
    Trivial,
    Migrated(MigrationReport),
}

/// Operational snapshot of the migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub legacy_exists: bool,
    /// `None` when the legacy document exists but cannot be read.
    pub legacy_count: Option<usize>,
    pub primary_count: usize,
    pub complete: bool,
    pub in_progress: bool,
}

struct InProgressGuard<'a>(&'a AtomicBool);

impl<'a> InProgressGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Presents a legacy document and a primary store as one [`InsightStore`].
pub struct MigrationAdapter<P: InsightStore = FileInsightStore> {
    legacy: LegacyInsightStore,
    primary: P,
    marker_path: PathBuf,
    in_progress: AtomicBool,
}

impl MigrationAdapter<FileInsightStore> {
    /// Composes the legacy document at `legacy_path` with a file store rooted at `root_dir`.
    /// The completion marker lives at `<root_dir>/.migration_complete`.
    pub fn open(
        legacy_path: impl Into<PathBuf>,
        root_dir: impl Into<PathBuf>,
        config: HippoConfig,
    ) -> StoreResult<Self> {
        Self::open_with_clock(legacy_path, root_dir, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        legacy_path: impl Into<PathBuf>,
        root_dir: impl Into<PathBuf>,
        config: HippoConfig,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let legacy = LegacyInsightStore::with_clock(legacy_path, clock.clone())
            .with_reinforcement(config.reinforcement);
        let primary = FileInsightStore::open_with_clock(root_dir, config, clock)?;
        let marker_path = primary.root_dir().join(MIGRATION_MARKER_FILE_NAME);
        Ok(Self::new(legacy, primary, marker_path))
    }

    pub fn shutdown(&self) {
        self.primary.shutdown();
    }
}

impl<P: InsightStore> MigrationAdapter<P> {
    pub fn new(legacy: LegacyInsightStore, primary: P, marker_path: impl Into<PathBuf>) -> Self {
        Self {
            legacy,
            primary,
            marker_path: marker_path.into(),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn legacy(&self) -> &LegacyInsightStore {
        &self.legacy
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    pub fn is_complete(&self) -> bool {
        self.marker_path.exists()
    }

    /// Copies legacy records missing from the primary store, then writes the marker.
    ///
    /// Per-record failures are logged and counted. Only a failure to read the legacy
    /// document as a whole is returned, and in that case the marker is not written.
    #[tracing::instrument(
        name = "hippo_memory.migration.run",
        skip_all,
        fields(legacy = %self.legacy.path().display())
    )]
    pub fn migrate_if_needed(&self) -> StoreResult<MigrationOutcome> {
        if self.is_complete() {
            return Ok(MigrationOutcome::AlreadyComplete);
        }
        let Some(_guard) = InProgressGuard::acquire(&self.in_progress) else {
            return Ok(MigrationOutcome::InProgressElsewhere);
        };

        if !self.legacy.exists() {
            self.mark_complete()?;
            tracing::info!("no legacy document; migration trivially complete");
            return Ok(MigrationOutcome::Trivial);
        }
        let document = self.legacy.load().map_err(|source| StoreError::LegacySource {
            path: self.legacy.path().to_path_buf(),
            source: Box::new(source),
        })?;
        if document.record_count() == 0 {
            self.mark_complete()?;
            tracing::info!("legacy document holds no records; migration trivially complete");
            return Ok(MigrationOutcome::Trivial);
        }

        tracing::info!(records = document.record_count(), "migrating legacy records");
        let mut report = MigrationReport {
            failed: document.malformed.len(),
            ..MigrationReport::default()
        };
        if report.failed > 0 {
            tracing::error!(count = report.failed, "legacy records could not be parsed");
        }
        for insight in document.insights {
            let id = insight.id();
            let copied = match self.primary.get(id) {
                Ok(Some(_)) => {
                    tracing::debug!(%id, "record already migrated; skipping");
                    report.skipped_existing += 1;
                    continue;
                }
                Ok(None) => self.primary.store(insight),
                Err(error) => Err(error),
            };
            match copied {
                Ok(_) => report.migrated += 1,
                Err(error) => {
                    tracing::error!(%id, %error, "failed to migrate record");
                    report.failed += 1;
                }
            }
        }

        match self.migrate_counter(&document.metadata) {
            Ok(moved) => report.counter_migrated = moved,
            Err(error) => tracing::error!(%error, "failed to migrate active-day counter"),
        }

        self.mark_complete()?;
        tracing::info!(
            migrated = report.migrated,
            skipped_existing = report.skipped_existing,
            failed = report.failed,
            counter_migrated = report.counter_migrated,
            "migration complete"
        );
        Ok(MigrationOutcome::Migrated(report))
    }

    pub fn migration_status(&self) -> StoreResult<MigrationStatus> {
        let legacy_exists = self.legacy.exists();
        let legacy_count = match self.legacy.read() {
            Ok(document) => Some(document.map_or(0, |document| document.record_count())),
            Err(error) => {
                tracing::warn!(%error, "legacy document unreadable");
                None
            }
        };
        Ok(MigrationStatus {
            legacy_exists,
            legacy_count,
            primary_count: self.primary.get_all()?.len(),
            complete: self.is_complete(),
            in_progress: self.in_progress.load(Ordering::Acquire),
        })
    }

    /// Marks migration complete unconditionally and moves the legacy document to
    /// `<file>.migrated`. Returns the new location of the document, if there was one.
    #[tracing::instrument(
        name = "hippo_memory.migration.force_complete",
        skip_all,
        fields(legacy = %self.legacy.path().display())
    )]
    pub fn force_complete(&self) -> StoreResult<Option<PathBuf>> {
        if let Err(error) = self.migrate_if_needed() {
            tracing::warn!(%error, "migration attempt failed before forced completion");
        }
        if !self.is_complete() {
            tracing::warn!("forcing migration completion without a full migration");
            self.mark_complete()?;
        }
        self.legacy.retire(MIGRATED_LEGACY_SUFFIX)
    }

    fn mark_complete(&self) -> StoreResult<()> {
        write_text_atomic(&self.marker_path, "")?;
        Ok(())
    }

    /// Adopts the legacy counter only while the primary counter is untouched.
    fn migrate_counter(&self, legacy: &StoreMetadata) -> StoreResult<bool> {
        let current = self.primary.metadata_snapshot()?;
        if current.active_day_counter == 0 && legacy.active_day_counter > 0 {
            self.primary
                .adopt_active_day_counter(legacy.active_day_counter)?;
            tracing::info!(
                active_day_counter = legacy.active_day_counter,
                "migrated active-day counter"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn ensure_migrated(&self) -> StoreResult<()> {
        self.migrate_if_needed().map(|_| ())
    }

    /// Legacy records while migration is incomplete; empty once it is complete.
    fn legacy_insights(&self) -> Vec<Insight> {
        if self.is_complete() {
            return Vec::new();
        }
        match self.legacy.read() {
            Ok(document) => document.map(|document| document.insights).unwrap_or_default(),
            Err(error) => {
                tracing::warn!(%error, "skipping unreadable legacy document in hybrid read");
                Vec::new()
            }
        }
    }

    fn union_with_legacy(&self, mut insights: Vec<Insight>) -> Vec<Insight> {
        let known = insights.iter().map(Insight::id).collect::<HashSet<_>>();
        let extra = self
            .legacy_insights()
            .into_iter()
            .filter(|legacy| !known.contains(&legacy.id()))
            .collect::<Vec<_>>();
        if !extra.is_empty() {
            tracing::debug!(count = extra.len(), "including legacy-only records");
        }
        insights.extend(extra);
        insights
    }

    /// Makes sure `id` exists in the primary store, copying it from the legacy side if that
    /// is the only place it lives. Returns false when neither side knows the id.
    fn adopt_into_primary(&self, id: InsightId) -> StoreResult<bool> {
        if self.primary.get(id)?.is_some() {
            return Ok(true);
        }
        let Some(legacy) = self
            .legacy_insights()
            .into_iter()
            .find(|insight| insight.id() == id)
        else {
            return Ok(false);
        };
        self.primary.store(legacy)?;
        tracing::debug!(%id, "adopted legacy-only record into primary store");
        Ok(true)
    }
}

impl<P: InsightStore> InsightStore for MigrationAdapter<P> {
    fn get(&self, id: InsightId) -> StoreResult<Option<Insight>> {
        self.ensure_migrated()?;
        if let Some(insight) = self.primary.get(id)? {
            return Ok(Some(insight));
        }
        Ok(self
            .legacy_insights()
            .into_iter()
            .find(|insight| insight.id() == id))
    }

    fn store(&self, insight: Insight) -> StoreResult<InsightId> {
        self.ensure_migrated()?;
        self.primary.store(insight)
    }

    fn update(&self, id: InsightId, update: &InsightUpdate) -> StoreResult<Option<Insight>> {
        self.ensure_migrated()?;
        if !self.adopt_into_primary(id)? {
            return Ok(None);
        }
        self.primary.update(id, update)
    }

    fn delete(&self, id: InsightId) -> StoreResult<bool> {
        self.ensure_migrated()?;
        self.primary.delete(id)
    }

    fn get_all(&self) -> StoreResult<Vec<Insight>> {
        self.ensure_migrated()?;
        let primary = self.primary.get_all()?;
        Ok(self.union_with_legacy(primary))
    }

    fn record_access_on(&self, id: InsightId, active_day: u32) -> StoreResult<bool> {
        self.ensure_migrated()?;
        if !self.adopt_into_primary(id)? {
            return Ok(false);
        }
        self.primary.record_access_on(id, active_day)
    }

    fn get_current_active_day(&self) -> StoreResult<u32> {
        self.ensure_migrated()?;
        self.primary.get_current_active_day()
    }

    fn metadata_snapshot(&self) -> StoreResult<StoreMetadata> {
        self.primary.metadata_snapshot()
    }

    fn adopt_active_day_counter(&self, counter: u32) -> StoreResult<()> {
        self.primary.adopt_active_day_counter(counter)
    }

    fn create(
        &self,
        content: String,
        situation: Vec<String>,
        importance: f64,
    ) -> StoreResult<Insight> {
        self.ensure_migrated()?;
        self.primary.create(content, situation, importance)
    }
}
