//! One-file-per-insight storage with an in-memory mirror kept coherent across processes.
//!
//! Records live at `<root>/insights/<id>.json` and are always written through the atomic
//! temp-file + rename primitive. The cache is a mirror, never the source of truth: it is
//! rebuilt by full rescans triggered lazily on first use, by filesystem notifications
//! (debounced, with our own writes suppressed), and by a periodic safety-net timer.

mod reconciler;

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use hippo_core::{write_text_atomic, Clock, SystemClock};

use crate::config::HippoConfig;
use crate::constants::{INSIGHTS_DIR_NAME, INSIGHT_FILE_EXTENSION, METADATA_FILE_NAME};
use crate::error::{StoreError, StoreResult};
use crate::insight::{Insight, InsightId, InsightQuery, InsightUpdate};
use crate::metadata::MetadataStore;
use crate::store::{InsightStore, StoreMetadata};

use reconciler::Reconciler;

/// Outcome of one full rescan of the records directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Records now in the cache.
    pub loaded: usize,
    /// Candidate files ignored because of an invalid name or unreadable contents.
    pub skipped: usize,
    /// The scan itself failed and the previous cache was restored.
    pub rolled_back: bool,
}

#[derive(Debug, Default)]
struct InsightCache {
    insights: HashMap<InsightId, Insight>,
    loaded: bool,
    last_report: Option<RefreshReport>,
}

#[derive(Debug, Clone, Copy)]
struct SelfWrite {
    at: Instant,
    pending: u32,
}

struct ScanOutcome {
    insights: HashMap<InsightId, Insight>,
    skipped: usize,
}

/// State shared between the store handle and its reconciliation thread.
struct StoreShared {
    insights_dir: PathBuf,
    config: HippoConfig,
    clock: Arc<dyn Clock>,
    metadata: MetadataStore,
    cache: Mutex<InsightCache>,
    self_writes: Mutex<HashMap<InsightId, SelfWrite>>,
}

impl StoreShared {
    fn lock_cache(&self) -> MutexGuard<'_, InsightCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_loaded(&self, cache: &mut InsightCache) {
        if !cache.loaded {
            self.refresh_locked(cache);
        }
    }

    fn refresh(&self) -> RefreshReport {
        let mut cache = self.lock_cache();
        self.refresh_locked(&mut cache)
    }

    /// Rebuilds the cache from disk. A scan that fails as a whole restores the previous
    /// contents: stale records are preferable to an empty store.
    #[tracing::instrument(
        name = "hippo_memory.file_store.refresh",
        skip_all,
        fields(insights_dir = %self.insights_dir.display())
    )]
    fn refresh_locked(&self, cache: &mut InsightCache) -> RefreshReport {
        let previous = std::mem::take(&mut cache.insights);
        let report = match scan_insights_dir(&self.insights_dir) {
            Ok(scan) => {
                cache.insights = scan.insights;
                cache.loaded = true;
                let report = RefreshReport {
                    loaded: cache.insights.len(),
                    skipped: scan.skipped,
                    rolled_back: false,
                };
                tracing::debug!(
                    loaded = report.loaded,
                    skipped = report.skipped,
                    "cache refresh complete"
                );
                report
            }
            Err(error) => {
                cache.insights = previous;
                tracing::error!(
                    %error,
                    kept = cache.insights.len(),
                    "cache refresh failed; keeping previous cache"
                );
                RefreshReport {
                    loaded: cache.insights.len(),
                    skipped: 0,
                    rolled_back: true,
                }
            }
        };
        cache.last_report = Some(report);
        report
    }

    fn insight_path(&self, id: InsightId) -> PathBuf {
        self.insights_dir
            .join(format!("{}.{INSIGHT_FILE_EXTENSION}", id.hyphenated()))
    }

    fn mark_self_written(&self, id: InsightId) {
        let ttl = self.config.self_write_ttl();
        let mut writes = self
            .self_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        writes.retain(|_, write| write.at.elapsed() <= ttl);
        let write = writes.entry(id).or_insert(SelfWrite {
            at: Instant::now(),
            pending: 0,
        });
        write.at = Instant::now();
        write.pending = write.pending.saturating_add(1);
    }

    /// Consumes one self-write marker for `id`; true when the change was ours.
    fn take_self_write(&self, id: InsightId) -> bool {
        let ttl = self.config.self_write_ttl();
        let mut writes = self
            .self_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(write) = writes.get_mut(&id) else {
            return false;
        };
        let fresh = write.at.elapsed() <= ttl;
        write.pending = write.pending.saturating_sub(1);
        if write.pending == 0 || !fresh {
            writes.remove(&id);
        }
        fresh
    }

    fn write_record(&self, insight: &Insight) -> StoreResult<()> {
        let path = self.insight_path(insight.id());
        let encoded = serde_json::to_string_pretty(insight)
            .map_err(|error| StoreError::json(&path, error))?;
        self.mark_self_written(insight.id());
        write_text_atomic(&path, &encoded)?;
        Ok(())
    }
}

/// Returns the id encoded in a record filename, or `None` for anything that is not a
/// `<uuid>.json` candidate.
pub(crate) fn insight_id_from_path(path: &Path) -> Option<InsightId> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(INSIGHT_FILE_EXTENSION) {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| InsightId::parse_str(stem).ok())
}

fn scan_insights_dir(dir: &Path) -> StoreResult<ScanOutcome> {
    let entries = fs::read_dir(dir).map_err(|error| StoreError::io(dir, error))?;
    let mut insights = HashMap::new();
    let mut skipped = 0usize;
    for entry in entries {
        let path = entry.map_err(|error| StoreError::io(dir, error))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(INSIGHT_FILE_EXTENSION) {
            continue;
        }
        let Some(id) = insight_id_from_path(&path) else {
            tracing::debug!(path = %path.display(), "skipping file without a valid id name");
            skipped += 1;
            continue;
        };
        match read_record(&path) {
            Ok(insight) if insight.id() == id => {
                insights.insert(id, insight);
            }
            Ok(insight) => {
                tracing::warn!(
                    path = %path.display(),
                    record_id = %insight.id(),
                    "skipping record whose id does not match its filename"
                );
                skipped += 1;
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "skipping unreadable record");
                skipped += 1;
            }
        }
    }
    Ok(ScanOutcome { insights, skipped })
}

fn read_record(path: &Path) -> StoreResult<Insight> {
    let raw = fs::read_to_string(path).map_err(|error| StoreError::io(path, error))?;
    let insight =
        serde_json::from_str::<Insight>(&raw).map_err(|error| StoreError::json(path, error))?;
    Ok(insight.normalized())
}

/// File-backed [`InsightStore`] rooted at a directory shared with other processes.
pub struct FileInsightStore {
    root_dir: PathBuf,
    shared: Arc<StoreShared>,
    reconciler: Mutex<Option<Reconciler>>,
}

impl FileInsightStore {
    /// Opens (creating if needed) the store rooted at `root_dir` using the system clock.
    pub fn open(root_dir: impl Into<PathBuf>, config: HippoConfig) -> StoreResult<Self> {
        Self::open_with_clock(root_dir, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        root_dir: impl Into<PathBuf>,
        config: HippoConfig,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let root_dir = root_dir.into();
        let insights_dir = root_dir.join(INSIGHTS_DIR_NAME);
        fs::create_dir_all(&insights_dir).map_err(|error| StoreError::io(&insights_dir, error))?;

        let shared = Arc::new(StoreShared {
            metadata: MetadataStore::new(root_dir.join(METADATA_FILE_NAME), clock.clone()),
            insights_dir,
            config,
            clock,
            cache: Mutex::new(InsightCache::default()),
            self_writes: Mutex::new(HashMap::new()),
        });
        let reconciler = Reconciler::start(shared.clone())?;
        Ok(Self {
            root_dir,
            shared,
            reconciler: Mutex::new(Some(reconciler)),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn insights_dir(&self) -> &Path {
        &self.shared.insights_dir
    }

    pub fn config(&self) -> &HippoConfig {
        &self.shared.config
    }

    pub fn metadata_store(&self) -> &MetadataStore {
        &self.shared.metadata
    }

    /// Forces a full rescan of the records directory.
    pub fn refresh(&self) -> RefreshReport {
        self.shared.refresh()
    }

    pub fn last_refresh_report(&self) -> Option<RefreshReport> {
        self.shared.lock_cache().last_report
    }

    /// True while filesystem notifications are being delivered to this instance.
    pub fn is_watching(&self) -> bool {
        self.reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Reconciler::is_watching)
    }

    /// Stops notification delivery and the background timers. Calling it again is a no-op.
    pub fn shutdown(&self) {
        let reconciler = self
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reconciler) = reconciler {
            reconciler.shutdown(self.shared.config.shutdown_timeout());
            tracing::debug!(root_dir = %self.root_dir.display(), "file store shut down");
        }
    }
}

impl Drop for FileInsightStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl InsightStore for FileInsightStore {
    fn get(&self, id: InsightId) -> StoreResult<Option<Insight>> {
        let mut cache = self.shared.lock_cache();
        self.shared.ensure_loaded(&mut cache);
        Ok(cache.insights.get(&id).cloned())
    }

    /// Writes the record and caches it under one cache guard, so the cache and the file
    /// agree on the last writer within this instance.
    fn store(&self, insight: Insight) -> StoreResult<InsightId> {
        let mut cache = self.shared.lock_cache();
        self.shared.ensure_loaded(&mut cache);
        let id = insight.id();
        self.shared.write_record(&insight)?;
        cache.insights.insert(id, insight);
        Ok(id)
    }

    fn update(&self, id: InsightId, update: &InsightUpdate) -> StoreResult<Option<Insight>> {
        let mut cache = self.shared.lock_cache();
        self.shared.ensure_loaded(&mut cache);
        let Some(mut insight) = cache.insights.get(&id).cloned() else {
            return Ok(None);
        };
        insight.apply_update(
            update,
            &self.shared.config.reinforcement,
            self.shared.clock.now(),
        )?;
        self.shared.write_record(&insight)?;
        cache.insights.insert(id, insight.clone());
        Ok(Some(insight))
    }

    fn delete(&self, id: InsightId) -> StoreResult<bool> {
        // The guard spans the unlink so a rescan cannot reload the record in between.
        let mut cache = self.shared.lock_cache();
        self.shared.ensure_loaded(&mut cache);
        let cached = cache.insights.remove(&id).is_some();
        let path = self.shared.insight_path(id);
        self.shared.mark_self_written(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(cached),
            Err(error) => Err(StoreError::io(&path, error)),
        }
    }

    fn get_all(&self) -> StoreResult<Vec<Insight>> {
        let mut cache = self.shared.lock_cache();
        self.shared.ensure_loaded(&mut cache);
        Ok(sorted_by_creation(cache.insights.values().cloned().collect()))
    }

    fn search(&self, query: &InsightQuery) -> StoreResult<Vec<Insight>> {
        let mut cache = self.shared.lock_cache();
        self.shared.ensure_loaded(&mut cache);
        Ok(sorted_by_creation(
            cache
                .insights
                .values()
                .filter(|insight| query.matches(insight))
                .cloned()
                .collect(),
        ))
    }

    fn record_access_on(&self, id: InsightId, active_day: u32) -> StoreResult<bool> {
        let mut cache = self.shared.lock_cache();
        self.shared.ensure_loaded(&mut cache);
        let Some(mut insight) = cache.insights.get(&id).cloned() else {
            return Ok(false);
        };
        insight.record_access(active_day);
        self.shared.write_record(&insight)?;
        cache.insights.insert(id, insight);
        Ok(true)
    }

    fn get_current_active_day(&self) -> StoreResult<u32> {
        self.shared.metadata.get_current_active_day()
    }

    fn metadata_snapshot(&self) -> StoreResult<StoreMetadata> {
        self.shared.metadata.load()
    }

    fn adopt_active_day_counter(&self, counter: u32) -> StoreResult<()> {
        self.shared.metadata.adopt_counter(counter)
    }

    fn create(
        &self,
        content: String,
        situation: Vec<String>,
        importance: f64,
    ) -> StoreResult<Insight> {
        let active_day = self.get_current_active_day()?;
        let insight = Insight::create_at(
            content,
            situation,
            importance,
            active_day,
            self.shared.clock.now(),
        )?;
        self.store(insight.clone())?;
        Ok(insight)
    }
}

pub(crate) fn sorted_by_creation(mut insights: Vec<Insight>) -> Vec<Insight> {
    insights.sort_by(|left, right| {
        left.created_at()
            .cmp(&right.created_at())
            .then_with(|| left.id().cmp(&right.id()))
    });
    insights
}
