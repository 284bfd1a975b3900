//! Default tuning values for scoring, reinforcement, relevance, and the storage layout.

/// Number of recent active days considered when computing access frequency.
pub const FREQUENCY_WINDOW_DAYS: u32 = 30;

/// Recency decay rate per active day.
pub const RECENCY_DECAY_RATE: f64 = 0.05;

/// Importance decays by this factor per wall-clock day since it was last modified.
pub const IMPORTANCE_DECAY_FACTOR: f64 = 0.9;

/// Maximum number of per-day access entries kept on an insight.
pub const MAX_DAILY_ACCESS_ENTRIES: usize = 90;

pub const UPVOTE_MULTIPLIER: f64 = 1.5;
pub const DOWNVOTE_MULTIPLIER: f64 = 0.5;

pub const RELEVANCE_WEIGHT_RECENCY: f64 = 0.30;
pub const RELEVANCE_WEIGHT_FREQUENCY: f64 = 0.20;
pub const RELEVANCE_WEIGHT_IMPORTANCE: f64 = 0.35;
pub const RELEVANCE_WEIGHT_CONTEXT: f64 = 0.15;

/// Accesses per active day treated as the top of the frequency scale.
pub const MAX_REASONABLE_FREQUENCY: f64 = 10.0;

pub const CONTENT_MATCH_THRESHOLD: f64 = 0.4;
pub const SITUATION_MATCH_THRESHOLD: f64 = 0.4;

pub const CACHE_REFRESH_INTERVAL_SECS: u64 = 30;
/// Lower bound on the periodic rescan interval, whatever the configuration says.
pub const MIN_CACHE_REFRESH_INTERVAL_MS: u64 = 50;
pub const FILE_EVENT_DEBOUNCE_MS: u64 = 1_000;
pub const SELF_WRITE_TTL_MS: u64 = 5_000;
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

pub const INSIGHTS_DIR_NAME: &str = "insights";
pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const MIGRATION_MARKER_FILE_NAME: &str = ".migration_complete";
pub const INSIGHT_FILE_EXTENSION: &str = "json";
pub const CORRUPT_BACKUP_SUFFIX: &str = ".backup";
pub const MIGRATED_LEGACY_SUFFIX: &str = ".migrated";
