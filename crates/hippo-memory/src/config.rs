//! Store configuration with defaults and `HIPPO_*` environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CACHE_REFRESH_INTERVAL_SECS, CONTENT_MATCH_THRESHOLD, DOWNVOTE_MULTIPLIER,
    FILE_EVENT_DEBOUNCE_MS, FREQUENCY_WINDOW_DAYS, MAX_REASONABLE_FREQUENCY,
    MIN_CACHE_REFRESH_INTERVAL_MS, RECENCY_DECAY_RATE,
    RELEVANCE_WEIGHT_CONTEXT, RELEVANCE_WEIGHT_FREQUENCY, RELEVANCE_WEIGHT_IMPORTANCE,
    RELEVANCE_WEIGHT_RECENCY, SELF_WRITE_TTL_MS, SHUTDOWN_TIMEOUT_MS, SITUATION_MATCH_THRESHOLD,
    UPVOTE_MULTIPLIER,
};

pub const HIPPO_CACHE_REFRESH_SECS_ENV: &str = "HIPPO_CACHE_REFRESH_SECS";
pub const HIPPO_FILE_EVENT_DEBOUNCE_MS_ENV: &str = "HIPPO_FILE_EVENT_DEBOUNCE_MS";
pub const HIPPO_ENABLE_WATCHING_ENV: &str = "HIPPO_ENABLE_WATCHING";
pub const HIPPO_RECENCY_DECAY_RATE_ENV: &str = "HIPPO_RECENCY_DECAY_RATE";
pub const HIPPO_FREQUENCY_WINDOW_DAYS_ENV: &str = "HIPPO_FREQUENCY_WINDOW_DAYS";

/// Parameters of the temporal scoring model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub frequency_window_days: u32,
    pub recency_decay_rate: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            frequency_window_days: FREQUENCY_WINDOW_DAYS,
            recency_decay_rate: RECENCY_DECAY_RATE,
        }
    }
}

/// Multipliers applied by upvotes and downvotes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinforcementPolicy {
    pub upvote_multiplier: f64,
    pub downvote_multiplier: f64,
}

impl Default for ReinforcementPolicy {
    fn default() -> Self {
        Self {
            upvote_multiplier: UPVOTE_MULTIPLIER,
            downvote_multiplier: DOWNVOTE_MULTIPLIER,
        }
    }
}

/// Weights and thresholds of the composite relevance formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub weight_recency: f64,
    pub weight_frequency: f64,
    pub weight_importance: f64,
    pub weight_context: f64,
    pub max_reasonable_frequency: f64,
    pub content_match_threshold: f64,
    pub situation_match_threshold: f64,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            weight_recency: RELEVANCE_WEIGHT_RECENCY,
            weight_frequency: RELEVANCE_WEIGHT_FREQUENCY,
            weight_importance: RELEVANCE_WEIGHT_IMPORTANCE,
            weight_context: RELEVANCE_WEIGHT_CONTEXT,
            max_reasonable_frequency: MAX_REASONABLE_FREQUENCY,
            content_match_threshold: CONTENT_MATCH_THRESHOLD,
            situation_match_threshold: SITUATION_MATCH_THRESHOLD,
        }
    }
}

/// Top-level configuration handed to every store at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HippoConfig {
    pub cache_refresh_interval_ms: u64,
    pub file_event_debounce_ms: u64,
    pub self_write_ttl_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub enable_watching: bool,
    pub scoring: ScoringConfig,
    pub reinforcement: ReinforcementPolicy,
    pub relevance: RelevanceConfig,
}

impl Default for HippoConfig {
    fn default() -> Self {
        Self {
            cache_refresh_interval_ms: CACHE_REFRESH_INTERVAL_SECS * 1_000,
            file_event_debounce_ms: FILE_EVENT_DEBOUNCE_MS,
            self_write_ttl_ms: SELF_WRITE_TTL_MS,
            shutdown_timeout_ms: SHUTDOWN_TIMEOUT_MS,
            enable_watching: true,
            scoring: ScoringConfig::default(),
            reinforcement: ReinforcementPolicy::default(),
            relevance: RelevanceConfig::default(),
        }
    }
}

impl HippoConfig {
    /// Defaults overlaid with any valid `HIPPO_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_override::<u64>(HIPPO_CACHE_REFRESH_SECS_ENV).filter(|v| *v > 0) {
            config.cache_refresh_interval_ms = secs.saturating_mul(1_000);
        }
        if let Some(ms) = env_override::<u64>(HIPPO_FILE_EVENT_DEBOUNCE_MS_ENV) {
            config.file_event_debounce_ms = ms;
        }
        if let Some(enabled) = env_override_bool(HIPPO_ENABLE_WATCHING_ENV) {
            config.enable_watching = enabled;
        }
        if let Some(rate) = env_override::<f64>(HIPPO_RECENCY_DECAY_RATE_ENV)
            .filter(|value| value.is_finite() && *value >= 0.0)
        {
            config.scoring.recency_decay_rate = rate;
        }
        if let Some(days) = env_override::<u32>(HIPPO_FREQUENCY_WINDOW_DAYS_ENV).filter(|v| *v > 0)
        {
            config.scoring.frequency_window_days = days;
        }
        config
    }

    /// Defaults with the filesystem watcher disabled; other instances' writes then arrive
    /// through the periodic rescan only.
    pub fn without_watching() -> Self {
        Self {
            enable_watching: false,
            ..Self::default()
        }
    }

    /// Periodic rescan interval, never shorter than [`MIN_CACHE_REFRESH_INTERVAL_MS`].
    pub fn cache_refresh_interval(&self) -> Duration {
        Duration::from_millis(
            self.cache_refresh_interval_ms
                .max(MIN_CACHE_REFRESH_INTERVAL_MS),
        )
    }

    pub fn file_event_debounce(&self) -> Duration {
        Duration::from_millis(self.file_event_debounce_ms)
    }

    pub fn self_write_ttl(&self) -> Duration {
        Duration::from_millis(self.self_write_ttl_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = trimmed, "ignoring unparsable override");
            None
        }
    }
}

fn env_override_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => None,
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(variable = name, value = other, "ignoring unparsable override");
            None
        }
    }
}
