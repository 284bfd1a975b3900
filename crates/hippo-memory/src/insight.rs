//! Insight records and the temporal scoring model.
//!
//! An insight carries its own access history as `(active_day, count)` pairs. Creation counts
//! as the first access, so every recency and frequency calculation can assume a non-empty
//! history. Recency and frequency are measured in active days; importance decay is the one
//! calculation that uses wall-clock days.

use chrono::{DateTime, Utc};
use hippo_core::fractional_days_between;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ReinforcementPolicy;
use crate::constants::{IMPORTANCE_DECAY_FACTOR, MAX_DAILY_ACCESS_ENTRIES};
use crate::error::{StoreError, StoreResult};

/// Identifier of an insight; its hyphenated form is the on-disk filename stem.
pub type InsightId = Uuid;

/// One atomic recorded observation plus the signals used to score it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "uuid", alias = "id")]
    id: InsightId,
    content: String,
    situation: Vec<String>,
    importance: f64,
    created_at: DateTime<Utc>,
    #[serde(rename = "content_last_modified_at", alias = "content_modified_at")]
    content_modified_at: DateTime<Utc>,
    #[serde(
        rename = "importance_last_modified_at",
        alias = "importance_modified_at"
    )]
    importance_modified_at: DateTime<Utc>,
    #[serde(default)]
    daily_access_counts: Vec<(u32, u32)>,
}

impl Insight {
    /// Creates an insight stamped with the current time.
    pub fn create(
        content: impl Into<String>,
        situation: Vec<String>,
        importance: f64,
        current_active_day: u32,
    ) -> StoreResult<Self> {
        Self::create_at(content, situation, importance, current_active_day, Utc::now())
    }

    pub fn create_at(
        content: impl Into<String>,
        situation: Vec<String>,
        importance: f64,
        current_active_day: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Self> {
        validate_importance(importance)?;
        Ok(Self {
            id: Uuid::new_v4(),
            content: content.into(),
            situation,
            importance,
            created_at: now,
            content_modified_at: now,
            importance_modified_at: now,
            daily_access_counts: vec![(current_active_day, 1)],
        })
    }

    pub fn id(&self) -> InsightId {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn situation(&self) -> &[String] {
        &self.situation
    }

    /// Base importance as last set or reinforced, before decay.
    pub fn importance(&self) -> f64 {
        self.importance
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn content_modified_at(&self) -> DateTime<Utc> {
        self.content_modified_at
    }

    pub fn importance_modified_at(&self) -> DateTime<Utc> {
        self.importance_modified_at
    }

    pub fn daily_access_counts(&self) -> &[(u32, u32)] {
        &self.daily_access_counts
    }

    pub fn last_access_day(&self) -> Option<u32> {
        self.daily_access_counts.last().map(|(day, _)| *day)
    }

    pub fn total_accesses(&self) -> u64 {
        self.daily_access_counts
            .iter()
            .map(|(_, count)| u64::from(*count))
            .sum()
    }

    pub fn days_since_created(&self) -> f64 {
        fractional_days_between(self.created_at, Utc::now())
    }

    pub fn days_since_importance_modified(&self) -> f64 {
        self.days_since_importance_modified_at(Utc::now())
    }

    pub fn days_since_importance_modified_at(&self, now: DateTime<Utc>) -> f64 {
        fractional_days_between(self.importance_modified_at, now)
    }

    /// `importance * 0.9^days` where days are wall-clock days since importance last changed.
    pub fn compute_current_importance(&self) -> f64 {
        self.compute_current_importance_at(Utc::now())
    }

    pub fn compute_current_importance_at(&self, now: DateTime<Utc>) -> f64 {
        let days = self.days_since_importance_modified_at(now);
        self.importance * IMPORTANCE_DECAY_FACTOR.powf(days)
    }

    /// Rebases importance on its decayed value times `multiplier`, clamped to [0, 1].
    pub fn apply_reinforcement(&mut self, multiplier: f64) -> StoreResult<()> {
        self.apply_reinforcement_at(multiplier, Utc::now())
    }

    pub fn apply_reinforcement_at(&mut self, multiplier: f64, now: DateTime<Utc>) -> StoreResult<()> {
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(StoreError::InvalidMultiplier(multiplier));
        }
        let current = self.compute_current_importance_at(now);
        self.importance = (current * multiplier).clamp(0.0, 1.0);
        self.importance_modified_at = now;
        Ok(())
    }

    /// Replaces content and/or situation; either change stamps `content_modified_at`.
    pub fn update_content(&mut self, content: Option<String>, situation: Option<Vec<String>>) {
        self.update_content_at(content, situation, Utc::now());
    }

    pub fn update_content_at(
        &mut self,
        content: Option<String>,
        situation: Option<Vec<String>>,
        now: DateTime<Utc>,
    ) {
        if let Some(content) = content {
            self.content = content;
            self.content_modified_at = now;
        }
        if let Some(situation) = situation {
            self.situation = situation;
            self.content_modified_at = now;
        }
    }

    /// Sets base importance explicitly, restarting its decay.
    pub fn set_importance_at(&mut self, importance: f64, now: DateTime<Utc>) -> StoreResult<()> {
        validate_importance(importance)?;
        self.importance = importance;
        self.importance_modified_at = now;
        Ok(())
    }

    /// Applies a partial update: field replacements first, then any reinforcement.
    pub fn apply_update(
        &mut self,
        update: &InsightUpdate,
        policy: &ReinforcementPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(importance) = update.importance {
            validate_importance(importance)?;
        }
        self.update_content_at(update.content.clone(), update.situation.clone(), now);
        if let Some(importance) = update.importance {
            self.set_importance_at(importance, now)?;
        }
        if let Some(reinforcement) = update.reinforcement {
            self.apply_reinforcement_at(reinforcement.multiplier(policy), now)?;
        }
        Ok(())
    }

    /// Counts one access on `active_day`, keeping the history sorted, one entry per day, and
    /// capped at the most recent entries.
    pub fn record_access(&mut self, active_day: u32) {
        match self.last_access_day() {
            Some(last_day) if last_day >= active_day => {
                match self
                    .daily_access_counts
                    .binary_search_by_key(&active_day, |(day, _)| *day)
                {
                    Ok(index) => {
                        let count = &mut self.daily_access_counts[index].1;
                        *count = count.saturating_add(1);
                    }
                    Err(index) => self.daily_access_counts.insert(index, (active_day, 1)),
                }
            }
            _ => self.daily_access_counts.push((active_day, 1)),
        }
        self.trim_access_history();
    }

    /// Average accesses per active day over the last `window_days` active days, divided by the
    /// days actually spanned by those accesses rather than the whole window.
    pub fn calculate_frequency(&self, current_active_day: u32, window_days: u32) -> f64 {
        if window_days == 0 {
            return 0.0;
        }
        let window_start = i64::from(current_active_day) - i64::from(window_days) + 1;
        let mut total = 0u64;
        let mut min_day = u32::MAX;
        let mut max_day = 0u32;
        for (day, count) in &self.daily_access_counts {
            if i64::from(*day) < window_start {
                continue;
            }
            total += u64::from(*count);
            min_day = min_day.min(*day);
            max_day = max_day.max(*day);
        }
        if total == 0 {
            return 0.0;
        }
        total as f64 / f64::from(max_day - min_day + 1)
    }

    /// `exp(-decay_rate * active days since last access)`; 0 for an empty history.
    pub fn calculate_recency_score(&self, current_active_day: u32, decay_rate: f64) -> f64 {
        let Some(last_day) = self.last_access_day() else {
            return 0.0;
        };
        let elapsed = (i64::from(current_active_day) - i64::from(last_day)).max(0) as f64;
        (-decay_rate * elapsed).exp()
    }

    /// Repairs records read from disk: clamps importance and restores the history invariants.
    pub(crate) fn normalized(mut self) -> Self {
        if !self.importance.is_finite() {
            self.importance = 0.0;
        }
        self.importance = self.importance.clamp(0.0, 1.0);
        self.daily_access_counts.sort_by_key(|(day, _)| *day);
        self.daily_access_counts.dedup_by(|later, earlier| {
            if later.0 == earlier.0 {
                earlier.1 = earlier.1.saturating_add(later.1);
                true
            } else {
                false
            }
        });
        self.trim_access_history();
        self
    }

    fn trim_access_history(&mut self) {
        let overflow = self
            .daily_access_counts
            .len()
            .saturating_sub(MAX_DAILY_ACCESS_ENTRIES);
        if overflow > 0 {
            self.daily_access_counts.drain(..overflow);
        }
    }
}

fn validate_importance(importance: f64) -> StoreResult<()> {
    if importance.is_finite() && (0.0..=1.0).contains(&importance) {
        Ok(())
    } else {
        Err(StoreError::InvalidImportance(importance))
    }
}

/// Upvote/downvote feedback, resolved to a multiplier by the configured policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reinforcement {
    Upvote,
    Downvote,
    Multiplier(f64),
}

impl Reinforcement {
    pub fn multiplier(self, policy: &ReinforcementPolicy) -> f64 {
        match self {
            Self::Upvote => policy.upvote_multiplier,
            Self::Downvote => policy.downvote_multiplier,
            Self::Multiplier(value) => value,
        }
    }
}

/// Partial-field update applied through the insight mutation operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightUpdate {
    pub content: Option<String>,
    pub situation: Option<Vec<String>>,
    pub importance: Option<f64>,
    pub reinforcement: Option<Reinforcement>,
}

impl InsightUpdate {
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn situation(mut self, situation: Vec<String>) -> Self {
        self.situation = Some(situation);
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn reinforce(mut self, reinforcement: Reinforcement) -> Self {
        self.reinforcement = Some(reinforcement);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.situation.is_none()
            && self.importance.is_none()
            && self.reinforcement.is_none()
    }
}

/// Case-insensitive containment filter over content and situation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsightQuery {
    pub text: Option<String>,
    pub situation_terms: Vec<String>,
}

impl InsightQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            situation_terms: Vec::new(),
        }
    }

    pub fn with_situation_terms(mut self, terms: Vec<String>) -> Self {
        self.situation_terms = terms;
        self
    }

    /// Text must occur in the content or in some situation element; when situation terms are
    /// present at least one must occur in some situation element.
    pub fn matches(&self, insight: &Insight) -> bool {
        let text_matches = self
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| {
                let needle = text.to_lowercase();
                insight.content.to_lowercase().contains(&needle)
                    || insight
                        .situation
                        .iter()
                        .any(|element| element.to_lowercase().contains(&needle))
            })
            .unwrap_or(true);
        if !text_matches {
            return false;
        }

        let terms = self
            .situation_terms
            .iter()
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect::<Vec<_>>();
        terms.is_empty()
            || insight.situation.iter().any(|element| {
                let element = element.to_lowercase();
                terms.iter().any(|term| element.contains(term.as_str()))
            })
    }
}
