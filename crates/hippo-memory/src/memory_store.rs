//! Disk-free [`InsightStore`] whose active day is driven by the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hippo_core::{Clock, SystemClock};

use crate::config::ReinforcementPolicy;
use crate::error::StoreResult;
use crate::file_store::sorted_by_creation;
use crate::insight::{Insight, InsightId, InsightUpdate};
use crate::store::{InsightStore, StoreMetadata};

#[derive(Debug)]
struct MemoryState {
    insights: HashMap<InsightId, Insight>,
    active_day: u32,
}

/// Keeps every record in a map. The active day never advances on its own; tests move it
/// with [`InMemoryInsightStore::advance_days`] and [`InMemoryInsightStore::set_active_day`].
#[derive(Debug)]
pub struct InMemoryInsightStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    reinforcement: ReinforcementPolicy,
}

impl Default for InMemoryInsightStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInsightStore {
    pub fn new() -> Self {
        Self::with_active_day(1)
    }

    pub fn with_active_day(active_day: u32) -> Self {
        Self::with_clock(active_day, Arc::new(SystemClock))
    }

    /// Uses `clock` for creation and modification timestamps.
    pub fn with_clock(active_day: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                insights: HashMap::new(),
                active_day,
            }),
            clock,
            reinforcement: ReinforcementPolicy::default(),
        }
    }

    pub fn with_reinforcement(mut self, reinforcement: ReinforcementPolicy) -> Self {
        self.reinforcement = reinforcement;
        self
    }

    pub fn advance_days(&self, days: u32) -> u32 {
        let mut state = self.lock();
        state.active_day = state.active_day.saturating_add(days);
        state.active_day
    }

    pub fn set_active_day(&self, active_day: u32) -> u32 {
        self.lock().active_day = active_day;
        active_day
    }

    pub fn len(&self) -> usize {
        self.lock().insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InsightStore for InMemoryInsightStore {
    fn get(&self, id: InsightId) -> StoreResult<Option<Insight>> {
        Ok(self.lock().insights.get(&id).cloned())
    }

    fn store(&self, insight: Insight) -> StoreResult<InsightId> {
        let id = insight.id();
        self.lock().insights.insert(id, insight);
        Ok(id)
    }

    fn update(&self, id: InsightId, update: &InsightUpdate) -> StoreResult<Option<Insight>> {
        let mut state = self.lock();
        let Some(existing) = state.insights.get(&id) else {
            return Ok(None);
        };
        let mut insight = existing.clone();
        insight.apply_update(update, &self.reinforcement, self.clock.now())?;
        state.insights.insert(id, insight.clone());
        Ok(Some(insight))
    }

    fn delete(&self, id: InsightId) -> StoreResult<bool> {
        Ok(self.lock().insights.remove(&id).is_some())
    }

    fn get_all(&self) -> StoreResult<Vec<Insight>> {
        Ok(sorted_by_creation(
            self.lock().insights.values().cloned().collect(),
        ))
    }

    fn record_access_on(&self, id: InsightId, active_day: u32) -> StoreResult<bool> {
        let mut state = self.lock();
        match state.insights.get_mut(&id) {
            Some(insight) => {
                insight.record_access(active_day);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_current_active_day(&self) -> StoreResult<u32> {
        Ok(self.lock().active_day)
    }

    fn metadata_snapshot(&self) -> StoreResult<StoreMetadata> {
        Ok(StoreMetadata {
            active_day_counter: self.lock().active_day,
            last_calendar_date_used: None,
        })
    }

    fn adopt_active_day_counter(&self, counter: u32) -> StoreResult<()> {
        self.lock().active_day = counter;
        Ok(())
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

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use hippo_core::ManualClock;

    use super::*;
    use crate::config::ScoringConfig;
    use crate::insight::Reinforcement;

    #[test]
    fn functional_active_day_is_caller_controlled() {
        let store = InMemoryInsightStore::new();
        assert_eq!(store.get_current_active_day().expect("day"), 1);
        assert_eq!(store.get_current_active_day().expect("still day one"), 1);
        assert_eq!(store.advance_days(4), 5);
        assert_eq!(store.set_active_day(2), 2);
        assert_eq!(store.metadata_snapshot().expect("meta").active_day_counter, 2);
    }

    #[test]
    fn functional_recency_and_frequency_follow_simulated_days() {
        let store = InMemoryInsightStore::new();
        let scoring = ScoringConfig::default();
        let created = store
            .create("cache invalidation notes".to_string(), Vec::new(), 0.6)
            .expect("create");

        store.advance_days(10);
        let aged = store.get(created.id()).expect("get").expect("present");
        let stale_recency = aged.calculate_recency_score(11, scoring.recency_decay_rate);

        assert!(store.record_access(created.id()).expect("access"));
        let refreshed = store.get(created.id()).expect("get").expect("present");
        assert_eq!(refreshed.daily_access_counts(), &[(1, 1), (11, 1)]);
        assert!(refreshed.calculate_recency_score(11, scoring.recency_decay_rate) > stale_recency);
        assert!((refreshed.calculate_recency_score(11, scoring.recency_decay_rate) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unit_update_uses_injected_clock() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap());
        let store = InMemoryInsightStore::with_clock(1, Arc::new(clock.clone()));
        let created = store
            .create("pin toolchain".to_string(), Vec::new(), 0.4)
            .expect("create");
        clock.advance_days(2);

        let updated = store
            .reinforce(created.id(), Reinforcement::Downvote)
            .expect("reinforce")
            .expect("present");
        // 0.4 decayed over two days, then halved.
        assert!((updated.importance() - 0.4 * 0.81 * 0.5).abs() < 1e-9);
        assert_eq!(updated.importance_modified_at(), clock.now());
        assert_eq!(updated.created_at(), created.created_at());
    }

    #[test]
    fn unit_missing_ids_are_not_errors() {
        let store = InMemoryInsightStore::new();
        let missing = InsightId::new_v4();
        assert!(store.get(missing).expect("get").is_none());
        assert!(!store.delete(missing).expect("delete"));
        assert!(!store.record_access_on(missing, 1).expect("access"));
        assert!(store.is_empty());
    }
}
