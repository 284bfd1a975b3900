//! The storage contract shared by every backend.

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::insight::{Insight, InsightId, InsightQuery, InsightUpdate, Reinforcement};

/// Persisted active-day clock state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    #[serde(default)]
    pub active_day_counter: u32,
    #[serde(default)]
    pub last_calendar_date_used: Option<String>,
}

/// Synchronous insight storage contract implemented by the file, in-memory, legacy, and
/// migration backends. A missing id is reported through `Option`/`bool`, never as an error.
pub trait InsightStore: Send + Sync {
    fn get(&self, id: InsightId) -> StoreResult<Option<Insight>>;

    /// Persists `insight`, replacing any record with the same id.
    fn store(&self, insight: Insight) -> StoreResult<InsightId>;

    /// Applies `update` to an existing record; `None` when the id is unknown.
    fn update(&self, id: InsightId, update: &InsightUpdate) -> StoreResult<Option<Insight>>;

    /// Removes a record; `false` when the id is unknown.
    fn delete(&self, id: InsightId) -> StoreResult<bool>;

    fn get_all(&self) -> StoreResult<Vec<Insight>>;

    fn search(&self, query: &InsightQuery) -> StoreResult<Vec<Insight>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|insight| query.matches(insight))
            .collect())
    }

    /// Counts one access on `active_day`; `false` when the id is unknown.
    fn record_access_on(&self, id: InsightId, active_day: u32) -> StoreResult<bool>;

    fn record_access(&self, id: InsightId) -> StoreResult<bool> {
        let active_day = self.get_current_active_day()?;
        self.record_access_on(id, active_day)
    }

    /// Returns the active day, advancing it when this is the first call on a new calendar date.
    fn get_current_active_day(&self) -> StoreResult<u32>;

    /// Reads the active-day state without advancing it.
    fn metadata_snapshot(&self) -> StoreResult<StoreMetadata>;

    /// Overwrites the active-day counter, keeping the stored calendar date.
    fn adopt_active_day_counter(&self, counter: u32) -> StoreResult<()>;

    fn create(
        &self,
        content: String,
        situation: Vec<String>,
        importance: f64,
    ) -> StoreResult<Insight> {
        let active_day = self.get_current_active_day()?;
        let insight = Insight::create(content, situation, importance, active_day)?;
        self.store(insight.clone())?;
        Ok(insight)
    }

    fn reinforce(
        &self,
        id: InsightId,
        reinforcement: Reinforcement,
    ) -> StoreResult<Option<Insight>> {
        self.update(id, &InsightUpdate::default().reinforce(reinforcement))
    }
}
