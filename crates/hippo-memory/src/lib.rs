//! Insight memory engine: temporally scored records behind interchangeable stores.
//!
//! [`FileInsightStore`] keeps one JSON file per insight and stays coherent with other
//! processes sharing the directory. [`MigrationAdapter`] folds a [`LegacyInsightStore`]
//! document into it lazily. [`InMemoryInsightStore`] implements the same
//! [`InsightStore`] contract without touching disk.

pub mod config;
pub mod constants;
pub mod error;
pub mod file_store;
pub mod insight;
pub mod legacy;
pub mod memory_store;
pub mod metadata;
pub mod migration;
pub mod relevance;
pub mod store;

pub use config::{HippoConfig, ReinforcementPolicy, RelevanceConfig, ScoringConfig};
pub use error::{StoreError, StoreResult};
pub use file_store::{FileInsightStore, RefreshReport};
pub use insight::{Insight, InsightId, InsightQuery, InsightUpdate, Reinforcement};
pub use legacy::{LegacyDocument, LegacyInsightStore};
pub use memory_store::InMemoryInsightStore;
pub use metadata::MetadataStore;
pub use migration::{MigrationAdapter, MigrationOutcome, MigrationReport, MigrationStatus};
pub use relevance::{
    importance_distribution, ImportanceDistribution, RankedInsight, RankingQuery,
    RelevanceRanker, SimilarityScorer, SubstringSimilarity,
};
pub use store::{InsightStore, StoreMetadata};
