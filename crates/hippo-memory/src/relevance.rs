//! Composite relevance ranking over insights.
//!
//! `relevance = w_r * recency + w_f * min(1, frequency / max_frequency)
//!            + w_i * clamp(current_importance) + w_c * situation_relevance`
//!
//! Content similarity gates inclusion but is not part of the score. The similarity backend
//! is pluggable; [`SubstringSimilarity`] is the built-in fallback.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{HippoConfig, RelevanceConfig, ScoringConfig};
use crate::insight::Insight;

/// Scores how well `query` describes `content`, in `[0, 1]`.
pub trait SimilarityScorer: Send + Sync {
    fn similarity(&self, content: &str, query: &str) -> f64;
}

/// Case-insensitive containment: 1.0 on a match, 0.3 otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringSimilarity;

const SUBSTRING_MISS_SCORE: f64 = 0.3;

impl SimilarityScorer for SubstringSimilarity {
    fn similarity(&self, content: &str, query: &str) -> f64 {
        if content.to_lowercase().contains(&query.to_lowercase()) {
            1.0
        } else {
            SUBSTRING_MISS_SCORE
        }
    }
}

/// Filters applied while ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingQuery {
    pub text: Option<String>,
    pub situation_filters: Vec<String>,
    pub min_relevance: Option<f64>,
    pub max_relevance: Option<f64>,
}

impl RankingQuery {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn situations(mut self, filters: Vec<String>) -> Self {
        self.situation_filters = filters;
        self
    }

    /// Keeps results whose relevance lies in `[min, max]`; an absent bound is open.
    pub fn relevance_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_relevance = min;
        self.max_relevance = max;
        self
    }

    fn query_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    fn filters(&self) -> Vec<String> {
        self.situation_filters
            .iter()
            .map(|filter| filter.trim().to_lowercase())
            .filter(|filter| !filter.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedInsight {
    pub insight: Insight,
    pub relevance: f64,
    /// Importance with wall-clock decay applied, before clamping.
    pub current_importance: f64,
    pub content_match: bool,
    /// Situation elements matched by at least one filter.
    pub situation_matches: Vec<String>,
}

pub struct RelevanceRanker<S = SubstringSimilarity> {
    scorer: S,
    relevance: RelevanceConfig,
    scoring: ScoringConfig,
}

impl RelevanceRanker<SubstringSimilarity> {
    pub fn new(config: &HippoConfig) -> Self {
        Self::with_scorer(SubstringSimilarity, config)
    }
}

impl<S: SimilarityScorer> RelevanceRanker<S> {
    pub fn with_scorer(scorer: S, config: &HippoConfig) -> Self {
        Self {
            scorer,
            relevance: config.relevance,
            scoring: config.scoring,
        }
    }

    /// Scores every insight, drops those failing the query, and sorts by descending relevance.
    pub fn rank(
        &self,
        insights: &[Insight],
        query: &RankingQuery,
        current_active_day: u32,
        now: DateTime<Utc>,
    ) -> Vec<RankedInsight> {
        let text = query.query_text();
        let filters = query.filters();
        let mut ranked = insights
            .iter()
            .filter_map(|insight| {
                self.score(insight, text, &filters, current_active_day, now)
            })
            .filter(|ranked| {
                query.min_relevance.map_or(true, |min| ranked.relevance >= min)
                    && query.max_relevance.map_or(true, |max| ranked.relevance <= max)
            })
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| right.relevance.total_cmp(&left.relevance));
        ranked
    }

    fn score(
        &self,
        insight: &Insight,
        text: Option<&str>,
        filters: &[String],
        current_active_day: u32,
        now: DateTime<Utc>,
    ) -> Option<RankedInsight> {
        let content_match = match text {
            Some(text) => {
                let similarity = self.scorer.similarity(insight.content(), text).clamp(0.0, 1.0);
                if similarity <= self.relevance.content_match_threshold {
                    return None;
                }
                true
            }
            None => false,
        };

        let situation_matches = insight
            .situation()
            .iter()
            .filter(|element| {
                let element = element.to_lowercase();
                filters.iter().any(|filter| element.contains(filter.as_str()))
            })
            .cloned()
            .collect::<Vec<_>>();
        let situation_relevance = if filters.is_empty() || !situation_matches.is_empty() {
            1.0
        } else {
            0.0
        };
        if !filters.is_empty() && situation_relevance <= self.relevance.situation_match_threshold {
            return None;
        }

        let recency =
            insight.calculate_recency_score(current_active_day, self.scoring.recency_decay_rate);
        let frequency = insight
            .calculate_frequency(current_active_day, self.scoring.frequency_window_days);
        let normalized_frequency = if self.relevance.max_reasonable_frequency > 0.0 {
            (frequency / self.relevance.max_reasonable_frequency).min(1.0)
        } else {
            0.0
        };
        let current_importance = insight.compute_current_importance_at(now);

        let relevance = self.relevance.weight_recency * recency
            + self.relevance.weight_frequency * normalized_frequency
            + self.relevance.weight_importance * current_importance.clamp(0.0, 1.0)
            + self.relevance.weight_context * situation_relevance;

        Some(RankedInsight {
            insight: insight.clone(),
            relevance,
            current_importance,
            content_match,
            situation_matches,
        })
    }
}

/// Counts of insights per band of decayed importance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportanceDistribution {
    #[serde(rename = "below_0.2")]
    pub below_0_2: usize,
    #[serde(rename = "0.2_to_0.4")]
    pub from_0_2_to_0_4: usize,
    #[serde(rename = "0.4_to_0.6")]
    pub from_0_4_to_0_6: usize,
    #[serde(rename = "0.6_to_0.8")]
    pub from_0_6_to_0_8: usize,
    #[serde(rename = "0.8_to_1.0")]
    pub from_0_8_to_1_0: usize,
    #[serde(rename = "above_1.0")]
    pub above_1_0: usize,
}

pub fn importance_distribution(insights: &[Insight], now: DateTime<Utc>) -> ImportanceDistribution {
    let mut distribution = ImportanceDistribution::default();
    for insight in insights {
        let importance = insight.compute_current_importance_at(now);
        let bucket = if importance < 0.2 {
            &mut distribution.below_0_2
        } else if importance < 0.4 {
            &mut distribution.from_0_2_to_0_4
        } else if importance < 0.6 {
            &mut distribution.from_0_4_to_0_6
        } else if importance < 0.8 {
            &mut distribution.from_0_6_to_0_8
        } else if importance <= 1.0 {
            &mut distribution.from_0_8_to_1_0
        } else {
            &mut distribution.above_1_0
        };
        *bucket += 1;
    }
    distribution
}
