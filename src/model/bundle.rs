//! Composite data bundle handed from the data router to the quote engine.

use serde::{Deserialize, Serialize};

use super::flight::CanonicalFlight;
use super::weather::CanonicalWeather;

/// Outcome of one aggregation sub-query within a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQueryMeta {
    /// What was queried, e.g. `flight:BT318:2025-07-01` or `wx:LHR:...`.
    pub target: String,
    pub quality_score: f64,
    pub sources_used: Vec<String>,
    pub from_cache: bool,
    pub processing_time_ms: u64,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationMetadata {
    pub flight: SubQueryMeta,
    pub weather: Vec<SubQueryMeta>,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDataBundle {
    pub flight: CanonicalFlight,
    pub weather: Vec<CanonicalWeather>,
    pub metadata: AggregationMetadata,
}

impl PolicyDataBundle {
    /// Bundle-level quality. Flight data dominates; weather contributes when
    /// present but its absence is not a penalty (the router tolerates
    /// weather failures).
    pub fn overall_quality(&self) -> f64 {
        if self.weather.is_empty() {
            return self.flight.data_quality_score;
        }
        let weather_mean = self
            .weather
            .iter()
            .map(|w| w.data_quality_score)
            .sum::<f64>()
            / self.weather.len() as f64;
        0.7 * self.flight.data_quality_score + 0.3 * weather_mean
    }
}
