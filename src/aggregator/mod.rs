//! Multi-source aggregation: health-aware routing, caching, bounded retry,
//! parallel fan-out and conflict resolution.

pub mod cache;
pub mod data_router;
pub mod executor;
pub mod flight;
pub mod resolver;
pub mod router;
pub mod weather;

use serde::Serialize;

/// What an aggregator hands back: the merged record plus provenance about
/// how it was produced.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult<T> {
    pub data: T,
    pub quality_score: f64,
    pub sources_used: Vec<String>,
    pub from_cache: bool,
    pub processing_time_ms: u64,
    /// Count of field-level conflicts the resolver recorded.
    pub conflict_count: usize,
}
