//! Flight aggregation: cache check, single-flight build coalescing,
//! health-routed parallel fan-out, retry, merge, cache store.

use futures::future::join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use super::cache::Cache;
use super::executor::RetryExecutor;
use super::resolver::resolve_flights;
use super::router::SourceRouter;
use super::AggregationResult;
use crate::error::{CoreError, CoreResult};
use crate::model::CanonicalFlight;
use crate::sources::{FlightQuery, FlightSource, SourceAdapter};

/// What one build run produced; shared by every caller coalesced onto it.
#[derive(Debug, Clone)]
struct BuildOutcome {
    merged: CanonicalFlight,
    quality_score: f64,
    sources_used: Vec<String>,
    conflict_count: usize,
}

type BuildCell = Arc<OnceCell<BuildOutcome>>;

pub struct FlightAggregator {
    router: Arc<SourceRouter<dyn FlightSource>>,
    cache: Arc<Cache<CanonicalFlight>>,
    executor: RetryExecutor,
    cache_ttl: Duration,
    inflight: Mutex<HashMap<String, BuildCell>>,
}

impl FlightAggregator {
    pub fn new(
        router: Arc<SourceRouter<dyn FlightSource>>,
        cache: Arc<Cache<CanonicalFlight>>,
        executor: RetryExecutor,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            router,
            cache,
            executor,
            cache_ttl,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Cache<CanonicalFlight> {
        &self.cache
    }

    /// Produces one canonical record for the query.
    ///
    /// Concurrent misses for the same key coalesce onto a single build;
    /// the initiating caller's cancellation aborts every outstanding
    /// adapter call of that build.
    pub async fn get_flight_status(
        &self,
        query: &FlightQuery,
        cancel: &CancellationToken,
    ) -> CoreResult<AggregationResult<CanonicalFlight>> {
        let started = Instant::now();
        let key = query.cache_key();

        if let Some(hit) = self.cache.get(&key) {
            return Ok(AggregationResult {
                quality_score: hit.data_quality_score,
                sources_used: hit
                    .contributions
                    .iter()
                    .map(|c| c.source_name.clone())
                    .collect(),
                data: hit,
                from_cache: true,
                processing_time_ms: started.elapsed().as_millis() as u64,
                conflict_count: 0,
            });
        }

        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let outcome = cell
            .get_or_try_init(|| self.build(query, &key, cancel))
            .await
            .cloned();

        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&key);
        }

        let outcome = outcome?;
        Ok(AggregationResult {
            data: outcome.merged,
            quality_score: outcome.quality_score,
            sources_used: outcome.sources_used,
            from_cache: false,
            processing_time_ms: started.elapsed().as_millis() as u64,
            conflict_count: outcome.conflict_count,
        })
    }

    async fn build(
        &self,
        query: &FlightQuery,
        key: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<BuildOutcome> {
        // A caller that lost the race between the cache miss and joining the
        // in-flight map lands here after the previous build completed; the
        // cache already has its answer.
        if let Some(hit) = self.cache.get(key) {
            return Ok(BuildOutcome {
                quality_score: hit.data_quality_score,
                sources_used: hit
                    .contributions
                    .iter()
                    .map(|c| c.source_name.clone())
                    .collect(),
                conflict_count: 0,
                merged: hit,
            });
        }

        let adapters = self.router.usable_sources().await;
        if adapters.is_empty() {
            return Err(CoreError::NoDataAvailable {
                query: key.to_string(),
            });
        }

        let fetches = adapters.iter().map(|adapter| {
            let adapter = adapter.clone();
            let query = query.clone();
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            async move {
                let name = adapter.name().to_string();
                let result = executor
                    .run(&name, &cancel, |_| {
                        let adapter = adapter.clone();
                        let query = query.clone();
                        async move { adapter.fetch_flight(&query).await }
                    })
                    .await;
                (name, result)
            }
        });

        let mut records = Vec::new();
        let mut sources_used = Vec::new();
        let mut cancelled = false;
        for (name, result) in join_all(fetches).await {
            match result {
                Ok(Some(record)) => {
                    sources_used.push(name);
                    records.push(record);
                }
                Ok(None) => {
                    info!("source '{}' has no data for {}", name, key);
                }
                Err(CoreError::Cancelled) => cancelled = true,
                Err(err) => {
                    warn!("source '{}' exhausted retries: {}", name, err);
                    self.router.mark_unhealthy(&name);
                }
            }
        }
        if cancelled && records.is_empty() {
            return Err(CoreError::Cancelled);
        }
        if records.is_empty() {
            return Err(CoreError::NoDataAvailable {
                query: key.to_string(),
            });
        }

        let resolution = resolve_flights(records)?;
        if let Err(err) = resolution.merged.validate() {
            // Cross-source merges can assemble combinations no single
            // provider would emit; surface them rather than dropping data.
            warn!("merged record for {} violates an invariant: {}", key, err);
        }
        let tags = vec![
            "flight".to_string(),
            format!("flight:{}", query.flight_number),
        ];
        self.cache
            .put(key, resolution.merged.clone(), self.cache_ttl, &tags);

        Ok(BuildOutcome {
            sources_used,
            quality_score: resolution.quality_score,
            conflict_count: resolution.conflicts.len(),
            merged: resolution.merged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::executor::RetryPolicy;
    use crate::model::{AirportRef, FlightStatus, SourceContribution};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct StubSource {
        name: String,
        priority: u8,
        available: AtomicBool,
        record: Option<CanonicalFlight>,
        calls: AtomicU32,
        fail: AtomicBool,
    }

    impl StubSource {
        fn returning(name: &str, priority: u8, record: Option<CanonicalFlight>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                priority,
                available: AtomicBool::new(true),
                record,
                calls: AtomicU32::new(0),
                fail: AtomicBool::new(false),
            })
        }

        fn failing(name: &str, priority: u8) -> Arc<Self> {
            let stub = Self::returning(name, priority, None);
            stub.fail.store(true, Ordering::SeqCst);
            stub
        }
    }

    #[async_trait]
    impl SourceAdapter for StubSource {
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> u8 {
            self.priority
        }
        fn reliability(&self) -> f64 {
            0.9
        }
        async fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FlightSource for StubSource {
        async fn fetch_flight(&self, _query: &FlightQuery) -> CoreResult<Option<CanonicalFlight>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::transport(self.name.clone(), "down"));
            }
            Ok(self.record.clone())
        }
    }

    fn record(source: &str, confidence: f64) -> CanonicalFlight {
        let mut flight = CanonicalFlight::new(
            "BT318",
            Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap(),
            AirportRef::iata("RIX"),
            AirportRef::iata("LHR"),
        );
        flight.status = FlightStatus::Scheduled;
        flight.contributions.push(SourceContribution {
            source_name: source.to_string(),
            fields: vec!["status".into()],
            timestamp: Utc::now(),
            confidence,
            source_id: None,
            api_version: None,
        });
        flight
    }

    fn aggregator(sources: Vec<Arc<StubSource>>) -> FlightAggregator {
        let dyn_sources: Vec<Arc<dyn FlightSource>> = sources
            .into_iter()
            .map(|s| s as Arc<dyn FlightSource>)
            .collect();
        FlightAggregator::new(
            Arc::new(SourceRouter::new(dyn_sources, Duration::from_secs(300))),
            Arc::new(Cache::new()),
            RetryExecutor::new(RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                backoff_factor: 2,
            }),
            Duration::from_secs(300),
        )
    }

    fn query() -> FlightQuery {
        FlightQuery::new("BT318", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())
    }

    #[tokio::test]
    async fn merges_across_sources() {
        let agg = aggregator(vec![
            StubSource::returning("a", 95, Some(record("a", 0.92))),
            StubSource::returning("b", 85, Some(record("b", 0.88))),
        ]);
        let result = agg
            .get_flight_status(&query(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.from_cache);
        assert_eq!(result.sources_used.len(), 2);
        assert!(result.quality_score > 0.7);
    }

    #[tokio::test]
    async fn second_call_hits_the_cache() {
        let source = StubSource::returning("a", 95, Some(record("a", 0.92)));
        let agg = aggregator(vec![source.clone()]);
        let first = agg
            .get_flight_status(&query(), &CancellationToken::new())
            .await
            .unwrap();
        let second = agg
            .get_flight_status(&query(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.data.status, second.data.status);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_sources_is_no_data_available() {
        let down = StubSource::returning("a", 95, Some(record("a", 0.92)));
        down.available.store(false, Ordering::SeqCst);
        let agg = aggregator(vec![down]);
        let err = agg
            .get_flight_status(&query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_DATA_AVAILABLE");
    }

    #[tokio::test]
    async fn failing_source_is_marked_unhealthy_but_others_carry_on() {
        let good = StubSource::returning("good", 95, Some(record("good", 0.92)));
        let bad = StubSource::failing("bad", 85);
        let agg = aggregator(vec![good, bad.clone()]);
        let result = agg
            .get_flight_status(&query(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.sources_used, vec!["good".to_string()]);
        // Retried max_attempts times, then demoted.
        assert_eq!(bad.calls.load(Ordering::SeqCst), 2);
        let usable = agg.router.usable_sources().await;
        assert_eq!(usable.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_into_one_build() {
        let source = StubSource::returning("a", 95, Some(record("a", 0.92)));
        let agg = Arc::new(aggregator(vec![source.clone()]));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let agg = agg.clone();
            handles.push(tokio::spawn(async move {
                agg.get_flight_status(&query(), &CancellationToken::new())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.data.flight_number, "BT318");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_sources_empty_is_no_data() {
        let agg = aggregator(vec![StubSource::returning("a", 95, None)]);
        let err = agg
            .get_flight_status(&query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_DATA_AVAILABLE");
    }
}
