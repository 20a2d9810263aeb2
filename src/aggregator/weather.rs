//! Weather aggregation. Structurally the flight aggregator with a longer
//! default TTL and the weather resolver behind it.

use futures::future::join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use super::cache::Cache;
use super::executor::RetryExecutor;
use super::resolver::resolve_weather;
use super::router::SourceRouter;
use super::AggregationResult;
use crate::error::{CoreError, CoreResult};
use crate::model::CanonicalWeather;
use crate::sources::{SourceAdapter, WeatherQuery, WeatherSource};

#[derive(Debug, Clone)]
struct BuildOutcome {
    merged: CanonicalWeather,
    quality_score: f64,
    sources_used: Vec<String>,
    conflict_count: usize,
}

type BuildCell = Arc<OnceCell<BuildOutcome>>;

pub struct WeatherAggregator {
    router: Arc<SourceRouter<dyn WeatherSource>>,
    cache: Arc<Cache<CanonicalWeather>>,
    executor: RetryExecutor,
    cache_ttl: Duration,
    inflight: Mutex<HashMap<String, BuildCell>>,
}

impl WeatherAggregator {
    pub fn new(
        router: Arc<SourceRouter<dyn WeatherSource>>,
        cache: Arc<Cache<CanonicalWeather>>,
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

    pub fn cache(&self) -> &Cache<CanonicalWeather> {
        &self.cache
    }

    pub async fn get_weather(
        &self,
        query: &WeatherQuery,
        cancel: &CancellationToken,
    ) -> CoreResult<AggregationResult<CanonicalWeather>> {
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
        query: &WeatherQuery,
        key: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<BuildOutcome> {
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
                        async move { adapter.fetch_weather(&query).await }
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
                    info!("weather source '{}' has no data for {}", name, key);
                }
                Err(CoreError::Cancelled) => cancelled = true,
                Err(err) => {
                    warn!("weather source '{}' exhausted retries: {}", name, err);
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

        let resolution = resolve_weather(records)?;
        let tags = vec!["wx".to_string(), format!("wx:{}", query.airport)];
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
    use crate::model::{ForecastPeriod, SourceContribution, WeatherConditionType};
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubWeather {
        name: String,
        record: Option<CanonicalWeather>,
        calls: AtomicU32,
    }

    impl StubWeather {
        fn returning(name: &str, record: Option<CanonicalWeather>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                record,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for StubWeather {
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> u8 {
            90
        }
        fn reliability(&self) -> f64 {
            0.9
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl WeatherSource for StubWeather {
        async fn fetch_weather(
            &self,
            _query: &WeatherQuery,
        ) -> CoreResult<Option<CanonicalWeather>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.record.clone())
        }
    }

    fn record(source: &str) -> CanonicalWeather {
        let mut wx = CanonicalWeather::new("LHR", Utc::now(), ForecastPeriod::Current);
        wx.condition_type = WeatherConditionType::Rain;
        wx.temperature_c = Some(14.0);
        wx.contributions.push(SourceContribution {
            source_name: source.to_string(),
            fields: vec!["condition".into()],
            timestamp: Utc::now(),
            confidence: 0.9,
            source_id: None,
            api_version: None,
        });
        wx
    }

    fn aggregator(sources: Vec<Arc<StubWeather>>) -> WeatherAggregator {
        let dyn_sources: Vec<Arc<dyn WeatherSource>> = sources
            .into_iter()
            .map(|s| s as Arc<dyn WeatherSource>)
            .collect();
        WeatherAggregator::new(
            Arc::new(SourceRouter::new(dyn_sources, Duration::from_secs(300))),
            Arc::new(Cache::new()),
            RetryExecutor::new(RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                backoff_factor: 2,
            }),
            Duration::from_secs(3600),
        )
    }

    fn query() -> WeatherQuery {
        WeatherQuery::current("LHR", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())
    }

    #[tokio::test]
    async fn aggregates_and_caches() {
        let source = StubWeather::returning("wx-a", Some(record("wx-a")));
        let agg = aggregator(vec![source.clone()]);
        let first = agg.get_weather(&query(), &CancellationToken::new()).await.unwrap();
        let second = agg.get_weather(&query(), &CancellationToken::new()).await.unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.data.condition_type, WeatherConditionType::Rain);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_answers_are_no_data() {
        let agg = aggregator(vec![StubWeather::returning("wx-a", None)]);
        let err = agg
            .get_weather(&query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_DATA_AVAILABLE");
    }
}
