//! One-shot orchestration of the flight fetch plus per-airport weather
//! fetches for a policy request.

use chrono::NaiveDate;
use futures::future::join_all;
use log::warn;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::flight::FlightAggregator;
use super::weather::WeatherAggregator;
use crate::error::CoreResult;
use crate::model::{AggregationMetadata, PolicyDataBundle, SubQueryMeta};
use crate::sources::{FlightQuery, WeatherQuery};

#[derive(Debug, Clone)]
pub struct PolicyDataRequest {
    pub flight_number: String,
    pub date: NaiveDate,
    pub airports: Vec<String>,
    pub include_weather: bool,
}

pub struct DataRouter {
    flight: Arc<FlightAggregator>,
    weather: Arc<WeatherAggregator>,
}

impl DataRouter {
    pub fn new(flight: Arc<FlightAggregator>, weather: Arc<WeatherAggregator>) -> Self {
        Self { flight, weather }
    }

    /// Gathers everything a quote needs. The flight result is mandatory;
    /// weather sub-queries run in parallel and their failures degrade the
    /// bundle instead of failing it.
    pub async fn get_data_for_policy(
        &self,
        request: &PolicyDataRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<PolicyDataBundle> {
        let started = Instant::now();
        let flight_query = FlightQuery::new(request.flight_number.clone(), request.date);

        let flight_fut = self.flight.get_flight_status(&flight_query, cancel);

        let weather_queries: Vec<WeatherQuery> = if request.include_weather {
            request
                .airports
                .iter()
                .map(|airport| WeatherQuery::current(airport.clone(), request.date))
                .collect()
        } else {
            Vec::new()
        };
        let weather_futs = weather_queries.iter().map(|query| {
            let aggregator = self.weather.clone();
            let cancel = cancel.clone();
            async move {
                let key = query.cache_key();
                (key, aggregator.get_weather(query, &cancel).await)
            }
        });

        let (flight_result, weather_results) = tokio::join!(flight_fut, join_all(weather_futs));
        let flight_result = flight_result?;

        let flight_meta = SubQueryMeta {
            target: flight_query.cache_key(),
            quality_score: flight_result.quality_score,
            sources_used: flight_result.sources_used.clone(),
            from_cache: flight_result.from_cache,
            processing_time_ms: flight_result.processing_time_ms,
            succeeded: true,
            failure: None,
        };

        let mut weather = Vec::new();
        let mut weather_meta = Vec::new();
        for (target, result) in weather_results {
            match result {
                Ok(agg) => {
                    weather_meta.push(SubQueryMeta {
                        target,
                        quality_score: agg.quality_score,
                        sources_used: agg.sources_used.clone(),
                        from_cache: agg.from_cache,
                        processing_time_ms: agg.processing_time_ms,
                        succeeded: true,
                        failure: None,
                    });
                    weather.push(agg.data);
                }
                Err(err) => {
                    warn!("weather sub-query {} failed: {}", target, err);
                    weather_meta.push(SubQueryMeta {
                        target,
                        quality_score: 0.0,
                        sources_used: Vec::new(),
                        from_cache: false,
                        processing_time_ms: 0,
                        succeeded: false,
                        failure: Some(err.code().to_string()),
                    });
                }
            }
        }

        Ok(PolicyDataBundle {
            flight: flight_result.data,
            weather,
            metadata: AggregationMetadata {
                flight: flight_meta,
                weather: weather_meta,
                total_time_ms: started.elapsed().as_millis() as u64,
            },
        })
    }
}
