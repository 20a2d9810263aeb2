//! Shared test fixtures: mock providers, an in-memory chain transport and a
//! fully wired pipeline.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::aggregator::cache::Cache;
use crate::aggregator::data_router::DataRouter;
use crate::aggregator::executor::{RetryExecutor, RetryPolicy};
use crate::aggregator::flight::FlightAggregator;
use crate::aggregator::router::SourceRouter;
use crate::aggregator::weather::WeatherAggregator;
use crate::chain::client::{ChainClient, ChainTransport, SignerKey};
use crate::chain::escrow::EscrowAdapter;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{
    AirportRef, CanonicalFlight, CanonicalWeather, FlightStatus, SourceContribution,
};
use crate::monitor::lifecycle::PolicyMonitor;
use crate::quote::engine::QuoteEngine;
use crate::sources::{FlightQuery, FlightSource, SourceAdapter, WeatherQuery, WeatherSource};
use crate::store::memory::MemoryStore;

/// A canonical flight the way a provider adapter would emit it.
pub fn flight_record(
    source: &str,
    confidence: f64,
    status: FlightStatus,
    arrival_delay: Option<i64>,
    contributed_at_minute: u32,
) -> CanonicalFlight {
    let departure = Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap();
    let mut flight = CanonicalFlight::new(
        "BT318",
        departure,
        AirportRef {
            iata: "RIX".into(),
            icao: Some("EVRA".into()),
        },
        AirportRef {
            iata: "LHR".into(),
            icao: Some("EGLL".into()),
        },
    );
    flight.status = status;
    flight.scheduled_arrival = Some(departure + chrono::Duration::hours(2));
    flight.arrival_delay_minutes = arrival_delay;
    if status == FlightStatus::Landed {
        flight.actual_departure = Some(departure);
        flight.actual_arrival = Some(
            flight.scheduled_arrival.unwrap()
                + chrono::Duration::minutes(arrival_delay.unwrap_or(0)),
        );
    }
    flight.contributions.push(SourceContribution {
        source_name: source.to_string(),
        fields: vec!["status".into(), "scheduled_departure".into()],
        timestamp: Utc
            .with_ymd_and_hms(2025, 7, 1, 12, contributed_at_minute, 0)
            .unwrap(),
        confidence,
        source_id: None,
        api_version: None,
    });
    flight.data_quality_score = flight.completeness_score();
    flight
}

pub struct MockFlightSource {
    name: String,
    priority: u8,
    reliability: f64,
    pub available: AtomicBool,
    record: Mutex<Option<CanonicalFlight>>,
    pub calls: AtomicU32,
}

impl MockFlightSource {
    pub fn new(
        name: &str,
        priority: u8,
        reliability: f64,
        record: Option<CanonicalFlight>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            priority,
            reliability,
            available: AtomicBool::new(true),
            record: Mutex::new(record),
            calls: AtomicU32::new(0),
        })
    }

    pub fn set_record(&self, record: Option<CanonicalFlight>) {
        *self.record.lock().unwrap() = record;
    }
}

#[async_trait]
impl SourceAdapter for MockFlightSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn priority(&self) -> u8 {
        self.priority
    }
    fn reliability(&self) -> f64 {
        self.reliability
    }
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlightSource for MockFlightSource {
    async fn fetch_flight(&self, _query: &FlightQuery) -> CoreResult<Option<CanonicalFlight>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.record.lock().unwrap().clone())
    }
}

pub struct MockWeatherSource {
    name: String,
    record: Mutex<Option<CanonicalWeather>>,
}

impl MockWeatherSource {
    pub fn new(name: &str, record: Option<CanonicalWeather>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            record: Mutex::new(record),
        })
    }
}

#[async_trait]
impl SourceAdapter for MockWeatherSource {
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
impl WeatherSource for MockWeatherSource {
    async fn fetch_weather(&self, _query: &WeatherQuery) -> CoreResult<Option<CanonicalWeather>> {
        Ok(self.record.lock().unwrap().clone())
    }
}

/// An in-memory chain. Deliberately never returns a top-level hash so every
/// test exercises hash synthesis, and answers 404 for hash lookups the way
/// the real node does for hashes it never issued.
#[derive(Default)]
pub struct MockChainTransport {
    pub ledger: Mutex<Vec<Value>>,
    nonces: Mutex<std::collections::HashMap<String, u64>>,
    block: AtomicU64,
    pub fail_posts: AtomicBool,
}

impl MockChainTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ChainTransport for Arc<MockChainTransport> {
    async fn get(&self, path: &str) -> CoreResult<Option<Value>> {
        if let Some(address) = path.strip_prefix("/api/v1/accounts/") {
            let nonces = self.nonces.lock().unwrap();
            let nonce = nonces.get(address).copied().unwrap_or(0);
            return Ok(Some(json!({
                "account": {"balance": 10_000_000u64, "nonce": nonce}
            })));
        }
        if path.starts_with("/api/v1/transactions/hash/") {
            return Ok(None);
        }
        if let Some(address) = path.strip_prefix("/api/v1/transactions/signer/") {
            let ledger = self.ledger.lock().unwrap();
            let txs: Vec<Value> = ledger
                .iter()
                .filter(|tx| tx["sender"].as_str() == Some(address))
                .cloned()
                .collect();
            return Ok(Some(json!({ "transactions": txs })));
        }
        Ok(None)
    }

    async fn post(&self, path: &str, body: &Value) -> CoreResult<Value> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(CoreError::ChainSubmission {
                message: "mock chain down".into(),
                transient: true,
            });
        }
        let block = self.block.fetch_add(1, Ordering::SeqCst) + 1;
        let tx = if path == "/api/v1/faucet" {
            json!({
                "signature": hex::encode([7u8; 64]),
                "nonce": 1,
                "timestamp": Utc::now().timestamp_millis(),
                "sender": body["address"],
                "params": {
                    "params_class_name": "FaucetParams",
                    "amount": body["amount"],
                },
                "block_number": block,
                "status": "confirmed",
            })
        } else {
            let sender = format!("0x{}", body["public_key"].as_str().unwrap_or(""));
            {
                let mut nonces = self.nonces.lock().unwrap();
                *nonces.entry(sender.clone()).or_insert(0) = body["nonce"].as_u64().unwrap_or(0);
            }
            json!({
                "signature": body["signature"],
                "nonce": body["nonce"],
                "timestamp": body["timestamp"],
                "sender": sender,
                "params": body["params"],
                "block_number": block,
                "status": "confirmed",
            })
        };
        self.ledger.lock().unwrap().push(tx.clone());
        Ok(json!({ "transaction": tx }))
    }
}

/// The full pipeline over mock providers and a mock chain.
pub struct Stack {
    pub flights: Arc<FlightAggregator>,
    pub engine: QuoteEngine,
    pub monitor: Arc<PolicyMonitor>,
    pub escrow: Arc<EscrowAdapter>,
    pub store: Arc<MemoryStore>,
    pub chain: Arc<MockChainTransport>,
}

pub async fn build_stack(
    flight_sources: Vec<Arc<MockFlightSource>>,
    weather_sources: Vec<Arc<MockWeatherSource>>,
) -> Stack {
    let cfg = CoreConfig::default();
    let retry = RetryExecutor::new(RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        backoff_factor: 2,
    });

    let dyn_flights: Vec<Arc<dyn FlightSource>> = flight_sources
        .into_iter()
        .map(|s| s as Arc<dyn FlightSource>)
        .collect();
    let dyn_weather: Vec<Arc<dyn WeatherSource>> = weather_sources
        .into_iter()
        .map(|s| s as Arc<dyn WeatherSource>)
        .collect();

    let flights = Arc::new(FlightAggregator::new(
        Arc::new(SourceRouter::new(dyn_flights, cfg.health_ttl)),
        Arc::new(Cache::new()),
        retry.clone(),
        cfg.flight_cache_ttl,
    ));
    let weather = Arc::new(WeatherAggregator::new(
        Arc::new(SourceRouter::new(dyn_weather, cfg.health_ttl)),
        Arc::new(Cache::new()),
        retry.clone(),
        cfg.weather_cache_ttl,
    ));
    let data_router = Arc::new(DataRouter::new(flights.clone(), weather.clone()));

    let store = Arc::new(MemoryStore::new());
    let chain = MockChainTransport::new();
    let client = Arc::new(ChainClient::new(Box::new(chain.clone()), cfg.unit_scale));
    client.set_signer_key(SignerKey::generate()).await;
    let escrow = Arc::new(EscrowAdapter::new(
        client,
        store.clone(),
        cfg.hash_synthesis_enabled,
        cfg.unit_scale,
    ));

    let engine = QuoteEngine::new(data_router, store.clone(), cfg.clone());
    let monitor = Arc::new(PolicyMonitor::new(
        store.clone(),
        flights.clone(),
        escrow.clone(),
        retry,
        cfg,
    ));

    Stack {
        flights,
        engine,
        monitor,
        escrow,
        store,
        chain,
    }
}
