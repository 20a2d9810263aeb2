//! OpenSky Network flight source. Lowest-priority provider.
//!
//! Authentication is HTTP basic auth. OpenSky tracks aircraft movements by
//! callsign, so the record it yields is sparse: ICAO airports, first/last
//! seen times, no schedule. It still earns its keep as a tie-breaker when
//! the richer providers disagree about whether a flight actually moved.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{FlightQuery, FlightSource, RateWindow, SourceAdapter};
use crate::error::{CoreError, CoreResult};
use crate::model::{AirportRef, CanonicalFlight, FlightStatus, SourceContribution};

pub const SOURCE_NAME: &str = "opensky";
pub const PRIORITY: u8 = 75;
pub const RELIABILITY: f64 = 0.80;

const DEFAULT_BASE_URL: &str = "https://opensky-network.org/api";
const API_VERSION: &str = "v1";

pub struct OpenSkySource {
    username: String,
    password: String,
    base_url: String,
    client: Client,
    rate: RateWindow,
}

impl OpenSkySource {
    pub fn new(username: String, password: String) -> CoreResult<Self> {
        Self::with_base_url(username, password, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        username: String,
        password: String,
        base_url: String,
    ) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::transport(SOURCE_NAME, e))?;
        Ok(Self {
            username,
            password,
            base_url,
            client,
            rate: RateWindow::new(40),
        })
    }

    /// OpenSky callsigns are space-padded uppercase, e.g. `BTI318 `.
    fn matches_callsign(callsign: &str, flight_number: &str) -> bool {
        let normalized = callsign.trim().to_uppercase();
        let wanted = flight_number.trim().to_uppercase();
        normalized == wanted || normalized.ends_with(wanted.trim_start_matches(char::is_alphabetic))
            && normalized.len() >= wanted.len()
    }

    fn parse_flight(&self, entry: &Value, query: &FlightQuery) -> Option<CanonicalFlight> {
        let first_seen = entry["firstSeen"].as_i64()?;
        let scheduled_departure = Utc.timestamp_opt(first_seen, 0).single()?;

        let origin_icao = entry["estDepartureAirport"].as_str().map(str::to_string);
        let destination_icao = entry["estArrivalAirport"].as_str().map(str::to_string);

        let mut flight = CanonicalFlight::new(
            query.flight_number.clone(),
            scheduled_departure,
            AirportRef {
                // OpenSky only knows ICAO codes; the IATA slot stays empty
                // and the resolver fills it from richer sources.
                iata: String::new(),
                icao: origin_icao,
            },
            AirportRef {
                iata: String::new(),
                icao: destination_icao,
            },
        );
        let mut fields = vec!["flight_number".to_string(), "scheduled_departure".to_string()];
        if flight.origin.icao.is_some() {
            fields.push("origin_icao".into());
        }
        if flight.destination.icao.is_some() {
            fields.push("destination_icao".into());
        }

        flight.actual_departure = Some(scheduled_departure);
        fields.push("actual_departure".into());

        if let Some(last_seen) = entry["lastSeen"].as_i64() {
            let landed_at = Utc.timestamp_opt(last_seen, 0).single()?;
            if landed_at < Utc::now() - chrono::Duration::minutes(10) {
                flight.actual_arrival = Some(landed_at);
                flight.status = FlightStatus::Landed;
                fields.push("actual_arrival".into());
            } else {
                flight.status = FlightStatus::Departed;
            }
            fields.push("status".into());
        } else {
            flight.status = FlightStatus::Departed;
            fields.push("status".into());
        }

        flight.contributions.push(SourceContribution {
            source_name: SOURCE_NAME.to_string(),
            fields,
            timestamp: Utc::now(),
            confidence: RELIABILITY,
            source_id: entry["icao24"].as_str().map(str::to_string),
            api_version: Some(API_VERSION.to_string()),
        });
        flight.data_quality_score = flight.completeness_score();
        Some(flight)
    }
}

#[async_trait]
impl SourceAdapter for OpenSkySource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn priority(&self) -> u8 {
        PRIORITY
    }

    fn reliability(&self) -> f64 {
        RELIABILITY
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/states/all", self.base_url);
        match self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("lamin", "51.0"), ("lamax", "51.1"), ("lomin", "0.0"), ("lomax", "0.1")])
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("{} health probe failed: {}", SOURCE_NAME, e);
                false
            }
        }
    }
}

#[async_trait]
impl FlightSource for OpenSkySource {
    async fn fetch_flight(&self, query: &FlightQuery) -> CoreResult<Option<CanonicalFlight>> {
        self.rate.check(SOURCE_NAME)?;

        let begin = query
            .date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc()
            .timestamp();
        let end = begin + 86_400;
        let url = format!("{}/flights/all", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("begin", begin.to_string()), ("end", end.to_string())])
            .send()
            .await
            .map_err(|e| CoreError::transport(SOURCE_NAME, e))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CoreError::transport(
                SOURCE_NAME,
                format!("HTTP {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::transport(SOURCE_NAME, e))?;
        let entry = body.as_array().and_then(|flights| {
            flights
                .iter()
                .find(|f| {
                    f["callsign"]
                        .as_str()
                        .map(|c| Self::matches_callsign(c, &query.flight_number))
                        .unwrap_or(false)
                })
                .cloned()
        });

        match entry {
            Some(entry) => Ok(self.parse_flight(&entry, query)),
            None => Ok(None),
        }
    }
}
