//! AviationStack flight source. Primary provider: highest priority.
//!
//! Authentication is an `access_key` query parameter.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{
    delay_minutes, parse_datetime, FlightQuery, FlightSource, RateWindow, SourceAdapter,
};
use crate::error::{CoreError, CoreResult};
use crate::model::{AirportRef, CanonicalFlight, FlightStatus, SourceContribution};

pub const SOURCE_NAME: &str = "aviationstack";
pub const PRIORITY: u8 = 95;
pub const RELIABILITY: f64 = 0.92;

const DEFAULT_BASE_URL: &str = "http://api.aviationstack.com/v1";
const API_VERSION: &str = "v1";

pub struct AviationStackSource {
    api_key: String,
    base_url: String,
    client: Client,
    rate: RateWindow,
}

impl AviationStackSource {
    pub fn new(api_key: String) -> CoreResult<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::transport(SOURCE_NAME, e))?;
        Ok(Self {
            api_key,
            base_url,
            client,
            rate: RateWindow::new(100),
        })
    }

    fn map_status(raw: &str, departure_delay: Option<i64>) -> FlightStatus {
        let status = match raw {
            "scheduled" => FlightStatus::Scheduled,
            "active" => FlightStatus::Active,
            "landed" => FlightStatus::Landed,
            "cancelled" => FlightStatus::Cancelled,
            "diverted" => FlightStatus::Diverted,
            "incident" => FlightStatus::Unknown,
            _ => FlightStatus::Unknown,
        };
        // The provider keeps reporting "scheduled" for flights it already
        // knows are late; surface that as DELAYED.
        if status == FlightStatus::Scheduled && departure_delay.unwrap_or(0) >= 15 {
            FlightStatus::Delayed
        } else {
            status
        }
    }

    /// Translates one entry of the provider's `data` array.
    fn parse_flight(&self, entry: &Value, query: &FlightQuery) -> Option<CanonicalFlight> {
        let departure = &entry["departure"];
        let arrival = &entry["arrival"];

        let scheduled_departure = parse_datetime(&departure["scheduled"])?;
        let origin_iata = departure["iata"].as_str()?.to_string();
        let destination_iata = arrival["iata"].as_str()?.to_string();

        let mut flight = CanonicalFlight::new(
            query.flight_number.clone(),
            scheduled_departure,
            AirportRef {
                iata: origin_iata,
                icao: departure["icao"].as_str().map(str::to_string),
            },
            AirportRef {
                iata: destination_iata,
                icao: arrival["icao"].as_str().map(str::to_string),
            },
        );
        let mut fields = vec![
            "flight_number".to_string(),
            "scheduled_departure".to_string(),
            "origin".to_string(),
            "destination".to_string(),
        ];

        flight.estimated_departure = parse_datetime(&departure["estimated"]);
        flight.actual_departure = parse_datetime(&departure["actual"]);
        flight.scheduled_arrival = parse_datetime(&arrival["scheduled"]);
        flight.estimated_arrival = parse_datetime(&arrival["estimated"]);
        flight.actual_arrival = parse_datetime(&arrival["actual"]);
        for (name, present) in [
            ("estimated_departure", flight.estimated_departure.is_some()),
            ("actual_departure", flight.actual_departure.is_some()),
            ("scheduled_arrival", flight.scheduled_arrival.is_some()),
            ("estimated_arrival", flight.estimated_arrival.is_some()),
            ("actual_arrival", flight.actual_arrival.is_some()),
        ] {
            if present {
                fields.push(name.to_string());
            }
        }

        flight.departure_delay_minutes = departure["delay"].as_i64().or_else(|| {
            delay_minutes(
                Some(scheduled_departure),
                flight.actual_departure.or(flight.estimated_departure),
            )
        });
        flight.arrival_delay_minutes = arrival["delay"].as_i64().or_else(|| {
            delay_minutes(
                flight.scheduled_arrival,
                flight.actual_arrival.or(flight.estimated_arrival),
            )
        });
        if flight.departure_delay_minutes.is_some() {
            fields.push("departure_delay_minutes".into());
        }
        if flight.arrival_delay_minutes.is_some() {
            fields.push("arrival_delay_minutes".into());
        }

        if let Some(airline) = entry["airline"].as_object() {
            flight.airline_iata = airline.get("iata").and_then(Value::as_str).map(str::to_string);
            flight.airline_icao = airline.get("icao").and_then(Value::as_str).map(str::to_string);
            if flight.airline_iata.is_some() || flight.airline_icao.is_some() {
                fields.push("airline".into());
            }
        }
        flight.gate = departure["gate"].as_str().map(str::to_string);
        flight.terminal = departure["terminal"].as_str().map(str::to_string);
        flight.aircraft_type = entry["aircraft"]["iata"].as_str().map(str::to_string);

        let raw_status = entry["flight_status"].as_str().unwrap_or("unknown");
        flight.status = Self::map_status(raw_status, flight.departure_delay_minutes);
        fields.push("status".into());

        flight.cancelled = Some(flight.status == FlightStatus::Cancelled);
        if flight.status == FlightStatus::Diverted {
            // The provider reports the new destination in the arrival block
            // once a diversion is known.
            flight.diverted_to = arrival["iata"].as_str().map(str::to_string);
        }

        flight.contributions.push(SourceContribution {
            source_name: SOURCE_NAME.to_string(),
            fields,
            timestamp: Utc::now(),
            confidence: RELIABILITY,
            source_id: entry["flight"]["iata"].as_str().map(str::to_string),
            api_version: Some(API_VERSION.to_string()),
        });
        flight.data_quality_score = flight.completeness_score();
        Some(flight)
    }
}

#[async_trait]
impl SourceAdapter for AviationStackSource {
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
        let url = format!("{}/flights", self.base_url);
        let probe = self
            .client
            .get(&url)
            .query(&[("access_key", self.api_key.as_str()), ("limit", "1")])
            .send()
            .await;
        match probe {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("{} health probe failed: {}", SOURCE_NAME, e);
                false
            }
        }
    }
}

#[async_trait]
impl FlightSource for AviationStackSource {
    async fn fetch_flight(&self, query: &FlightQuery) -> CoreResult<Option<CanonicalFlight>> {
        self.rate.check(SOURCE_NAME)?;

        let url = format!("{}/flights", self.base_url);
        let date = query.date.format("%Y-%m-%d").to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("access_key", self.api_key.as_str()),
                ("flight_iata", query.flight_number.as_str()),
                ("flight_date", date.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CoreError::transport(SOURCE_NAME, e))?;

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

        let entry = match body["data"].as_array().and_then(|d| d.first()) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        Ok(self.parse_flight(&entry, query))
    }
}
