//! FlightAware AeroAPI flight source. Second-priority provider.
//!
//! Authentication is an `x-apikey` header.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{
    delay_minutes, parse_datetime, FlightQuery, FlightSource, RateWindow, SourceAdapter,
};
use crate::error::{CoreError, CoreResult};
use crate::model::{AirportRef, CanonicalFlight, FlightStatus, SourceContribution};

pub const SOURCE_NAME: &str = "flightaware";
pub const PRIORITY: u8 = 85;
pub const RELIABILITY: f64 = 0.88;

const DEFAULT_BASE_URL: &str = "https://aeroapi.flightaware.com/aeroapi";
const API_VERSION: &str = "aeroapi4";

pub struct FlightAwareSource {
    api_key: String,
    base_url: String,
    client: Client,
    rate: RateWindow,
}

impl FlightAwareSource {
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
            rate: RateWindow::new(60),
        })
    }

    fn map_status(entry: &Value) -> FlightStatus {
        if entry["cancelled"].as_bool() == Some(true) {
            return FlightStatus::Cancelled;
        }
        if entry["diverted"].as_bool() == Some(true) {
            return FlightStatus::Diverted;
        }
        match entry["status"].as_str().unwrap_or("") {
            s if s.starts_with("Scheduled") => FlightStatus::Scheduled,
            s if s.starts_with("Delayed") => FlightStatus::Delayed,
            s if s.starts_with("En Route") || s.starts_with("Taxiing") => FlightStatus::Active,
            s if s.starts_with("Departed") => FlightStatus::Departed,
            s if s.starts_with("Arrived") || s.starts_with("Landed") => FlightStatus::Landed,
            s if s.starts_with("Cancelled") => FlightStatus::Cancelled,
            s if s.starts_with("Diverted") => FlightStatus::Diverted,
            _ => FlightStatus::Unknown,
        }
    }

    /// Translates one entry of the provider's `flights` array. Delay fields
    /// arrive in seconds and are normalised to minutes.
    fn parse_flight(&self, entry: &Value, query: &FlightQuery) -> Option<CanonicalFlight> {
        let scheduled_departure = parse_datetime(&entry["scheduled_out"])?;
        let origin_iata = entry["origin"]["code_iata"].as_str()?.to_string();
        let destination_iata = entry["destination"]["code_iata"].as_str()?.to_string();

        let mut flight = CanonicalFlight::new(
            query.flight_number.clone(),
            scheduled_departure,
            AirportRef {
                iata: origin_iata,
                icao: entry["origin"]["code_icao"].as_str().map(str::to_string),
            },
            AirportRef {
                iata: destination_iata,
                icao: entry["destination"]["code_icao"]
                    .as_str()
                    .map(str::to_string),
            },
        );
        let mut fields = vec![
            "flight_number".to_string(),
            "scheduled_departure".to_string(),
            "origin".to_string(),
            "destination".to_string(),
        ];

        flight.estimated_departure = parse_datetime(&entry["estimated_out"]);
        flight.actual_departure = parse_datetime(&entry["actual_out"]);
        flight.scheduled_arrival = parse_datetime(&entry["scheduled_in"]);
        flight.estimated_arrival = parse_datetime(&entry["estimated_in"]);
        flight.actual_arrival = parse_datetime(&entry["actual_in"]);
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

        flight.departure_delay_minutes = entry["departure_delay"]
            .as_i64()
            .map(|secs| secs / 60)
            .or_else(|| {
                delay_minutes(
                    Some(scheduled_departure),
                    flight.actual_departure.or(flight.estimated_departure),
                )
            });
        flight.arrival_delay_minutes = entry["arrival_delay"]
            .as_i64()
            .map(|secs| secs / 60)
            .or_else(|| {
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

        flight.airline_iata = entry["operator_iata"].as_str().map(str::to_string);
        flight.airline_icao = entry["operator_icao"].as_str().map(str::to_string);
        if flight.airline_iata.is_some() || flight.airline_icao.is_some() {
            fields.push("airline".into());
        }
        flight.gate = entry["gate_origin"].as_str().map(str::to_string);
        flight.terminal = entry["terminal_origin"].as_str().map(str::to_string);
        flight.aircraft_type = entry["aircraft_type"].as_str().map(str::to_string);

        flight.status = Self::map_status(entry);
        fields.push("status".into());
        flight.cancelled = Some(flight.status == FlightStatus::Cancelled);
        if flight.status == FlightStatus::Diverted {
            flight.diverted_to = entry["diverted_to"].as_str().map(str::to_string);
        }

        flight.contributions.push(SourceContribution {
            source_name: SOURCE_NAME.to_string(),
            fields,
            timestamp: Utc::now(),
            confidence: RELIABILITY,
            source_id: entry["fa_flight_id"].as_str().map(str::to_string),
            api_version: Some(API_VERSION.to_string()),
        });
        flight.data_quality_score = flight.completeness_score();
        Some(flight)
    }
}

#[async_trait]
impl SourceAdapter for FlightAwareSource {
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
        // The airports endpoint is the cheapest authenticated call.
        let url = format!("{}/airports/EGLL", self.base_url);
        match self
            .client
            .get(&url)
            .header("x-apikey", &self.api_key)
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
impl FlightSource for FlightAwareSource {
    async fn fetch_flight(&self, query: &FlightQuery) -> CoreResult<Option<CanonicalFlight>> {
        self.rate.check(SOURCE_NAME)?;

        let start = query.date.and_hms_opt(0, 0, 0).expect("midnight is valid");
        let end = start + ChronoDuration::days(1);
        let url = format!("{}/flights/{}", self.base_url, query.flight_number);
        let response = self
            .client
            .get(&url)
            .header("x-apikey", &self.api_key)
            .query(&[
                ("start", start.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                ("end", end.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ])
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
        let entry = match body["flights"].as_array().and_then(|f| f.first()) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        Ok(self.parse_flight(&entry, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn source() -> FlightAwareSource {
        FlightAwareSource::new("test-key".into()).unwrap()
    }

    fn query() -> FlightQuery {
        FlightQuery::new("BT318", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())
    }

    fn sample_entry() -> Value {
        json!({
            "fa_flight_id": "BT318-1751318400-airline-0500",
            "status": "En Route",
            "cancelled": false,
            "diverted": false,
            "origin": {"code_iata": "RIX", "code_icao": "EVRA"},
            "destination": {"code_iata": "LHR", "code_icao": "EGLL"},
            "scheduled_out": "2025-07-01T10:00:00Z",
            "estimated_out": "2025-07-01T10:05:00Z",
            "actual_out": "2025-07-01T10:07:00Z",
            "scheduled_in": "2025-07-01T11:45:00Z",
            "estimated_in": "2025-07-01T11:52:00Z",
            "actual_in": null,
            "departure_delay": 420,
            "arrival_delay": 420,
            "operator_iata": "BT",
            "operator_icao": "BTI",
            "gate_origin": "B4",
            "terminal_origin": "1",
            "aircraft_type": "BCS3"
        })
    }

    #[test]
    fn parses_an_en_route_flight() {
        let flight = source().parse_flight(&sample_entry(), &query()).unwrap();
        assert_eq!(flight.status, FlightStatus::Active);
        assert_eq!(flight.departure_delay_minutes, Some(7));
        assert_eq!(flight.arrival_delay_minutes, Some(7));
        assert!(flight.actual_departure.is_some());
        assert!(flight.actual_arrival.is_none());
        assert_eq!(flight.contributions[0].confidence, RELIABILITY);
    }

    #[test]
    fn cancelled_flag_wins_over_status_text() {
        let mut entry = sample_entry();
        entry["cancelled"] = json!(true);
        entry["status"] = json!("Scheduled");
        let flight = source().parse_flight(&entry, &query()).unwrap();
        assert_eq!(flight.status, FlightStatus::Cancelled);
    }

    #[test]
    fn diversion_captures_the_new_destination() {
        let mut entry = sample_entry();
        entry["diverted"] = json!(true);
        entry["diverted_to"] = json!("LGW");
        let flight = source().parse_flight(&entry, &query()).unwrap();
        assert_eq!(flight.status, FlightStatus::Diverted);
        assert_eq!(flight.diverted_to.as_deref(), Some("LGW"));
    }

    #[test]
    fn arrived_maps_to_landed() {
        let mut entry = sample_entry();
        entry["status"] = json!("Arrived / Gate Arrival");
        entry["actual_in"] = json!("2025-07-01T11:52:00Z");
        let flight = source().parse_flight(&entry, &query()).unwrap();
        assert_eq!(flight.status, FlightStatus::Landed);
        assert!(flight.actual_arrival.is_some());
    }
}
