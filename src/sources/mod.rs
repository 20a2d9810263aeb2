//! Provider adapters.
//!
//! Each adapter is a pure translation layer over one external provider: it
//! builds the HTTP request, parses the response into the canonical model and
//! records a source contribution. Adapters never retry, cache or merge;
//! that discipline lives in the aggregator.

pub mod aviationstack;
pub mod flightaware;
pub mod opensky;
pub mod openweather;
pub mod weatherapi;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::{CoreError, CoreResult};
use crate::model::{CanonicalFlight, CanonicalWeather, ForecastPeriod};

/// Query for one flight on one departure date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlightQuery {
    pub flight_number: String,
    pub date: NaiveDate,
}

impl FlightQuery {
    pub fn new(flight_number: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            flight_number: flight_number.into(),
            date,
        }
    }

    pub fn cache_key(&self) -> String {
        format!("flight:{}:{}", self.flight_number, self.date.format("%Y-%m-%d"))
    }
}

/// Query for weather at one airport for one date and forecast period.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherQuery {
    pub airport: String,
    pub date: NaiveDate,
    pub period: ForecastPeriod,
}

impl WeatherQuery {
    pub fn current(airport: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            airport: airport.into(),
            date,
            period: ForecastPeriod::Current,
        }
    }

    pub fn cache_key(&self) -> String {
        format!(
            "wx:{}:{}:{}",
            self.airport,
            self.date.format("%Y-%m-%d"),
            self.period
        )
    }
}

/// Capabilities shared by every provider adapter.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Static routing priority; higher goes first.
    fn priority(&self) -> u8;

    /// Static reliability in [0, 1], used as contribution confidence.
    fn reliability(&self) -> f64;

    /// Lightweight health probe, distinct from the main data call.
    async fn is_available(&self) -> bool;
}

#[async_trait]
pub trait FlightSource: SourceAdapter {
    /// `Ok(None)` means the provider has no data for the query; errors are
    /// reserved for transport, auth and rate-limit failures.
    async fn fetch_flight(&self, query: &FlightQuery) -> CoreResult<Option<CanonicalFlight>>;
}

#[async_trait]
pub trait WeatherSource: SourceAdapter {
    async fn fetch_weather(&self, query: &WeatherQuery) -> CoreResult<Option<CanonicalWeather>>;
}

/// Sliding one-minute request window, per adapter instance.
#[derive(Debug)]
pub(crate) struct RateWindow {
    limit: u32,
    state: Mutex<(u32, Option<Instant>)>,
}

impl RateWindow {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new((0, None)),
        }
    }

    /// Registers one request. Returns an error when the window is full.
    pub fn check(&self, source: &str) -> CoreResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CoreError::Storage("rate window mutex poisoned".into()))?;
        match state.1 {
            Some(started) if started.elapsed().as_secs() < 60 => {
                if state.0 >= self.limit {
                    return Err(CoreError::RateLimited {
                        provider: source.to_string(),
                    });
                }
                state.0 += 1;
            }
            _ => {
                *state = (1, Some(Instant::now()));
            }
        }
        Ok(())
    }
}

/// Parses an RFC 3339 / ISO-8601 timestamp out of a JSON string value,
/// normalised to UTC.
pub(crate) fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Minutes between a scheduled and an observed timestamp, when both exist.
pub(crate) fn delay_minutes(
    scheduled: Option<DateTime<Utc>>,
    observed: Option<DateTime<Utc>>,
) -> Option<i64> {
    match (scheduled, observed) {
        (Some(s), Some(o)) => Some(o.signed_duration_since(s).num_minutes()),
        _ => None,
    }
}

/// Coordinates for the airports the weather adapters can serve. Providers
/// key on coordinates, the core keys on IATA; this table is the bridge.
pub(crate) fn airport_coords(iata: &str) -> Option<(f64, f64)> {
    let coords = match iata {
        "LHR" => (51.4700, -0.4543),
        "LGW" => (51.1537, -0.1821),
        "CDG" => (49.0097, 2.5479),
        "AMS" => (52.3105, 4.7683),
        "FRA" => (50.0379, 8.5622),
        "MUC" => (48.3538, 11.7861),
        "RIX" => (56.9236, 23.9711),
        "TLL" => (59.4133, 24.8328),
        "VNO" => (54.6341, 25.2858),
        "HEL" => (60.3172, 24.9633),
        "ARN" => (59.6498, 17.9238),
        "CPH" => (55.6180, 12.6508),
        "JFK" => (40.6413, -73.7781),
        "EWR" => (40.6895, -74.1745),
        "BOS" => (42.3656, -71.0096),
        "ORD" => (41.9742, -87.9073),
        "SFO" => (37.6213, -122.3790),
        "LAX" => (33.9416, -118.4085),
        "SEA" => (47.4502, -122.3088),
        "DXB" => (25.2532, 55.3657),
        "SIN" => (1.3644, 103.9915),
        "NRT" => (35.7720, 140.3929),
        _ => return None,
    };
    Some(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_keys_follow_the_documented_shape() {
        let fq = FlightQuery::new("BT318", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert_eq!(fq.cache_key(), "flight:BT318:2025-07-01");

        let wq = WeatherQuery::current("LHR", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert_eq!(wq.cache_key(), "wx:LHR:2025-07-01:current");
    }

    #[test]
    fn datetime_parsing_normalises_to_utc() {
        let parsed = parse_datetime(&json!("2025-07-01T12:00:00+02:00")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-07-01T10:00:00+00:00");
        assert!(parse_datetime(&json!(null)).is_none());
        assert!(parse_datetime(&json!("not-a-date")).is_none());
    }

    #[test]
    fn rate_window_blocks_after_the_limit() {
        let window = RateWindow::new(2);
        assert!(window.check("x").is_ok());
        assert!(window.check("x").is_ok());
        let err = window.check("x").unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");
    }

    #[test]
    fn unknown_airports_have_no_coordinates() {
        assert!(airport_coords("LHR").is_some());
        assert!(airport_coords("ZZZ").is_none());
    }
}
