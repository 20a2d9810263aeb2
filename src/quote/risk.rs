//! Deterministic risk factors. No learned models: every multiplier is an
//! explicit function of the canonical record, so a premium can always be
//! reproduced from its risk snapshot.

use crate::model::{CanonicalFlight, CanonicalWeather, CoverageType, FlightStatus, WeatherConditionType};

/// Combined risk multipliers are clamped into this range.
pub const FACTOR_FLOOR: f64 = 0.8;
pub const FACTOR_CAP: f64 = 3.5;

/// Product-level pricing parameters.
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub coverage_type: CoverageType,
    /// Fraction of coverage charged before risk adjustment.
    pub base_rate: f64,
    pub min_premium_cents: u64,
    pub max_premium_cents: u64,
    pub min_coverage_cents: u64,
    pub max_coverage_cents: u64,
}

pub fn product_for(coverage_type: CoverageType) -> ProductDefinition {
    match coverage_type {
        CoverageType::FlightDelay => ProductDefinition {
            coverage_type,
            base_rate: 0.025,
            min_premium_cents: 500,
            max_premium_cents: 50_000,
            min_coverage_cents: 5_000,
            max_coverage_cents: 500_000,
        },
        CoverageType::FlightCancellation => ProductDefinition {
            coverage_type,
            base_rate: 0.018,
            min_premium_cents: 400,
            max_premium_cents: 60_000,
            min_coverage_cents: 5_000,
            max_coverage_cents: 1_000_000,
        },
        CoverageType::WeatherDisruption => ProductDefinition {
            coverage_type,
            base_rate: 0.032,
            min_premium_cents: 600,
            max_premium_cents: 50_000,
            min_coverage_cents: 5_000,
            max_coverage_cents: 400_000,
        },
    }
}

/// Carriers with known punctuality records; everyone else prices at 1.0.
fn carrier_factor(airline: Option<&str>) -> f64 {
    match airline {
        Some("BTI") | Some("SAS") | Some("FIN") | Some("DLH") | Some("KLM") => 0.95,
        Some("RYR") | Some("EZY") | Some("WZZ") => 1.05,
        _ => 1.0,
    }
}

/// Delay-history bucket, approximated from what the record already reports.
fn delay_bucket_factor(flight: &CanonicalFlight) -> f64 {
    let worst_delay = flight
        .departure_delay_minutes
        .unwrap_or(0)
        .max(flight.arrival_delay_minutes.unwrap_or(0));
    match worst_delay {
        d if d >= 60 => 1.5,
        d if d >= 30 => 1.25,
        d if d >= 15 => 1.1,
        _ => 1.0,
    }
}

/// Risk from the flight itself: current status dominates, then the delay
/// bucket and the carrier record.
pub fn flight_risk(flight: &CanonicalFlight) -> f64 {
    let status_factor = match flight.status {
        FlightStatus::Scheduled => 1.0,
        FlightStatus::Active | FlightStatus::Departed => 1.05,
        FlightStatus::Landed => 1.0,
        // The disruption is already underway; price it accordingly.
        FlightStatus::Delayed => 1.8,
        FlightStatus::Cancelled | FlightStatus::Diverted => 2.5,
        FlightStatus::Unknown => 1.2,
    };
    status_factor * delay_bucket_factor(flight) * carrier_factor(flight.airline_icao.as_deref())
}

fn condition_factor(condition: WeatherConditionType) -> f64 {
    match condition {
        WeatherConditionType::Clear => 1.0,
        WeatherConditionType::Cloudy => 1.05,
        WeatherConditionType::Rain => 1.15,
        WeatherConditionType::Fog => 1.25,
        WeatherConditionType::Snow => 1.4,
        WeatherConditionType::Storm => 1.6,
        WeatherConditionType::Unknown => 1.0,
    }
}

/// Risk from the weather at the relevant airports: the mean of per-airport
/// factors, where each airport's factor is its condition class adjusted for
/// poor visibility and strong wind. No weather data prices neutrally.
pub fn weather_risk(weather: &[CanonicalWeather]) -> f64 {
    if weather.is_empty() {
        return 1.0;
    }
    let sum: f64 = weather
        .iter()
        .map(|wx| {
            let mut factor = condition_factor(wx.condition_type);
            if wx.visibility_km.map(|v| v < 2.0).unwrap_or(false) {
                factor *= 1.15;
            }
            if wx.wind_speed_kph.map(|w| w > 60.0).unwrap_or(false) {
                factor *= 1.2;
            }
            factor
        })
        .sum();
    sum / weather.len() as f64
}

/// Surcharge for thin data. Above the threshold quality is free; below it
/// the multiplier grows linearly (the refusal floor caps how low quality
/// can get before the engine declines outright).
pub fn confidence_risk(quality_score: f64, surcharge_threshold: f64) -> f64 {
    if quality_score >= surcharge_threshold {
        1.0
    } else {
        1.0 + (surcharge_threshold - quality_score) * 0.5
    }
}

/// Product of the three factors, clamped to the allowed range.
pub fn combine(flight: f64, weather: f64, confidence: f64) -> f64 {
    (flight * weather * confidence).clamp(FACTOR_FLOOR, FACTOR_CAP)
}
