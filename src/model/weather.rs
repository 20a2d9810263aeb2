//! Canonical weather observation keyed by airport, time and forecast period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::flight::SourceContribution;

/// Coarse condition classes the risk model understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeatherConditionType {
    Clear,
    Cloudy,
    Rain,
    Snow,
    Storm,
    Fog,
    Unknown,
}

impl fmt::Display for WeatherConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WeatherConditionType::Clear => "CLEAR",
            WeatherConditionType::Cloudy => "CLOUDY",
            WeatherConditionType::Rain => "RAIN",
            WeatherConditionType::Snow => "SNOW",
            WeatherConditionType::Storm => "STORM",
            WeatherConditionType::Fog => "FOG",
            WeatherConditionType::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Which slice of time an observation describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastPeriod {
    /// Current conditions.
    Current,
    /// A daily forecast, N days out (1-based).
    Day(u8),
}

impl fmt::Display for ForecastPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastPeriod::Current => write!(f, "current"),
            ForecastPeriod::Day(n) => write!(f, "day{}", n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalWeather {
    /// Airport IATA code the observation belongs to.
    pub airport: String,
    pub observed_at: DateTime<Utc>,
    pub forecast_period: ForecastPeriod,
    pub temperature_c: Option<f64>,
    pub condition_code: Option<String>,
    pub condition_text: Option<String>,
    pub condition_type: WeatherConditionType,
    pub wind_speed_kph: Option<f64>,
    pub wind_cardinal: Option<String>,
    pub precipitation_mm: Option<f64>,
    pub visibility_km: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub contributions: Vec<SourceContribution>,
    pub data_quality_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl CanonicalWeather {
    pub fn new(
        airport: impl Into<String>,
        observed_at: DateTime<Utc>,
        forecast_period: ForecastPeriod,
    ) -> Self {
        Self {
            airport: airport.into(),
            observed_at,
            forecast_period,
            temperature_c: None,
            condition_code: None,
            condition_text: None,
            condition_type: WeatherConditionType::Unknown,
            wind_speed_kph: None,
            wind_cardinal: None,
            precipitation_mm: None,
            visibility_km: None,
            humidity_pct: None,
            pressure_hpa: None,
            contributions: Vec::new(),
            data_quality_score: 0.0,
            last_updated: Utc::now(),
        }
    }

    pub fn primary_confidence(&self) -> f64 {
        self.contributions
            .iter()
            .map(|c| c.confidence)
            .fold(0.0, f64::max)
    }

    pub fn latest_contribution_at(&self) -> DateTime<Utc> {
        self.contributions
            .iter()
            .map(|c| c.timestamp)
            .max()
            .unwrap_or(self.last_updated)
    }

    /// Weighted presence score in [0, 1]. Required (weight 2): airport,
    /// observation time, condition type. Important (weight 1): temperature,
    /// wind speed, visibility, humidity.
    pub fn completeness_score(&self) -> f64 {
        const TOTAL_WEIGHT: f64 = 10.0;
        let mut present = 0.0;

        if !self.airport.is_empty() {
            present += 2.0;
        }
        // Observation time is part of the key and always set.
        present += 2.0;
        if self.condition_type != WeatherConditionType::Unknown {
            present += 2.0;
        }
        if self.temperature_c.is_some() {
            present += 1.0;
        }
        if self.wind_speed_kph.is_some() {
            present += 1.0;
        }
        if self.visibility_km.is_some() {
            present += 1.0;
        }
        if self.humidity_pct.is_some() {
            present += 1.0;
        }

        let base = present / TOTAL_WEIGHT;
        (base + 0.1 * self.primary_confidence()).min(1.0)
    }

    pub fn sort_contributions(&mut self) {
        self.contributions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_name.cmp(&b.source_name))
        });
    }
}

/// Degrees to a 16-point compass cardinal, the way providers report wind.
pub fn degrees_to_cardinal(degrees: f64) -> &'static str {
    const CARDINALS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ];
    let normalized = degrees.rem_euclid(360.0);
    let index = ((normalized / 22.5) + 0.5) as usize % 16;
    CARDINALS[index]
}
