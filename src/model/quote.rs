//! Quote entity and the risk snapshot persisted with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::flight::FlightRef;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageType {
    FlightDelay,
    FlightCancellation,
    WeatherDisruption,
}

impl fmt::Display for CoverageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoverageType::FlightDelay => "FLIGHT_DELAY",
            CoverageType::FlightCancellation => "FLIGHT_CANCELLATION",
            CoverageType::WeatherDisruption => "WEATHER_DISRUPTION",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Pending,
    Accepted,
    Expired,
    Rejected,
}

/// The factors that went into a premium, persisted alongside the quote so a
/// price can always be explained after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactorSnapshot {
    pub base_rate: f64,
    pub flight_risk: f64,
    pub weather_risk: f64,
    pub confidence_risk: f64,
    /// Product of the three factors after clamping to the allowed range.
    pub combined: f64,
    /// Bundle quality the factors were computed from.
    pub quality_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: String,
    /// Human-facing unique reference.
    pub quote_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    pub flight_ref: FlightRef,
    pub coverage_type: CoverageType,
    /// Minor units (cents).
    pub coverage_amount_cents: u64,
    /// Minor units (cents).
    pub premium_cents: u64,
    pub risk: RiskFactorSnapshot,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: QuoteStatus,
}

impl Quote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }

    /// Invariants: premium never exceeds coverage, validity window is
    /// forward-looking.
    pub fn validate(&self) -> CoreResult<()> {
        if self.premium_cents > self.coverage_amount_cents {
            return Err(CoreError::InvalidInput(format!(
                "premium {} exceeds coverage {}",
                self.premium_cents, self.coverage_amount_cents
            )));
        }
        if self.valid_until <= self.created_at {
            return Err(CoreError::InvalidInput(
                "quote validity deadline is not after creation".into(),
            ));
        }
        Ok(())
    }
}
