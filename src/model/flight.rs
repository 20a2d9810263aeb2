//! Canonical flight record with provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Canonical flight status vocabulary. Every provider's own vocabulary maps
/// into this set at the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Scheduled,
    Active,
    Departed,
    Landed,
    Cancelled,
    Diverted,
    Delayed,
    Unknown,
}

impl FlightStatus {
    /// Statuses for which the insured event has already happened.
    pub fn is_disruptive_terminal(&self) -> bool {
        matches!(self, FlightStatus::Cancelled | FlightStatus::Diverted)
    }

    /// Statuses that mean the flight has finished flying.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            FlightStatus::Landed | FlightStatus::Cancelled | FlightStatus::Diverted
        )
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlightStatus::Scheduled => "SCHEDULED",
            FlightStatus::Active => "ACTIVE",
            FlightStatus::Departed => "DEPARTED",
            FlightStatus::Landed => "LANDED",
            FlightStatus::Cancelled => "CANCELLED",
            FlightStatus::Diverted => "DIVERTED",
            FlightStatus::Delayed => "DELAYED",
            FlightStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Which provider filled which fields, at what time, with what confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source_name: String,
    pub fields: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// An airport reference; IATA is the primary key, ICAO optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirportRef {
    pub iata: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icao: Option<String>,
}

impl AirportRef {
    pub fn iata(code: impl Into<String>) -> Self {
        Self {
            iata: code.into(),
            icao: None,
        }
    }
}

/// Provider-independent identity of a flight: number plus scheduled
/// departure. Copied onto quotes and policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightRef {
    pub flight_number: String,
    pub scheduled_departure: DateTime<Utc>,
}

/// The merged, provider-independent flight record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFlight {
    pub flight_number: String,
    pub scheduled_departure: DateTime<Utc>,
    pub origin: AirportRef,
    pub destination: AirportRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airline_iata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airline_icao: Option<String>,
    pub estimated_departure: Option<DateTime<Utc>>,
    pub actual_departure: Option<DateTime<Utc>>,
    pub scheduled_arrival: Option<DateTime<Utc>>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub status: FlightStatus,
    pub departure_delay_minutes: Option<i64>,
    pub arrival_delay_minutes: Option<i64>,
    pub cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diverted_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    pub contributions: Vec<SourceContribution>,
    pub data_quality_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl CanonicalFlight {
    /// Bare record with identity fields only; adapters fill the rest.
    pub fn new(
        flight_number: impl Into<String>,
        scheduled_departure: DateTime<Utc>,
        origin: AirportRef,
        destination: AirportRef,
    ) -> Self {
        Self {
            flight_number: flight_number.into(),
            scheduled_departure,
            origin,
            destination,
            airline_iata: None,
            airline_icao: None,
            estimated_departure: None,
            actual_departure: None,
            scheduled_arrival: None,
            estimated_arrival: None,
            actual_arrival: None,
            status: FlightStatus::Unknown,
            departure_delay_minutes: None,
            arrival_delay_minutes: None,
            cancelled: None,
            diverted_to: None,
            gate: None,
            terminal: None,
            aircraft_type: None,
            contributions: Vec::new(),
            data_quality_score: 0.0,
            last_updated: Utc::now(),
        }
    }

    pub fn flight_ref(&self) -> FlightRef {
        FlightRef {
            flight_number: self.flight_number.clone(),
            scheduled_departure: self.scheduled_departure,
        }
    }

    /// Highest contribution confidence; 0 when the record has no provenance.
    pub fn primary_confidence(&self) -> f64 {
        self.contributions
            .iter()
            .map(|c| c.confidence)
            .fold(0.0, f64::max)
    }

    /// Timestamp of the most recent contribution.
    pub fn latest_contribution_at(&self) -> DateTime<Utc> {
        self.contributions
            .iter()
            .map(|c| c.timestamp)
            .max()
            .unwrap_or(self.last_updated)
    }

    /// Weighted presence score in [0, 1].
    ///
    /// Required fields (weight 2): flight number, origin IATA, destination
    /// IATA, scheduled departure. Important fields (weight 1): status, actual
    /// departure, actual arrival, airline ICAO. A small source-reliability
    /// term (the primary contribution confidence) tops it up, capped at 1.0.
    pub fn completeness_score(&self) -> f64 {
        const TOTAL_WEIGHT: f64 = 12.0;
        let mut present = 0.0;

        if !self.flight_number.is_empty() {
            present += 2.0;
        }
        if !self.origin.iata.is_empty() {
            present += 2.0;
        }
        if !self.destination.iata.is_empty() {
            present += 2.0;
        }
        // Scheduled departure is part of the identity and always set.
        present += 2.0;

        if self.status != FlightStatus::Unknown {
            present += 1.0;
        }
        if self.actual_departure.is_some() {
            present += 1.0;
        }
        if self.actual_arrival.is_some() {
            present += 1.0;
        }
        if self.airline_icao.is_some() {
            present += 1.0;
        }

        let base = present / TOTAL_WEIGHT;
        (base + 0.1 * self.primary_confidence()).min(1.0)
    }

    /// Re-sorts contributions by confidence descending (name ascending on
    /// ties, so the order is total).
    pub fn sort_contributions(&mut self) {
        self.contributions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_name.cmp(&b.source_name))
        });
    }

    /// Checks the record invariants.
    pub fn validate(&self) -> CoreResult<()> {
        if self.contributions.is_empty() {
            return Err(CoreError::InvalidInput(
                "canonical flight has no source contributions".into(),
            ));
        }
        if let (Some(dep), Some(arr)) = (self.actual_departure, self.actual_arrival) {
            if arr < dep {
                return Err(CoreError::InvalidInput(format!(
                    "actual arrival {} precedes actual departure {}",
                    arr, dep
                )));
            }
        }
        if self.status == FlightStatus::Landed && self.actual_arrival.is_none() {
            return Err(CoreError::InvalidInput(
                "LANDED flight is missing an actual arrival".into(),
            ));
        }
        let sorted = self
            .contributions
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence);
        if !sorted {
            return Err(CoreError::InvalidInput(
                "contributions are not sorted by confidence".into(),
            ));
        }
        Ok(())
    }
}
