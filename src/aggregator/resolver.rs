//! Deterministic field-level merge of canonical records.
//!
//! Records are ranked by contribution confidence, then recency, then source
//! name, so the merge result is independent of arrival order. Critical
//! fields record a conflict whenever two sources disagree; non-critical
//! fields silently take the first non-null value in rank order.

use chrono::Utc;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::model::{CanonicalFlight, CanonicalWeather, SourceContribution};

/// One recorded disagreement on a critical field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldConflict {
    pub field: String,
    pub chosen_source: String,
    pub chosen_value: String,
    /// The losing (source, value) pairs.
    pub rejected: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Resolution<T> {
    pub merged: T,
    pub conflicts: Vec<FieldConflict>,
    pub quality_score: f64,
}

/// Quality = mean completeness − conflict penalty + source-diversity bonus,
/// clamped to [0, 1].
fn quality_score(completeness: &[f64], conflict_count: usize) -> f64 {
    let mean = completeness.iter().sum::<f64>() / completeness.len() as f64;
    let penalty = (0.05 * conflict_count as f64).min(0.3);
    let bonus = (0.02 * (completeness.len() as f64 - 1.0)).min(0.1);
    (mean - penalty + bonus).clamp(0.0, 1.0)
}

/// Merges contributions across records: per source keep the entry with the
/// higher confidence, then order by confidence descending (name ascending on
/// ties).
fn merge_contributions(records: &[Vec<SourceContribution>]) -> Vec<SourceContribution> {
    let mut by_source: HashMap<String, SourceContribution> = HashMap::new();
    for contributions in records {
        for c in contributions {
            match by_source.get(&c.source_name) {
                Some(existing) if existing.confidence >= c.confidence => {}
                _ => {
                    by_source.insert(c.source_name.clone(), c.clone());
                }
            }
        }
    }
    let mut merged: Vec<_> = by_source.into_values().collect();
    merged.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_name.cmp(&b.source_name))
    });
    merged
}

/// Sorts record indices into resolution rank: confidence desc, contribution
/// recency desc, then first source name for a total order.
fn rank_records<F, G, H>(n: usize, confidence: F, recency: G, name: H) -> Vec<usize>
where
    F: Fn(usize) -> f64,
    G: Fn(usize) -> chrono::DateTime<Utc>,
    H: Fn(usize) -> String,
{
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        confidence(b)
            .partial_cmp(&confidence(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| recency(b).cmp(&recency(a)))
            .then_with(|| name(a).cmp(&name(b)))
    });
    order
}

/// Resolves one critical field across ranked records. `candidates` holds
/// `(source, rendered value, Some(value))` for each record that has the
/// field. Returns the winning value and, when sources disagreed, a conflict.
fn resolve_critical<V: Clone + PartialEq>(
    field: &str,
    candidates: Vec<(String, String, V)>,
) -> (Option<V>, Option<FieldConflict>) {
    if candidates.is_empty() {
        return (None, None);
    }
    let (winner_source, winner_repr, winner_value) = candidates[0].clone();
    let rejected: Vec<(String, String)> = candidates[1..]
        .iter()
        .filter(|(_, _, v)| *v != winner_value)
        .map(|(s, repr, _)| (s.clone(), repr.clone()))
        .collect();
    if rejected.is_empty() {
        (Some(winner_value), None)
    } else {
        debug!(
            "conflict on '{}': keeping {}={}",
            field, winner_source, winner_repr
        );
        (
            Some(winner_value),
            Some(FieldConflict {
                field: field.to_string(),
                chosen_source: winner_source,
                chosen_value: winner_repr,
                rejected,
            }),
        )
    }
}

macro_rules! critical_field {
    ($ranked:expr, $sources:expr, $merged:expr, $conflicts:expr, $field:ident, $name:expr) => {{
        let candidates: Vec<_> = $ranked
            .iter()
            .filter_map(|&i| {
                $sources[i].1.$field.clone().map(|v| {
                    (
                        $sources[i].0.clone(),
                        format!("{:?}", v),
                        v,
                    )
                })
            })
            .collect();
        let (value, conflict) = resolve_critical($name, candidates);
        if let Some(v) = value {
            $merged.$field = Some(v);
        }
        if let Some(c) = conflict {
            $conflicts.push(c);
        }
    }};
}

macro_rules! fill_field {
    ($ranked:expr, $records:expr, $merged:expr, $field:ident) => {{
        if $merged.$field.is_none() {
            for &i in $ranked.iter() {
                if let Some(v) = $records[i].$field.clone() {
                    $merged.$field = Some(v);
                    break;
                }
            }
        }
    }};
}

/// Merges a non-empty set of canonical flight records for the same flight.
pub fn resolve_flights(records: Vec<CanonicalFlight>) -> CoreResult<Resolution<CanonicalFlight>> {
    if records.is_empty() {
        return Err(CoreError::InvalidInput(
            "resolver needs at least one record".into(),
        ));
    }

    let completeness: Vec<f64> = records.iter().map(|r| r.completeness_score()).collect();

    if records.len() == 1 {
        let mut merged = records.into_iter().next().expect("len checked");
        merged.sort_contributions();
        merged.data_quality_score = completeness[0];
        merged.last_updated = Utc::now();
        return Ok(Resolution {
            quality_score: completeness[0],
            conflicts: Vec::new(),
            merged,
        });
    }

    let first_source = |r: &CanonicalFlight| {
        r.contributions
            .first()
            .map(|c| c.source_name.clone())
            .unwrap_or_default()
    };
    let ranked = rank_records(
        records.len(),
        |i| records[i].primary_confidence(),
        |i| records[i].latest_contribution_at(),
        |i| first_source(&records[i]),
    );
    let sources: Vec<(String, &CanonicalFlight)> = records
        .iter()
        .map(|r| (first_source(r), r))
        .collect();

    let mut merged = records[ranked[0]].clone();
    let mut conflicts: Vec<FieldConflict> = Vec::new();

    // Status is mandatory, so it resolves over every record rather than
    // only those with a value.
    {
        let candidates: Vec<_> = ranked
            .iter()
            .map(|&i| {
                (
                    sources[i].0.clone(),
                    records[i].status.to_string(),
                    records[i].status,
                )
            })
            .collect();
        let (value, conflict) = resolve_critical("status", candidates);
        if let Some(status) = value {
            merged.status = status;
        }
        if let Some(c) = conflict {
            conflicts.push(c);
        }
    }

    critical_field!(ranked, sources, merged, conflicts, actual_departure, "actual_departure");
    critical_field!(ranked, sources, merged, conflicts, actual_arrival, "actual_arrival");
    critical_field!(
        ranked,
        sources,
        merged,
        conflicts,
        departure_delay_minutes,
        "departure_delay_minutes"
    );
    critical_field!(
        ranked,
        sources,
        merged,
        conflicts,
        arrival_delay_minutes,
        "arrival_delay_minutes"
    );
    critical_field!(ranked, sources, merged, conflicts, cancelled, "cancelled");
    critical_field!(ranked, sources, merged, conflicts, diverted_to, "diverted_to");

    // Non-critical fields: first non-null in rank order, no conflict kept.
    fill_field!(ranked, records, merged, airline_iata);
    fill_field!(ranked, records, merged, airline_icao);
    fill_field!(ranked, records, merged, estimated_departure);
    fill_field!(ranked, records, merged, scheduled_arrival);
    fill_field!(ranked, records, merged, estimated_arrival);
    fill_field!(ranked, records, merged, gate);
    fill_field!(ranked, records, merged, terminal);
    fill_field!(ranked, records, merged, aircraft_type);
    if merged.origin.iata.is_empty() {
        if let Some(&i) = ranked.iter().find(|&&i| !records[i].origin.iata.is_empty()) {
            merged.origin = records[i].origin.clone();
        }
    }
    if merged.destination.iata.is_empty() {
        if let Some(&i) = ranked
            .iter()
            .find(|&&i| !records[i].destination.iata.is_empty())
        {
            merged.destination = records[i].destination.clone();
        }
    }

    merged.contributions =
        merge_contributions(&records.iter().map(|r| r.contributions.clone()).collect::<Vec<_>>());
    let quality = quality_score(&completeness, conflicts.len());
    merged.data_quality_score = quality;
    merged.last_updated = Utc::now();

    Ok(Resolution {
        merged,
        conflicts,
        quality_score: quality,
    })
}

/// Merges a non-empty set of canonical weather records for the same airport
/// and period. Critical fields: condition type, temperature, wind speed,
/// visibility.
pub fn resolve_weather(records: Vec<CanonicalWeather>) -> CoreResult<Resolution<CanonicalWeather>> {
    if records.is_empty() {
        return Err(CoreError::InvalidInput(
            "resolver needs at least one record".into(),
        ));
    }

    let completeness: Vec<f64> = records.iter().map(|r| r.completeness_score()).collect();

    if records.len() == 1 {
        let mut merged = records.into_iter().next().expect("len checked");
        merged.sort_contributions();
        merged.data_quality_score = completeness[0];
        merged.last_updated = Utc::now();
        return Ok(Resolution {
            quality_score: completeness[0],
            conflicts: Vec::new(),
            merged,
        });
    }

    let first_source = |r: &CanonicalWeather| {
        r.contributions
            .first()
            .map(|c| c.source_name.clone())
            .unwrap_or_default()
    };
    let ranked = rank_records(
        records.len(),
        |i| records[i].primary_confidence(),
        |i| records[i].latest_contribution_at(),
        |i| first_source(&records[i]),
    );
    let sources: Vec<(String, &CanonicalWeather)> = records
        .iter()
        .map(|r| (first_source(r), r))
        .collect();

    let mut merged = records[ranked[0]].clone();
    let mut conflicts: Vec<FieldConflict> = Vec::new();

    {
        let candidates: Vec<_> = ranked
            .iter()
            .map(|&i| {
                (
                    sources[i].0.clone(),
                    records[i].condition_type.to_string(),
                    records[i].condition_type,
                )
            })
            .collect();
        let (value, conflict) = resolve_critical("condition_type", candidates);
        if let Some(ct) = value {
            merged.condition_type = ct;
        }
        if let Some(c) = conflict {
            conflicts.push(c);
        }
    }

    critical_field!(ranked, sources, merged, conflicts, temperature_c, "temperature_c");
    critical_field!(ranked, sources, merged, conflicts, wind_speed_kph, "wind_speed_kph");
    critical_field!(ranked, sources, merged, conflicts, visibility_km, "visibility_km");

    fill_field!(ranked, records, merged, condition_code);
    fill_field!(ranked, records, merged, condition_text);
    fill_field!(ranked, records, merged, wind_cardinal);
    fill_field!(ranked, records, merged, precipitation_mm);
    fill_field!(ranked, records, merged, humidity_pct);
    fill_field!(ranked, records, merged, pressure_hpa);

    merged.contributions =
        merge_contributions(&records.iter().map(|r| r.contributions.clone()).collect::<Vec<_>>());
    let quality = quality_score(&completeness, conflicts.len());
    merged.data_quality_score = quality;
    merged.last_updated = Utc::now();

    Ok(Resolution {
        merged,
        conflicts,
        quality_score: quality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AirportRef, FlightStatus};
    use chrono::{TimeZone, Utc};

    fn flight_from(
        source: &str,
        confidence: f64,
        minute: u32,
        status: FlightStatus,
        arrival_delay: Option<i64>,
    ) -> CanonicalFlight {
        let mut flight = CanonicalFlight::new(
            "BT318",
            Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap(),
            AirportRef::iata("RIX"),
            AirportRef::iata("LHR"),
        );
        flight.status = status;
        flight.arrival_delay_minutes = arrival_delay;
        flight.contributions.push(SourceContribution {
            source_name: source.to_string(),
            fields: vec!["status".into()],
            timestamp: Utc.with_ymd_and_hms(2025, 7, 1, 12, minute, 0).unwrap(),
            confidence,
            source_id: None,
            api_version: None,
        });
        flight
    }

    #[test]
    fn single_record_passes_through() {
        let record = flight_from("a", 0.9, 5, FlightStatus::Scheduled, None);
        let expected_score = record.completeness_score();
        let resolution = resolve_flights(vec![record]).unwrap();
        assert!(resolution.conflicts.is_empty());
        assert!((resolution.quality_score - expected_score).abs() < 1e-9);
    }

    #[test]
    fn higher_confidence_wins_despite_newer_timestamp() {
        // A: confidence 0.95 at 12:05 says DELAYED/75.
        // B: confidence 0.85 at 12:10 says ACTIVE/0.
        let a = flight_from("a", 0.95, 5, FlightStatus::Delayed, Some(75));
        let b = flight_from("b", 0.85, 10, FlightStatus::Active, Some(0));
        let resolution = resolve_flights(vec![b, a]).unwrap();
        assert_eq!(resolution.merged.status, FlightStatus::Delayed);
        assert_eq!(resolution.merged.arrival_delay_minutes, Some(75));
        assert!(resolution.conflicts.len() >= 1);
    }

    #[test]
    fn equal_confidence_breaks_ties_by_recency() {
        let older = flight_from("older", 0.9, 0, FlightStatus::Active, None);
        let newer = flight_from("newer", 0.9, 30, FlightStatus::Landed, None);
        // LANDED needs an arrival to survive validation downstream.
        let mut newer = newer;
        newer.actual_arrival = Some(Utc.with_ymd_and_hms(2025, 7, 1, 12, 30, 0).unwrap());
        let resolution = resolve_flights(vec![older, newer]).unwrap();
        assert_eq!(resolution.merged.status, FlightStatus::Landed);
    }

    #[test]
    fn merge_is_order_independent() {
        let a = flight_from("a", 0.95, 5, FlightStatus::Delayed, Some(75));
        let b = flight_from("b", 0.85, 10, FlightStatus::Active, Some(0));
        let c = flight_from("c", 0.80, 2, FlightStatus::Scheduled, None);

        let forward = resolve_flights(vec![a.clone(), b.clone(), c.clone()]).unwrap();
        let backward = resolve_flights(vec![c, b, a]).unwrap();
        assert_eq!(forward.merged.status, backward.merged.status);
        assert_eq!(
            forward.merged.arrival_delay_minutes,
            backward.merged.arrival_delay_minutes
        );
        assert_eq!(forward.conflicts.len(), backward.conflicts.len());
        assert!((forward.quality_score - backward.quality_score).abs() < 1e-9);
    }

    #[test]
    fn agreement_is_not_a_conflict() {
        let a = flight_from("a", 0.95, 5, FlightStatus::Scheduled, Some(0));
        let b = flight_from("b", 0.85, 6, FlightStatus::Scheduled, Some(0));
        let resolution = resolve_flights(vec![a, b]).unwrap();
        assert!(resolution.conflicts.is_empty());
    }

    #[test]
    fn non_critical_fields_fill_from_lower_ranked_sources() {
        let a = flight_from("a", 0.95, 5, FlightStatus::Scheduled, None);
        let mut b = flight_from("b", 0.85, 6, FlightStatus::Scheduled, None);
        b.gate = Some("B4".into());
        b.airline_icao = Some("BTI".into());
        let resolution = resolve_flights(vec![a, b]).unwrap();
        assert_eq!(resolution.merged.gate.as_deref(), Some("B4"));
        assert_eq!(resolution.merged.airline_icao.as_deref(), Some("BTI"));
    }

    #[test]
    fn contributions_keep_best_entry_per_source() {
        let a1 = flight_from("a", 0.7, 5, FlightStatus::Scheduled, None);
        let a2 = flight_from("a", 0.95, 6, FlightStatus::Scheduled, None);
        let resolution = resolve_flights(vec![a1, a2]).unwrap();
        assert_eq!(resolution.merged.contributions.len(), 1);
        assert!((resolution.merged.contributions[0].confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn conflict_penalty_lowers_quality() {
        let a = flight_from("a", 0.95, 5, FlightStatus::Delayed, Some(75));
        let agreeing = flight_from("b", 0.85, 6, FlightStatus::Delayed, Some(75));
        let disagreeing = flight_from("b", 0.85, 6, FlightStatus::Active, Some(0));
        let clean = resolve_flights(vec![a.clone(), agreeing]).unwrap();
        let dirty = resolve_flights(vec![a, disagreeing]).unwrap();
        assert!(dirty.quality_score < clean.quality_score);
    }

    #[test]
    fn duplicate_source_does_not_decrease_quality() {
        let a = flight_from("a", 0.95, 5, FlightStatus::Scheduled, Some(0));
        let twin = flight_from("b", 0.95, 5, FlightStatus::Scheduled, Some(0));
        let single = resolve_flights(vec![a.clone()]).unwrap();
        let doubled = resolve_flights(vec![a, twin]).unwrap();
        assert!(doubled.quality_score >= single.quality_score - 1e-9);
    }
}
