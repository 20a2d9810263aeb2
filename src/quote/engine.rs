//! The quote engine: bundle in, persisted priced quote out.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::risk::{self, ProductDefinition};
use crate::aggregator::data_router::{DataRouter, PolicyDataRequest};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::model::{
    CanonicalFlight, CanonicalWeather, CoverageType, Quote, QuoteStatus, RiskFactorSnapshot,
};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub flight_number: String,
    pub flight_date: NaiveDate,
    pub coverage_type: CoverageType,
    /// Minor units (cents).
    pub coverage_amount_cents: u64,
    pub airports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QuoteResponse {
    pub quote_id: String,
    pub valid_until: DateTime<Utc>,
    pub quotes: Vec<Quote>,
}

/// Prices one product against canonical data. Pure and deterministic; the
/// engine wraps it with data gathering and persistence.
pub fn price(
    product: &ProductDefinition,
    flight: &CanonicalFlight,
    weather: &[CanonicalWeather],
    quality_score: f64,
    coverage_amount_cents: u64,
    config: &CoreConfig,
) -> CoreResult<(u64, RiskFactorSnapshot)> {
    if quality_score < config.refusal_quality_floor {
        return Err(CoreError::InsufficientData {
            detail: format!(
                "bundle quality {:.2} below floor {:.2}",
                quality_score, config.refusal_quality_floor
            ),
        });
    }
    if flight.status.is_disruptive_terminal() {
        return Err(CoreError::EventAlreadyOccurred {
            flight: flight.flight_number.clone(),
            status: flight.status.to_string(),
        });
    }

    let flight_risk = risk::flight_risk(flight);
    let weather_risk = risk::weather_risk(weather);
    let confidence_risk = risk::confidence_risk(quality_score, config.surcharge_quality_threshold);
    let combined = risk::combine(flight_risk, weather_risk, confidence_risk);

    let premium = ((coverage_amount_cents as f64) * product.base_rate * combined).round() as u64;
    let premium = premium
        .max(product.min_premium_cents)
        .min(product.max_premium_cents);

    if premium >= coverage_amount_cents {
        return Err(CoreError::InvalidInput(format!(
            "premium {} would not be below coverage {}",
            premium, coverage_amount_cents
        )));
    }

    let snapshot = RiskFactorSnapshot {
        base_rate: product.base_rate,
        flight_risk,
        weather_risk,
        confidence_risk,
        combined,
        quality_score,
    };
    Ok((premium, snapshot))
}

pub struct QuoteEngine {
    data_router: Arc<DataRouter>,
    store: Arc<dyn Store>,
    config: CoreConfig,
}

impl QuoteEngine {
    pub fn new(data_router: Arc<DataRouter>, store: Arc<dyn Store>, config: CoreConfig) -> Self {
        Self {
            data_router,
            store,
            config,
        }
    }

    /// Gathers data, prices the requested product and persists the quote.
    pub async fn generate_quote(
        &self,
        request: &QuoteRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<QuoteResponse> {
        let product = risk::product_for(request.coverage_type);
        if request.coverage_amount_cents < product.min_coverage_cents
            || request.coverage_amount_cents > product.max_coverage_cents
        {
            return Err(CoreError::InvalidInput(format!(
                "coverage {} outside product limits [{}, {}]",
                request.coverage_amount_cents,
                product.min_coverage_cents,
                product.max_coverage_cents
            )));
        }

        let bundle = self
            .data_router
            .get_data_for_policy(
                &PolicyDataRequest {
                    flight_number: request.flight_number.clone(),
                    date: request.flight_date,
                    airports: request.airports.clone(),
                    include_weather: !request.airports.is_empty(),
                },
                cancel,
            )
            .await
            .map_err(|err| match err {
                // No usable flight data reads as "cannot quote", not as an
                // aggregator internals leak.
                CoreError::NoDataAvailable { query } => CoreError::InsufficientData {
                    detail: format!("no flight data for {}", query),
                },
                other => other,
            })?;

        let quality = bundle.overall_quality();
        let (premium, snapshot) = price(
            &product,
            &bundle.flight,
            &bundle.weather,
            quality,
            request.coverage_amount_cents,
            &self.config,
        )?;

        let now = Utc::now();
        let quote = Quote {
            quote_id: ids::new_internal_id(),
            quote_number: ids::new_reference("QTE"),
            provider_ref: None,
            flight_ref: bundle.flight.flight_ref(),
            coverage_type: request.coverage_type,
            coverage_amount_cents: request.coverage_amount_cents,
            premium_cents: premium,
            risk: snapshot,
            created_at: now,
            valid_until: now + Duration::seconds(self.config.quote_validity_secs),
            status: QuoteStatus::Pending,
        };
        quote.validate()?;
        self.store.insert_quote(&quote).await?;
        info!(
            "quote {} issued: {} cents premium on {} cents coverage (quality {:.2})",
            quote.quote_number, quote.premium_cents, quote.coverage_amount_cents, quality
        );

        Ok(QuoteResponse {
            quote_id: quote.quote_id.clone(),
            valid_until: quote.valid_until,
            quotes: vec![quote],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AirportRef, FlightStatus, ForecastPeriod, SourceContribution, WeatherConditionType};

    fn flight(status: FlightStatus) -> CanonicalFlight {
        let mut f = CanonicalFlight::new(
            "BT318",
            Utc::now() + Duration::days(2),
            AirportRef::iata("RIX"),
            AirportRef::iata("LHR"),
        );
        f.status = status;
        f.contributions.push(SourceContribution {
            source_name: "aviationstack".into(),
            fields: vec!["status".into()],
            timestamp: Utc::now(),
            confidence: 0.92,
            source_id: None,
            api_version: None,
        });
        f
    }

    #[test]
    fn scheduled_flight_prices_at_the_base_rate() {
        let product = risk::product_for(CoverageType::FlightDelay);
        let (premium, snapshot) = price(
            &product,
            &flight(FlightStatus::Scheduled),
            &[],
            0.86,
            50_000,
            &CoreConfig::default(),
        )
        .unwrap();
        // $500 coverage at 2.5% and neutral risk: $12.50.
        assert_eq!(premium, 1_250);
        assert!((snapshot.combined - 1.0).abs() < 1e-9);
    }

    #[test]
    fn premium_respects_product_bounds() {
        let product = risk::product_for(CoverageType::FlightDelay);
        // Minimum coverage with neutral risk would be $1.25, below the
        // product floor of $5.00.
        let (premium, _) = price(
            &product,
            &flight(FlightStatus::Scheduled),
            &[],
            0.9,
            5_000,
            &CoreConfig::default(),
        )
        .unwrap();
        assert_eq!(premium, product.min_premium_cents);
        assert!(premium < 5_000);
    }

    #[test]
    fn low_quality_is_refused() {
        let product = risk::product_for(CoverageType::FlightDelay);
        let err = price(
            &product,
            &flight(FlightStatus::Scheduled),
            &[],
            0.3,
            50_000,
            &CoreConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_DATA");
    }

    #[test]
    fn cancelled_flight_is_refused() {
        let product = risk::product_for(CoverageType::FlightCancellation);
        let err = price(
            &product,
            &flight(FlightStatus::Cancelled),
            &[],
            0.9,
            50_000,
            &CoreConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "EVENT_ALREADY_OCCURRED");
    }

    #[test]
    fn marginal_quality_carries_a_surcharge() {
        let product = risk::product_for(CoverageType::FlightDelay);
        let (clean, _) = price(
            &product,
            &flight(FlightStatus::Scheduled),
            &[],
            0.9,
            50_000,
            &CoreConfig::default(),
        )
        .unwrap();
        let (thin, snapshot) = price(
            &product,
            &flight(FlightStatus::Scheduled),
            &[],
            0.5,
            50_000,
            &CoreConfig::default(),
        )
        .unwrap();
        assert!(thin > clean);
        assert!(snapshot.confidence_risk > 1.0);
    }

    #[test]
    fn stormy_weather_raises_the_premium() {
        let product = risk::product_for(CoverageType::FlightDelay);
        let mut storm = CanonicalWeather::new("LHR", Utc::now(), ForecastPeriod::Current);
        storm.condition_type = WeatherConditionType::Storm;
        let (clear, _) = price(
            &product,
            &flight(FlightStatus::Scheduled),
            &[],
            0.9,
            50_000,
            &CoreConfig::default(),
        )
        .unwrap();
        let (stormy, _) = price(
            &product,
            &flight(FlightStatus::Scheduled),
            &[storm],
            0.9,
            50_000,
            &CoreConfig::default(),
        )
        .unwrap();
        assert!(stormy > clear);
    }
}
