//! Canonical, provider-independent data model.

pub mod bundle;
pub mod flight;
pub mod policy;
pub mod quote;
pub mod weather;

pub use bundle::{AggregationMetadata, PolicyDataBundle, SubQueryMeta};
pub use flight::{AirportRef, CanonicalFlight, FlightRef, FlightStatus, SourceContribution};
pub use policy::{Policy, PolicyEvent, PolicyEventType, PolicyOwner, PolicyStatus};
pub use quote::{CoverageType, Quote, QuoteStatus, RiskFactorSnapshot};
pub use weather::{CanonicalWeather, ForecastPeriod, WeatherConditionType};
