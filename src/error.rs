//! Crate-wide error taxonomy.
//!
//! Refusal reasons carry stable identifiers (`CoreError::code`) that are
//! surfaced to collaborators; everything else is internal detail.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Every usable source was exhausted without producing a record.
    #[error("no data available for {query}")]
    NoDataAvailable { query: String },

    /// The quote engine refuses to price on the available data.
    #[error("insufficient data to quote: {detail}")]
    InsufficientData { detail: String },

    /// The insured event has already happened; nothing left to insure.
    #[error("event already occurred for {flight} (status {status})")]
    EventAlreadyOccurred { flight: String, status: String },

    /// A purchase referenced a quote past its validity deadline.
    #[error("quote {quote_id} expired at {valid_until}")]
    QuoteExpired {
        quote_id: String,
        valid_until: DateTime<Utc>,
    },

    /// Transport or authentication failure talking to one provider.
    #[error("transport failure from {provider}: {message}")]
    Transport { provider: String, message: String },

    /// The provider's request window is exhausted.
    #[error("rate limit reached for {provider}")]
    RateLimited { provider: String },

    /// Chain submission failure; `transient` marks it retryable.
    #[error("chain submission failed: {message}")]
    ChainSubmission { message: String, transient: bool },

    /// Settlement gave up after bounded retries.
    #[error("payout failed for policy {policy_id}: {message}")]
    PayoutFailed { policy_id: String, message: String },

    /// An operation would violate an entity's state machine. The entity is
    /// left unchanged.
    #[error("state violation: {message}")]
    StateViolation { message: String },

    /// A uniqueness or exclusivity constraint in the persistence layer.
    #[error("constraint violation: {message}")]
    Constraint { message: String },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller's cancellation token fired. Committed side effects stay
    /// committed; nothing further happens.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Stable identifier surfaced to collaborators.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NoDataAvailable { .. } => "NO_DATA_AVAILABLE",
            CoreError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            CoreError::EventAlreadyOccurred { .. } => "EVENT_ALREADY_OCCURRED",
            CoreError::QuoteExpired { .. } => "QUOTE_EXPIRED",
            CoreError::Transport { .. } => "TRANSPORT_FAILURE",
            CoreError::RateLimited { .. } => "RATE_LIMITED",
            CoreError::ChainSubmission { .. } => "CHAIN_SUBMISSION_FAILED",
            CoreError::PayoutFailed { .. } => "PAYOUT_FAILED",
            CoreError::StateViolation { .. } => "STATE_VIOLATION",
            CoreError::Constraint { .. } => "CONSTRAINT_VIOLATION",
            CoreError::Storage(_) => "STORAGE_FAILURE",
            CoreError::InvalidInput(_) => "INVALID_INPUT",
            CoreError::Cancelled => "CANCELLED",
        }
    }

    /// Whether a retry loop is allowed to try again after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::Transport { .. } | CoreError::RateLimited { .. } => true,
            CoreError::ChainSubmission { transient, .. } => *transient,
            _ => false,
        }
    }

    pub fn transport(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CoreError::Transport {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        CoreError::StateViolation {
            message: message.into(),
        }
    }
}
