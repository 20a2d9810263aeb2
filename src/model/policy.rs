//! Policy entity, its owner model and the append-only event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::flight::FlightRef;
use super::quote::CoverageType;
use crate::error::{CoreError, CoreResult};

/// A policy belongs to exactly one of an authenticated user or an anonymous
/// session. Making that a sum type keeps the exclusivity constraint
/// unrepresentable rather than checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PolicyOwner {
    User(String),
    Anonymous(String),
}

impl PolicyOwner {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            PolicyOwner::User(id) => Some(id),
            PolicyOwner::Anonymous(_) => None,
        }
    }

    pub fn anonymous_session_id(&self) -> Option<&str> {
        match self {
            PolicyOwner::User(_) => None,
            PolicyOwner::Anonymous(id) => Some(id),
        }
    }
}

impl fmt::Display for PolicyOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyOwner::User(id) => write!(f, "user:{}", id),
            PolicyOwner::Anonymous(id) => write!(f, "anon:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    Pending,
    Active,
    Expired,
    Claimed,
    Cancelled,
    Failed,
}

impl PolicyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PolicyStatus::Expired
                | PolicyStatus::Claimed
                | PolicyStatus::Cancelled
                | PolicyStatus::Failed
        )
    }

    /// Allowed transitions of the policy state machine.
    pub fn can_transition_to(&self, to: PolicyStatus) -> bool {
        use PolicyStatus::*;
        match (self, to) {
            (Pending, Active) => true,
            (Active, Claimed) => true,
            (Active, Expired) => true,
            // Settlement failure can strike during activation or payout.
            (Pending, Failed) | (Active, Failed) => true,
            // User cancellation from any non-terminal state.
            (from, Cancelled) if !from.is_terminal() => true,
            _ => false,
        }
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyStatus::Pending => "PENDING",
            PolicyStatus::Active => "ACTIVE",
            PolicyStatus::Expired => "EXPIRED",
            PolicyStatus::Claimed => "CLAIMED",
            PolicyStatus::Cancelled => "CANCELLED",
            PolicyStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Fixed vocabulary of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyEventType {
    PolicyCreated,
    PolicyActivated,
    MonitoringActive,
    ClaimConditionMet,
    PayoutProcessing,
    PayoutCompleted,
    PayoutFailed,
    PolicyExpired,
    PolicyCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvent {
    pub event_type: PolicyEventType,
    pub data: Value,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

impl PolicyEvent {
    pub fn new(event_type: PolicyEventType, triggered_by: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            data,
            triggered_by: triggered_by.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    /// Human-facing unique reference.
    pub policy_number: String,
    pub owner: PolicyOwner,
    pub flight_ref: FlightRef,
    pub quote_id: String,
    pub coverage_type: CoverageType,
    pub coverage_amount_cents: u64,
    pub premium_cents: u64,
    pub delay_threshold_minutes: i64,
    pub status: PolicyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_internal_id: Option<String>,
    pub beneficiary_address: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    /// Validates a proposed transition without applying it.
    pub fn check_transition(&self, to: PolicyStatus) -> CoreResult<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::state(format!(
                "policy {} cannot move {} -> {}",
                self.policy_id, self.status, to
            )))
        }
    }
}
