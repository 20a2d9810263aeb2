//! Policy lifecycle: purchase binding, trigger observation, settlement.

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::aggregator::executor::RetryExecutor;
use crate::aggregator::flight::FlightAggregator;
use crate::chain::escrow::EscrowAdapter;
use crate::chain::types::{EscrowParams, EscrowPurpose};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::model::{
    CanonicalFlight, CoverageType, Policy, PolicyEvent, PolicyEventType, PolicyOwner,
    PolicyStatus,
};
use crate::sources::FlightQuery;
use crate::store::{ScheduledTask, Store};

/// How many days past scheduled departure a policy stays monitorable.
const MONITORING_WINDOW_DAYS: i64 = 3;

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub quote_id: String,
    pub owner: PolicyOwner,
    pub beneficiary_address: String,
    pub delay_threshold_minutes: Option<i64>,
}

/// What a monitoring pass concluded about one policy.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    NotMet,
    DelayMet { delay_minutes: i64 },
    CancellationMet { status: String },
    WindowExpired,
}

/// Pure trigger evaluation, separated out so it can be tested without any
/// plumbing.
pub fn evaluate_trigger(
    policy: &Policy,
    flight: &CanonicalFlight,
    now: DateTime<Utc>,
    grace_minutes: i64,
) -> TriggerOutcome {
    match policy.coverage_type {
        CoverageType::FlightCancellation => {
            if flight.status.is_disruptive_terminal() {
                return TriggerOutcome::CancellationMet {
                    status: flight.status.to_string(),
                };
            }
        }
        CoverageType::FlightDelay | CoverageType::WeatherDisruption => {
            // The delay only counts once the arrival is final: either an
            // actual arrival was reported, or the grace window after the
            // scheduled arrival has passed with the estimate standing.
            let arrival_final = flight.actual_arrival.is_some()
                || flight
                    .scheduled_arrival
                    .map(|sched| now >= sched + Duration::minutes(grace_minutes))
                    .unwrap_or(false);
            if arrival_final {
                let delay = flight.arrival_delay_minutes.unwrap_or(0);
                if delay >= policy.delay_threshold_minutes {
                    return TriggerOutcome::DelayMet {
                        delay_minutes: delay,
                    };
                }
            }
        }
    }

    if now >= policy.expires_at {
        TriggerOutcome::WindowExpired
    } else {
        TriggerOutcome::NotMet
    }
}

pub struct PolicyMonitor {
    store: Arc<dyn Store>,
    flights: Arc<FlightAggregator>,
    escrow: Arc<EscrowAdapter>,
    retry: RetryExecutor,
    config: CoreConfig,
}

impl PolicyMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        flights: Arc<FlightAggregator>,
        escrow: Arc<EscrowAdapter>,
        retry: RetryExecutor,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            flights,
            escrow,
            retry,
            config,
        }
    }

    async fn append(
        &self,
        policy_id: &str,
        event_type: PolicyEventType,
        triggered_by: &str,
        data: serde_json::Value,
    ) -> CoreResult<()> {
        self.store
            .append_event(policy_id, PolicyEvent::new(event_type, triggered_by, data))
            .await?;
        Ok(())
    }

    /// Purchases a quote: binds it to a new policy, opens the escrow and
    /// activates monitoring.
    pub async fn purchase(
        &self,
        request: &PurchaseRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<Policy> {
        let quote = self
            .store
            .get_quote(&request.quote_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("quote {} not found", request.quote_id))
            })?;

        let now = Utc::now();
        let policy = Policy {
            policy_id: ids::new_internal_id(),
            policy_number: ids::new_reference("POL"),
            owner: request.owner.clone(),
            flight_ref: quote.flight_ref.clone(),
            quote_id: quote.quote_id.clone(),
            coverage_type: quote.coverage_type,
            coverage_amount_cents: quote.coverage_amount_cents,
            premium_cents: quote.premium_cents,
            delay_threshold_minutes: request
                .delay_threshold_minutes
                .unwrap_or(self.config.default_delay_threshold_minutes),
            status: PolicyStatus::Pending,
            escrow_internal_id: None,
            beneficiary_address: request.beneficiary_address.clone(),
            expires_at: quote.flight_ref.scheduled_departure
                + Duration::days(MONITORING_WINDOW_DAYS),
            created_at: now,
        };

        // The quote-acceptance and policy insert are one atomic store step.
        let (_accepted, policy) = self.store.bind_quote_to_policy(policy).await?;
        self.append(
            &policy.policy_id,
            PolicyEventType::PolicyCreated,
            &policy.owner.to_string(),
            json!({ "quote_id": policy.quote_id, "premium_cents": policy.premium_cents }),
        )
        .await?;

        let escrow_params = EscrowParams {
            amount_cents: policy.coverage_amount_cents,
            expires_at: policy.expires_at,
            recipient: request.beneficiary_address.clone(),
            fulfiller: request.beneficiary_address.clone(),
            purpose: EscrowPurpose::Reserve,
            verification_key: None,
        };
        let escrow_result = self
            .retry
            .run("escrow-create", cancel, |_| {
                let escrow = self.escrow.clone();
                let params = escrow_params.clone();
                async move { escrow.create_escrow(&params).await }
            })
            .await;

        match escrow_result {
            Ok((escrow, result)) => {
                self.store
                    .set_policy_escrow(&policy.policy_id, &escrow.internal_id)
                    .await?;
                let policy = self
                    .store
                    .update_policy_status(&policy.policy_id, PolicyStatus::Active)
                    .await?;
                self.append(
                    &policy.policy_id,
                    PolicyEventType::PolicyActivated,
                    "system",
                    json!({ "escrow_id": escrow.internal_id, "tx_hash": result.hash }),
                )
                .await?;
                self.append(
                    &policy.policy_id,
                    PolicyEventType::MonitoringActive,
                    "system",
                    json!({ "delay_threshold_minutes": policy.delay_threshold_minutes }),
                )
                .await?;
                info!("policy {} active", policy.policy_number);
                Ok(policy)
            }
            Err(err) => {
                warn!(
                    "escrow creation failed for policy {}: {}",
                    policy.policy_id, err
                );
                let failed = self
                    .store
                    .update_policy_status(&policy.policy_id, PolicyStatus::Failed)
                    .await?;
                self.append(
                    &failed.policy_id,
                    PolicyEventType::PayoutFailed,
                    "system",
                    json!({ "stage": "escrow_create", "error": err.code() }),
                )
                .await?;
                Err(err)
            }
        }
    }

    /// One monitoring pass over a policy: fetch the flight's current state,
    /// evaluate the trigger, settle or expire as appropriate.
    pub async fn check_policy(
        &self,
        policy_id: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<PolicyStatus> {
        let policy = self
            .store
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| CoreError::InvalidInput(format!("policy {} not found", policy_id)))?;
        if policy.status != PolicyStatus::Active {
            return Ok(policy.status);
        }

        let query = FlightQuery::new(
            policy.flight_ref.flight_number.clone(),
            policy.flight_ref.scheduled_departure.date_naive(),
        );
        let flight = match self.flights.get_flight_status(&query, cancel).await {
            Ok(result) => result.data,
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(err) => {
                // Data outages must not fail policies; try again next pass.
                warn!("monitoring fetch failed for {}: {}", policy.policy_id, err);
                return Ok(PolicyStatus::Active);
            }
        };

        match evaluate_trigger(
            &policy,
            &flight,
            Utc::now(),
            self.config.arrival_grace_window_minutes,
        ) {
            TriggerOutcome::NotMet => Ok(PolicyStatus::Active),
            TriggerOutcome::DelayMet { delay_minutes } => {
                self.settle(
                    &policy,
                    json!({ "trigger": "delay", "delay_minutes": delay_minutes }),
                    cancel,
                )
                .await
            }
            TriggerOutcome::CancellationMet { status } => {
                self.settle(
                    &policy,
                    json!({ "trigger": "cancellation", "status": status }),
                    cancel,
                )
                .await
            }
            TriggerOutcome::WindowExpired => {
                let expired = self
                    .store
                    .update_policy_status(&policy.policy_id, PolicyStatus::Expired)
                    .await?;
                self.append(
                    &policy.policy_id,
                    PolicyEventType::PolicyExpired,
                    "system",
                    json!({ "expires_at": policy.expires_at }),
                )
                .await?;
                Ok(expired.status)
            }
        }
    }

    async fn settle(
        &self,
        policy: &Policy,
        trigger_data: serde_json::Value,
        cancel: &CancellationToken,
    ) -> CoreResult<PolicyStatus> {
        let escrow_id = policy.escrow_internal_id.clone().ok_or_else(|| {
            CoreError::state(format!("policy {} has no escrow to release", policy.policy_id))
        })?;

        self.append(
            &policy.policy_id,
            PolicyEventType::ClaimConditionMet,
            "monitor",
            trigger_data,
        )
        .await?;
        self.append(
            &policy.policy_id,
            PolicyEventType::PayoutProcessing,
            "system",
            json!({ "escrow_id": escrow_id }),
        )
        .await?;

        let release = self
            .retry
            .run("escrow-release", cancel, |_| {
                let escrow = self.escrow.clone();
                let escrow_id = escrow_id.clone();
                async move { escrow.release_escrow(&escrow_id).await }
            })
            .await;

        match release {
            Ok(result) => {
                let claimed = self
                    .store
                    .update_policy_status(&policy.policy_id, PolicyStatus::Claimed)
                    .await?;
                self.append(
                    &policy.policy_id,
                    PolicyEventType::PayoutCompleted,
                    "system",
                    json!({ "tx_hash": result.hash, "amount_cents": policy.coverage_amount_cents }),
                )
                .await?;
                info!("policy {} claimed and paid", policy.policy_number);
                Ok(claimed.status)
            }
            Err(CoreError::Cancelled) => Err(CoreError::Cancelled),
            Err(err) => {
                let failed = self
                    .store
                    .update_policy_status(&policy.policy_id, PolicyStatus::Failed)
                    .await?;
                self.append(
                    &policy.policy_id,
                    PolicyEventType::PayoutFailed,
                    "system",
                    json!({ "error": err.code() }),
                )
                .await?;
                warn!("payout failed for policy {}: {}", policy.policy_id, err);
                Err(CoreError::PayoutFailed {
                    policy_id: failed.policy_id,
                    message: err.to_string(),
                })
            }
        }
    }

    /// User-initiated cancellation before the monitoring window closes.
    pub async fn cancel_policy(
        &self,
        policy_id: &str,
        triggered_by: &str,
    ) -> CoreResult<Policy> {
        let cancelled = self
            .store
            .update_policy_status(policy_id, PolicyStatus::Cancelled)
            .await?;
        self.append(
            policy_id,
            PolicyEventType::PolicyCancelled,
            triggered_by,
            json!({}),
        )
        .await?;
        Ok(cancelled)
    }

    /// Registers the recurring monitoring sweep with the scheduler.
    pub async fn start_monitoring(
        self: &Arc<Self>,
        scheduler: &crate::monitor::scheduler::Scheduler,
        interval_secs: u64,
    ) -> CoreResult<()> {
        let monitor = self.clone();
        let task = ScheduledTask {
            task_id: ids::new_short_id(),
            name: "policy-monitor-sweep".into(),
            policy_id: None,
            interval_secs,
            created_at: Utc::now(),
        };
        scheduler
            .spawn_interval(task, move |cancel| {
                let monitor = monitor.clone();
                async move {
                    let active = monitor
                        .store
                        .list_policies_by_status(PolicyStatus::Active)
                        .await?;
                    let total = active.len();
                    let mut settled = 0;
                    for policy in active {
                        if cancel.is_cancelled() {
                            return Err(CoreError::Cancelled);
                        }
                        match monitor.check_policy(&policy.policy_id, &cancel).await {
                            Ok(PolicyStatus::Claimed) => settled += 1,
                            Ok(_) => {}
                            Err(err) => {
                                warn!("sweep: policy {} check failed: {}", policy.policy_id, err)
                            }
                        }
                    }
                    Ok(format!("checked {} policies, settled {}", total, settled))
                }
            })
            .await
    }
}
