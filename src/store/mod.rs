//! Persistence interface.
//!
//! The SQL layer is an external collaborator; the core talks to it through
//! this trait. `memory::MemoryStore` is the reference implementation and
//! enforces the same constraints a production schema would: unique
//! quote/policy numbers, unique escrow ids, owner exclusivity and the
//! one-policy-per-accepted-quote rule.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::types::{Escrow, EscrowStatus};
use crate::error::CoreResult;
use crate::model::{Policy, PolicyEvent, PolicyOwner, PolicyStatus, Quote};

/// A wallet owned by either a user or an anonymous session, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserWallet {
    pub wallet_id: String,
    pub owner: PolicyOwner,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

/// A recurring monitor job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    pub interval_secs: u64,
    pub created_at: DateTime<Utc>,
}

/// One run of a scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- quotes ---

    /// Inserts a new quote. Fails on a duplicate quote number or id.
    async fn insert_quote(&self, quote: &Quote) -> CoreResult<()>;

    async fn get_quote(&self, quote_id: &str) -> CoreResult<Option<Quote>>;

    /// Marks a pending quote expired. A no-op for already-terminal quotes.
    async fn mark_quote_expired(&self, quote_id: &str) -> CoreResult<()>;

    /// Atomically accepts a pending, unexpired quote and inserts the policy
    /// referencing it. This is the purchase critical section: a quote can
    /// only ever back one policy.
    async fn bind_quote_to_policy(&self, policy: Policy) -> CoreResult<(Quote, Policy)>;

    // --- policies ---

    async fn get_policy(&self, policy_id: &str) -> CoreResult<Option<Policy>>;

    async fn list_policies_by_status(&self, status: PolicyStatus) -> CoreResult<Vec<Policy>>;

    /// Applies a status transition after validating it against the state
    /// machine. The entity is unchanged on rejection.
    async fn update_policy_status(&self, policy_id: &str, to: PolicyStatus) -> CoreResult<Policy>;

    async fn set_policy_escrow(
        &self,
        policy_id: &str,
        escrow_internal_id: &str,
    ) -> CoreResult<()>;

    // --- policy events (append-only) ---

    /// Appends an event to the policy's log and returns the new length.
    /// Appends are serialised per policy.
    async fn append_event(&self, policy_id: &str, event: PolicyEvent) -> CoreResult<u64>;

    async fn events_for(&self, policy_id: &str) -> CoreResult<Vec<PolicyEvent>>;

    // --- escrows ---

    /// Inserts or updates an escrow record. `blockchain_id`, when present,
    /// must be unique across escrows.
    async fn upsert_escrow(&self, escrow: &Escrow) -> CoreResult<()>;

    async fn get_escrow(&self, internal_id: &str) -> CoreResult<Option<Escrow>>;

    async fn update_escrow_status(
        &self,
        internal_id: &str,
        to: EscrowStatus,
    ) -> CoreResult<Escrow>;

    // --- wallets ---

    async fn upsert_wallet(&self, wallet: &UserWallet) -> CoreResult<()>;

    async fn wallet_for_owner(&self, owner: &PolicyOwner) -> CoreResult<Option<UserWallet>>;

    // --- scheduler bookkeeping ---

    async fn record_task(&self, task: &ScheduledTask) -> CoreResult<()>;

    async fn record_execution(&self, execution: &TaskExecution) -> CoreResult<()>;

    async fn executions_for(&self, task_id: &str) -> CoreResult<Vec<TaskExecution>>;
}
