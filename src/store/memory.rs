//! In-memory reference store.
//!
//! One mutex over all tables keeps the purchase critical section and the
//! per-policy event appends trivially serialised, which is exactly the
//! behaviour the constraints ask for. Throughput is not this store's job.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ScheduledTask, Store, TaskExecution, UserWallet};
use crate::chain::types::{Escrow, EscrowStatus};
use crate::error::{CoreError, CoreResult};
use crate::model::{Policy, PolicyEvent, PolicyOwner, PolicyStatus, Quote, QuoteStatus};

#[derive(Default)]
struct Tables {
    quotes: HashMap<String, Quote>,
    quote_numbers: HashMap<String, String>,
    policies: HashMap<String, Policy>,
    policy_numbers: HashMap<String, String>,
    /// quote_id -> policy_id; the uniqueness constraint behind purchases.
    quote_bindings: HashMap<String, String>,
    events: HashMap<String, Vec<PolicyEvent>>,
    escrows: HashMap<String, Escrow>,
    /// blockchain_id -> internal_id, unique when present.
    escrow_chain_ids: HashMap<String, String>,
    wallets: HashMap<String, UserWallet>,
    tasks: HashMap<String, ScheduledTask>,
    executions: Vec<TaskExecution>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CoreResult<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| CoreError::Storage("store mutex poisoned".into()))
    }

    fn owner_key(owner: &PolicyOwner) -> String {
        owner.to_string()
    }

    /// Number of stored quotes. Handy for asserting refusals persisted
    /// nothing.
    pub fn quote_count(&self) -> usize {
        self.tables.lock().map(|t| t.quotes.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_quote(&self, quote: &Quote) -> CoreResult<()> {
        quote.validate()?;
        let mut tables = self.lock()?;
        if tables.quotes.contains_key(&quote.quote_id) {
            return Err(CoreError::Constraint {
                message: format!("duplicate quote id {}", quote.quote_id),
            });
        }
        if tables.quote_numbers.contains_key(&quote.quote_number) {
            return Err(CoreError::Constraint {
                message: format!("duplicate quote number {}", quote.quote_number),
            });
        }
        tables
            .quote_numbers
            .insert(quote.quote_number.clone(), quote.quote_id.clone());
        tables.quotes.insert(quote.quote_id.clone(), quote.clone());
        Ok(())
    }

    async fn get_quote(&self, quote_id: &str) -> CoreResult<Option<Quote>> {
        Ok(self.lock()?.quotes.get(quote_id).cloned())
    }

    async fn mark_quote_expired(&self, quote_id: &str) -> CoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(quote) = tables.quotes.get_mut(quote_id) {
            if quote.status == QuoteStatus::Pending {
                quote.status = QuoteStatus::Expired;
            }
        }
        Ok(())
    }

    async fn bind_quote_to_policy(&self, policy: Policy) -> CoreResult<(Quote, Policy)> {
        let mut tables = self.lock()?;
        let now = Utc::now();

        let quote = tables.quotes.get(&policy.quote_id).cloned().ok_or_else(|| {
            CoreError::InvalidInput(format!("quote {} does not exist", policy.quote_id))
        })?;
        if quote.status != QuoteStatus::Pending {
            return Err(CoreError::state(format!(
                "quote {} is not purchasable (status {:?})",
                quote.quote_id, quote.status
            )));
        }
        if quote.is_expired(now) {
            // Record the expiry on the way out.
            if let Some(stored) = tables.quotes.get_mut(&policy.quote_id) {
                stored.status = QuoteStatus::Expired;
            }
            return Err(CoreError::QuoteExpired {
                quote_id: quote.quote_id.clone(),
                valid_until: quote.valid_until,
            });
        }
        if tables.quote_bindings.contains_key(&policy.quote_id) {
            return Err(CoreError::Constraint {
                message: format!("quote {} is already bound to a policy", policy.quote_id),
            });
        }
        if tables.policies.contains_key(&policy.policy_id) {
            return Err(CoreError::Constraint {
                message: format!("duplicate policy id {}", policy.policy_id),
            });
        }
        if tables.policy_numbers.contains_key(&policy.policy_number) {
            return Err(CoreError::Constraint {
                message: format!("duplicate policy number {}", policy.policy_number),
            });
        }

        let accepted = {
            let stored = tables
                .quotes
                .get_mut(&policy.quote_id)
                .expect("existence checked above");
            stored.status = QuoteStatus::Accepted;
            stored.clone()
        };
        tables
            .quote_bindings
            .insert(policy.quote_id.clone(), policy.policy_id.clone());
        tables
            .policy_numbers
            .insert(policy.policy_number.clone(), policy.policy_id.clone());
        tables
            .policies
            .insert(policy.policy_id.clone(), policy.clone());
        Ok((accepted, policy))
    }

    async fn get_policy(&self, policy_id: &str) -> CoreResult<Option<Policy>> {
        Ok(self.lock()?.policies.get(policy_id).cloned())
    }

    async fn list_policies_by_status(&self, status: PolicyStatus) -> CoreResult<Vec<Policy>> {
        Ok(self
            .lock()?
            .policies
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }

    async fn update_policy_status(
        &self,
        policy_id: &str,
        to: PolicyStatus,
    ) -> CoreResult<Policy> {
        let mut tables = self.lock()?;
        let policy = tables
            .policies
            .get_mut(policy_id)
            .ok_or_else(|| CoreError::InvalidInput(format!("policy {} not found", policy_id)))?;
        policy.check_transition(to)?;
        policy.status = to;
        Ok(policy.clone())
    }

    async fn set_policy_escrow(
        &self,
        policy_id: &str,
        escrow_internal_id: &str,
    ) -> CoreResult<()> {
        let mut tables = self.lock()?;
        let policy = tables
            .policies
            .get_mut(policy_id)
            .ok_or_else(|| CoreError::InvalidInput(format!("policy {} not found", policy_id)))?;
        policy.escrow_internal_id = Some(escrow_internal_id.to_string());
        Ok(())
    }

    async fn append_event(&self, policy_id: &str, event: PolicyEvent) -> CoreResult<u64> {
        let mut tables = self.lock()?;
        if !tables.policies.contains_key(policy_id) {
            return Err(CoreError::InvalidInput(format!(
                "policy {} not found",
                policy_id
            )));
        }
        let log = tables.events.entry(policy_id.to_string()).or_default();
        log.push(event);
        Ok(log.len() as u64)
    }

    async fn events_for(&self, policy_id: &str) -> CoreResult<Vec<PolicyEvent>> {
        Ok(self
            .lock()?
            .events
            .get(policy_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_escrow(&self, escrow: &Escrow) -> CoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(chain_id) = &escrow.blockchain_id {
            if let Some(existing) = tables.escrow_chain_ids.get(chain_id) {
                if existing != &escrow.internal_id {
                    return Err(CoreError::Constraint {
                        message: format!("blockchain id {} already registered", chain_id),
                    });
                }
            }
            tables
                .escrow_chain_ids
                .insert(chain_id.clone(), escrow.internal_id.clone());
        }
        tables
            .escrows
            .insert(escrow.internal_id.clone(), escrow.clone());
        Ok(())
    }

    async fn get_escrow(&self, internal_id: &str) -> CoreResult<Option<Escrow>> {
        Ok(self.lock()?.escrows.get(internal_id).cloned())
    }

    async fn update_escrow_status(
        &self,
        internal_id: &str,
        to: EscrowStatus,
    ) -> CoreResult<Escrow> {
        let mut tables = self.lock()?;
        let escrow = tables
            .escrows
            .get_mut(internal_id)
            .ok_or_else(|| CoreError::InvalidInput(format!("escrow {} not found", internal_id)))?;
        escrow.check_transition(to)?;
        escrow.status = to;
        Ok(escrow.clone())
    }

    async fn upsert_wallet(&self, wallet: &UserWallet) -> CoreResult<()> {
        let mut tables = self.lock()?;
        tables
            .wallets
            .insert(Self::owner_key(&wallet.owner), wallet.clone());
        Ok(())
    }

    async fn wallet_for_owner(&self, owner: &PolicyOwner) -> CoreResult<Option<UserWallet>> {
        Ok(self.lock()?.wallets.get(&Self::owner_key(owner)).cloned())
    }

    async fn record_task(&self, task: &ScheduledTask) -> CoreResult<()> {
        self.lock()?.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn record_execution(&self, execution: &TaskExecution) -> CoreResult<()> {
        self.lock()?.executions.push(execution.clone());
        Ok(())
    }

    async fn executions_for(&self, task_id: &str) -> CoreResult<Vec<TaskExecution>> {
        Ok(self
            .lock()?
            .executions
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }
}
