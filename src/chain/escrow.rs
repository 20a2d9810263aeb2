//! The escrow adapter: engine-level escrow intents in, signed chain
//! transactions out, with response normalisation on the way back.

use chrono::Utc;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::amount;
use super::client::{signing_digest, ChainClient};
use super::history::{paginate, parse_history, ParsedTransaction};
use super::types::{
    AccountInfo, Escrow, EscrowParams, EscrowStatus, HashSource, ProcessedTransaction,
    SignedTransaction, TransactionResult, TxParams, TxStatus, UnsignedTransaction,
};
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::store::Store;

/// Normalises a chain transaction into a durable hash.
///
/// Preference order: the chain's own hash, then `0x<signature>`, then
/// `0x<hex(nonce "-" timestamp)>`. Downstream systems key on this value,
/// not on whatever the chain felt like including.
pub fn normalise_hash(
    tx: &ProcessedTransaction,
    synthesis_enabled: bool,
) -> (Option<String>, HashSource) {
    if let Some(hash) = tx.hash.as_deref() {
        if !hash.is_empty() {
            let hash = if hash.starts_with("0x") {
                hash.to_string()
            } else {
                format!("0x{}", hash)
            };
            return (Some(hash), HashSource::Chain);
        }
    }
    if !synthesis_enabled {
        return (None, HashSource::Unavailable);
    }
    if let Some(signature) = tx.signature.as_deref() {
        if !signature.is_empty() {
            let sig = signature.trim_start_matches("0x");
            return (Some(format!("0x{}", sig)), HashSource::Signature);
        }
    }
    if let (Some(nonce), Some(timestamp)) = (tx.nonce, tx.timestamp) {
        let material = format!("{}-{}", nonce, timestamp);
        return (
            Some(format!("0x{}", hex::encode(material.as_bytes()))),
            HashSource::NonceTimestamp,
        );
    }
    (None, HashSource::Unavailable)
}

fn map_status(tx: &ProcessedTransaction) -> TxStatus {
    match tx.status.as_deref().map(str::to_lowercase).as_deref() {
        Some("confirmed") | Some("success") | Some("executed") => TxStatus::Confirmed,
        Some("failed") | Some("error") | Some("rejected") => TxStatus::Failed,
        Some("pending") | Some("submitted") | None => TxStatus::Submitted,
        Some(_) => TxStatus::Unknown,
    }
}

pub struct EscrowAdapter {
    client: Arc<ChainClient>,
    store: Arc<dyn Store>,
    hash_synthesis_enabled: bool,
    unit_scale: u64,
    /// Transactions this adapter submitted, keyed by normalised hash, so a
    /// synthesised hash still resolves in `get_transaction_status`.
    submitted: Mutex<HashMap<String, ProcessedTransaction>>,
}

impl EscrowAdapter {
    pub fn new(
        client: Arc<ChainClient>,
        store: Arc<dyn Store>,
        hash_synthesis_enabled: bool,
        unit_scale: u64,
    ) -> Self {
        Self {
            client,
            store,
            hash_synthesis_enabled,
            unit_scale,
            submitted: Mutex::new(HashMap::new()),
        }
    }

    fn cents_to_units(&self, cents: u64) -> u64 {
        // Minor units are hundredths; rescale when the chain counts finer.
        cents.saturating_mul(self.unit_scale) / 100
    }

    fn finish(&self, tx: ProcessedTransaction) -> TransactionResult {
        let (hash, hash_source) = normalise_hash(&tx, self.hash_synthesis_enabled);
        if hash.is_none() {
            warn!("chain transaction surfaced without any hash material");
        }
        if let Some(h) = &hash {
            if let Ok(mut submitted) = self.submitted.lock() {
                submitted.insert(h.clone(), tx.clone());
            }
        }
        let status = map_status(&tx);
        let raw = serde_json::to_value(&tx).unwrap_or_default();
        TransactionResult {
            hash,
            hash_source,
            status,
            raw,
        }
    }

    /// Opens an escrow: generates the internal id, signs, submits, persists.
    pub async fn create_escrow(
        &self,
        params: &EscrowParams,
    ) -> CoreResult<(Escrow, TransactionResult)> {
        if params.amount_cents == 0 {
            return Err(CoreError::InvalidInput(
                "escrow amount must be positive".into(),
            ));
        }
        let internal_id = ids::new_internal_id();
        let tx_params = TxParams::CreateEscrow {
            escrow_id: internal_id.clone(),
            fulfiller: params.fulfiller.clone(),
            amount_units: self.cents_to_units(params.amount_cents),
            expires_at: params.expires_at.timestamp(),
            verification_key: params.verification_key.clone(),
        };

        let tx = self
            .client
            .sign_and_post_transaction_from_params(&tx_params)
            .await?;
        let result = self.finish(tx.clone());

        // The chain echoes the escrow id back once it has an object for it.
        let blockchain_id = match TxParams::decode(&tx.params) {
            TxParams::CreateEscrow { escrow_id, .. } => Some(escrow_id),
            _ => None,
        };
        let escrow = Escrow {
            internal_id: internal_id.clone(),
            blockchain_id,
            amount_cents: params.amount_cents,
            expires_at: params.expires_at,
            recipient: params.recipient.clone(),
            purpose: params.purpose,
            status: EscrowStatus::Pending,
            tx_hash: result.hash.clone(),
            block_number: tx.block_number,
            created_at: Utc::now(),
        };
        self.store.upsert_escrow(&escrow).await?;
        info!("escrow {} created ({:?})", internal_id, result.hash);
        Ok((escrow, result))
    }

    pub async fn fulfill_escrow(&self, escrow_id: &str) -> CoreResult<TransactionResult> {
        self.transition_escrow(escrow_id, EscrowStatus::Fulfilled, |id| {
            TxParams::FulfillEscrow {
                escrow_id: id.to_string(),
            }
        })
        .await
    }

    pub async fn release_escrow(&self, escrow_id: &str) -> CoreResult<TransactionResult> {
        self.transition_escrow(escrow_id, EscrowStatus::Released, |id| {
            TxParams::ReleaseEscrow {
                escrow_id: id.to_string(),
            }
        })
        .await
    }

    async fn transition_escrow(
        &self,
        escrow_id: &str,
        to: EscrowStatus,
        build: impl Fn(&str) -> TxParams,
    ) -> CoreResult<TransactionResult> {
        let escrow = self
            .store
            .get_escrow(escrow_id)
            .await?
            .ok_or_else(|| CoreError::InvalidInput(format!("escrow {} not found", escrow_id)))?;
        // Reject before touching the chain; the entity stays unchanged.
        escrow.check_transition(to)?;

        let chain_ref = escrow.blockchain_id.as_deref().unwrap_or(escrow_id);
        let tx = self
            .client
            .sign_and_post_transaction_from_params(&build(chain_ref))
            .await?;
        let result = self.finish(tx);
        self.store.update_escrow_status(escrow_id, to).await?;
        info!("escrow {} -> {}", escrow_id, to);
        Ok(result)
    }

    /// Builds the unsigned escrow-creation object for an external wallet.
    /// The escrow is persisted as pending so the later signed submission
    /// can be linked back.
    pub async fn prepare_create_escrow(
        &self,
        params: &EscrowParams,
        creator_address: &str,
    ) -> CoreResult<UnsignedTransaction> {
        if params.amount_cents == 0 {
            return Err(CoreError::InvalidInput(
                "escrow amount must be positive".into(),
            ));
        }
        let internal_id = ids::new_internal_id();
        let tx_params = TxParams::CreateEscrow {
            escrow_id: internal_id.clone(),
            fulfiller: params.fulfiller.clone(),
            amount_units: self.cents_to_units(params.amount_cents),
            expires_at: params.expires_at.timestamp(),
            verification_key: params.verification_key.clone(),
        };
        let account = self.client.get_account(creator_address).await?;
        let nonce = account.nonce + 1;
        let timestamp = Utc::now().timestamp_millis();
        let encoded = tx_params.encode();
        let digest = signing_digest(&encoded, nonce, timestamp)?;

        let escrow = Escrow {
            internal_id: internal_id.clone(),
            blockchain_id: None,
            amount_cents: params.amount_cents,
            expires_at: params.expires_at,
            recipient: params.recipient.clone(),
            purpose: params.purpose,
            status: EscrowStatus::Pending,
            tx_hash: None,
            block_number: None,
            created_at: Utc::now(),
        };
        self.store.upsert_escrow(&escrow).await?;

        Ok(UnsignedTransaction {
            internal_id,
            params: encoded,
            nonce,
            timestamp,
            signing_payload_hex: hex::encode(digest),
        })
    }

    /// Completes a non-custodial flow: submits the wallet-signed
    /// transaction and links the result back to the prepared escrow.
    pub async fn submit_signed_transaction(
        &self,
        signed: &SignedTransaction,
    ) -> CoreResult<TransactionResult> {
        let tx = self.client.post_transaction(signed).await?;
        let result = self.finish(tx.clone());

        if let TxParams::CreateEscrow { escrow_id, .. } = TxParams::decode(&signed.params) {
            if let Some(mut escrow) = self.store.get_escrow(&escrow_id).await? {
                escrow.blockchain_id = Some(escrow_id.clone());
                escrow.tx_hash = result.hash.clone();
                escrow.block_number = tx.block_number;
                self.store.upsert_escrow(&escrow).await?;
            }
        }
        Ok(result)
    }

    pub async fn get_account_info(&self, address: &str) -> CoreResult<AccountInfo> {
        self.client.get_account(address).await
    }

    /// Resolves a transaction's status by hash. Synthesised hashes the
    /// chain has never heard of resolve from the adapter's own submission
    /// record.
    pub async fn get_transaction_status(&self, hash: &str) -> CoreResult<TxStatus> {
        if let Some(tx) = self.client.get_transaction_by_hash(hash).await? {
            return Ok(map_status(&tx));
        }
        let submitted = self
            .submitted
            .lock()
            .map_err(|_| CoreError::Storage("submission record mutex poisoned".into()))?;
        match submitted.get(hash) {
            Some(tx) => Ok(map_status(tx)),
            None => Ok(TxStatus::Unknown),
        }
    }

    /// A signer's ledger history, parsed and newest-first. Pages are
    /// 1-based.
    pub async fn get_transaction_history(
        &self,
        address: &str,
        page: usize,
        page_size: usize,
    ) -> CoreResult<Vec<ParsedTransaction>> {
        let entries = self.client.get_transactions_by_signer(address).await?;
        let parsed = parse_history(&entries, address, self.unit_scale, self.hash_synthesis_enabled);
        Ok(paginate(&parsed, page, page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(
        hash: Option<&str>,
        signature: Option<&str>,
        nonce: Option<u64>,
        timestamp: Option<i64>,
    ) -> ProcessedTransaction {
        ProcessedTransaction {
            hash: hash.map(str::to_string),
            signature: signature.map(str::to_string),
            nonce,
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn chain_hash_wins_when_present() {
        let (hash, source) = normalise_hash(&tx(Some("0xabc"), Some("sig"), Some(1), Some(2)), true);
        assert_eq!(hash.as_deref(), Some("0xabc"));
        assert_eq!(source, HashSource::Chain);
    }

    #[test]
    fn bare_chain_hash_gains_a_prefix() {
        let (hash, _) = normalise_hash(&tx(Some("abc123"), None, None, None), true);
        assert_eq!(hash.as_deref(), Some("0xabc123"));
    }

    #[test]
    fn signature_synthesis_is_preferred() {
        let sig = "ab".repeat(32);
        let (hash, source) = normalise_hash(&tx(None, Some(&sig), Some(9), Some(1_000)), true);
        assert_eq!(hash.as_deref(), Some(format!("0x{}", sig).as_str()));
        assert_eq!(source, HashSource::Signature);
    }

    #[test]
    fn nonce_timestamp_synthesis_is_the_fallback() {
        let (hash, source) = normalise_hash(&tx(None, None, Some(7), Some(1_751_364_000_000)), true);
        assert_eq!(source, HashSource::NonceTimestamp);
        let expected = format!("0x{}", hex::encode("7-1751364000000".as_bytes()));
        assert_eq!(hash.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn synthesis_is_deterministic() {
        let a = normalise_hash(&tx(None, Some("sig"), Some(7), Some(1_000)), true);
        let b = normalise_hash(&tx(None, Some("sig"), Some(7), Some(1_000)), true);
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn nothing_to_work_with_is_unavailable() {
        let (hash, source) = normalise_hash(&tx(None, None, None, None), true);
        assert!(hash.is_none());
        assert_eq!(source, HashSource::Unavailable);
    }

    #[test]
    fn disabled_synthesis_only_accepts_chain_hashes() {
        let (hash, source) = normalise_hash(&tx(None, Some("sig"), Some(1), Some(2)), false);
        assert!(hash.is_none());
        assert_eq!(source, HashSource::Unavailable);

        let (hash, source) = normalise_hash(&tx(Some("0xreal"), None, None, None), false);
        assert_eq!(hash.as_deref(), Some("0xreal"));
        assert_eq!(source, HashSource::Chain);
    }

    #[test]
    fn status_mapping_is_case_insensitive() {
        let mut t = tx(Some("0xa"), None, None, None);
        t.status = Some("Confirmed".into());
        assert_eq!(map_status(&t), TxStatus::Confirmed);
        t.status = Some("FAILED".into());
        assert_eq!(map_status(&t), TxStatus::Failed);
        t.status = None;
        assert_eq!(map_status(&t), TxStatus::Submitted);
        t.status = Some("weird".into());
        assert_eq!(map_status(&t), TxStatus::Unknown);
    }
}
