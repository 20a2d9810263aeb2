//! Client for the settlement chain's REST surface.
//!
//! The client is explicitly constructed and passed down from the
//! composition root; whether a signer is present is just whether
//! `set_signer_key` has been called. The transport sits behind a trait so
//! tests can run against an in-memory chain.

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::{Keypair, Signer};
use log::{debug, info};
use rand::rngs::OsRng;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::Mutex;

use super::types::{AccountInfo, ProcessedTransaction, SignedTransaction, TxParams};
use crate::chain::amount;
use crate::error::{CoreError, CoreResult};

/// HTTP abstraction over the chain node. `get` answers `None` for 404.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    async fn get(&self, path: &str) -> CoreResult<Option<Value>>;
    async fn post(&self, path: &str, body: &Value) -> CoreResult<Value>;
}

pub struct HttpChainTransport {
    base_url: String,
    client: Client,
}

impl HttpChainTransport {
    pub fn new(base_url: impl Into<String>) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::transport("chain", e))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl ChainTransport for HttpChainTransport {
    async fn get(&self, path: &str) -> CoreResult<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::transport("chain", e))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CoreError::transport(
                "chain",
                format!("GET {} -> HTTP {}", path, response.status()),
            ));
        }
        let body = response
            .json()
            .await
            .map_err(|e| CoreError::transport("chain", e))?;
        Ok(Some(body))
    }

    async fn post(&self, path: &str, body: &Value) -> CoreResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::ChainSubmission {
                message: e.to_string(),
                transient: true,
            })?;
        let status = response.status();
        if !status.is_success() {
            // 5xx is worth retrying; 4xx means the transaction itself is bad.
            return Err(CoreError::ChainSubmission {
                message: format!("POST {} -> HTTP {}", path, status),
                transient: status.is_server_error(),
            });
        }
        response.json().await.map_err(|e| CoreError::ChainSubmission {
            message: e.to_string(),
            transient: false,
        })
    }
}

/// An Ed25519 signer key owned by the client instance.
pub struct SignerKey {
    keypair: Keypair,
}

impl SignerKey {
    /// Decodes a base64-encoded 64-byte keypair (secret || public).
    pub fn from_base64(encoded: &str) -> CoreResult<Self> {
        let bytes = base64::decode(encoded)
            .map_err(|e| CoreError::InvalidInput(format!("bad signer key encoding: {}", e)))?;
        let keypair = Keypair::from_bytes(&bytes)
            .map_err(|e| CoreError::InvalidInput(format!("bad signer key: {}", e)))?;
        Ok(Self { keypair })
    }

    /// Fresh random keypair, for dev and test networks.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            keypair: Keypair::generate(&mut rng),
        }
    }

    pub fn to_base64(&self) -> String {
        base64::encode(self.keypair.to_bytes())
    }

    /// Chain address: 0x-prefixed hex of the public key.
    pub fn address(&self) -> String {
        format!("0x{}", hex::encode(self.keypair.public.as_bytes()))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.as_bytes())
    }

    fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.keypair.sign(payload).to_bytes())
    }
}

/// The digest all parties sign. Kept to BCS-friendly primitives so the
/// byte layout is deterministic.
#[derive(Serialize)]
struct SigningPayload<'a> {
    params_json: &'a str,
    nonce: u64,
    timestamp: i64,
}

/// Computes the 32-byte digest a signer commits to.
pub fn signing_digest(params: &Value, nonce: u64, timestamp: i64) -> CoreResult<Vec<u8>> {
    let params_json = serde_json::to_string(params)
        .map_err(|e| CoreError::InvalidInput(format!("unserialisable params: {}", e)))?;
    let payload = SigningPayload {
        params_json: &params_json,
        nonce,
        timestamp,
    };
    let bytes = bcs::to_bytes(&payload)
        .map_err(|e| CoreError::InvalidInput(format!("payload encoding failed: {}", e)))?;
    Ok(Sha256::digest(&bytes).to_vec())
}

pub struct ChainClient {
    transport: Box<dyn ChainTransport>,
    /// Guards the signer across whole submissions so a key rotation cannot
    /// interleave with an in-flight signed post.
    signer: Mutex<Option<SignerKey>>,
    unit_scale: u64,
}

impl ChainClient {
    pub fn new(transport: Box<dyn ChainTransport>, unit_scale: u64) -> Self {
        Self {
            transport,
            signer: Mutex::new(None),
            unit_scale,
        }
    }

    pub async fn set_signer_key(&self, key: SignerKey) {
        let mut signer = self.signer.lock().await;
        info!("chain signer set to {}", key.address());
        *signer = Some(key);
    }

    pub async fn signer_address(&self) -> Option<String> {
        self.signer.lock().await.as_ref().map(|k| k.address())
    }

    pub async fn get_account(&self, address: &str) -> CoreResult<AccountInfo> {
        let path = format!("/api/v1/accounts/{}", address);
        let body = self.transport.get(&path).await?;
        let account = match body {
            Some(body) => {
                let account = body.get("account").unwrap_or(&body);
                AccountInfo {
                    address: address.to_string(),
                    balance_units: account["balance"].as_u64().unwrap_or(0),
                    balance: amount::from_units(
                        account["balance"].as_u64().unwrap_or(0),
                        self.unit_scale,
                    ),
                    nonce: account["nonce"].as_u64().unwrap_or(0),
                }
            }
            // Unknown addresses are empty accounts, not errors.
            None => AccountInfo {
                address: address.to_string(),
                balance_units: 0,
                balance: amount::from_units(0, self.unit_scale),
                nonce: 0,
            },
        };
        Ok(account)
    }

    /// Builds, signs and submits a transaction in one step. Holds the
    /// signer lock for the duration so `set_signer_key` serialises with it.
    pub async fn sign_and_post_transaction_from_params(
        &self,
        params: &TxParams,
    ) -> CoreResult<ProcessedTransaction> {
        let signer = self.signer.lock().await;
        let key = signer.as_ref().ok_or_else(|| {
            CoreError::InvalidInput("no signer key configured on the chain client".into())
        })?;

        let account = self.get_account(&key.address()).await?;
        let nonce = account.nonce + 1;
        let timestamp = Utc::now().timestamp_millis();
        let encoded = params.encode();
        let digest = signing_digest(&encoded, nonce, timestamp)?;

        let signed = SignedTransaction {
            params: encoded,
            signature: key.sign(&digest),
            public_key: key.public_key_hex(),
            nonce,
            timestamp,
        };
        debug!(
            "submitting {} (nonce {})",
            params.class_name(),
            nonce
        );
        self.submit(&signed).await
    }

    /// Submits an externally-signed transaction.
    pub async fn post_transaction(
        &self,
        signed: &SignedTransaction,
    ) -> CoreResult<ProcessedTransaction> {
        self.submit(signed).await
    }

    async fn submit(&self, signed: &SignedTransaction) -> CoreResult<ProcessedTransaction> {
        let body = serde_json::to_value(signed)
            .map_err(|e| CoreError::InvalidInput(format!("unserialisable transaction: {}", e)))?;
        let response = self.transport.post("/api/v1/transactions", &body).await?;
        Self::parse_transaction(&response).ok_or_else(|| CoreError::ChainSubmission {
            message: "chain response held no transaction".into(),
            transient: false,
        })
    }

    pub async fn get_transaction_by_hash(
        &self,
        hash: &str,
    ) -> CoreResult<Option<ProcessedTransaction>> {
        let path = format!("/api/v1/transactions/hash/{}", hash);
        Ok(self
            .transport
            .get(&path)
            .await?
            .as_ref()
            .and_then(Self::parse_transaction))
    }

    pub async fn get_transactions_by_signer(
        &self,
        address: &str,
    ) -> CoreResult<Vec<ProcessedTransaction>> {
        let path = format!("/api/v1/transactions/signer/{}", address);
        Ok(self
            .transport
            .get(&path)
            .await?
            .map(|body| Self::parse_transaction_list(&body))
            .unwrap_or_default())
    }

    pub async fn get_transactions_by_block(
        &self,
        block_number: u64,
    ) -> CoreResult<Vec<ProcessedTransaction>> {
        let path = format!("/api/v1/blocks/{}/transactions", block_number);
        Ok(self
            .transport
            .get(&path)
            .await?
            .map(|body| Self::parse_transaction_list(&body))
            .unwrap_or_default())
    }

    /// Asks a dev/test network's faucet to fund an address.
    pub async fn request_faucet_funds(
        &self,
        address: &str,
        amount_units: u64,
    ) -> CoreResult<ProcessedTransaction> {
        let body = serde_json::json!({
            "address": address,
            "amount": amount_units,
        });
        let response = self.transport.post("/api/v1/faucet", &body).await?;
        Self::parse_transaction(&response).ok_or_else(|| CoreError::ChainSubmission {
            message: "faucet response held no transaction".into(),
            transient: false,
        })
    }

    /// The chain wraps transactions inconsistently; accept both the bare
    /// object and a `transaction` envelope.
    fn parse_transaction(body: &Value) -> Option<ProcessedTransaction> {
        let tx = body.get("transaction").unwrap_or(body);
        serde_json::from_value(tx.clone()).ok()
    }

    fn parse_transaction_list(body: &Value) -> Vec<ProcessedTransaction> {
        let list = body
            .get("transactions")
            .and_then(Value::as_array)
            .or_else(|| body.as_array());
        list.map(|entries| {
            entries
                .iter()
                .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_keys_round_trip_through_base64() {
        let key = SignerKey::generate();
        let restored = SignerKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.address(), restored.address());
    }

    #[test]
    fn addresses_are_hex_of_the_public_key() {
        let key = SignerKey::generate();
        let address = key.address();
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 2 + 64);
    }

    #[test]
    fn signing_digest_is_deterministic() {
        let params = json!({"params_class_name": "TransferParams", "to": "0xabc", "amount": 5});
        let a = signing_digest(&params, 3, 1_751_364_000_000).unwrap();
        let b = signing_digest(&params, 3, 1_751_364_000_000).unwrap();
        assert_eq!(a, b);
        let c = signing_digest(&params, 4, 1_751_364_000_000).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn parse_transaction_accepts_both_envelopes() {
        let bare = json!({"hash": "0xabc", "nonce": 1});
        let wrapped = json!({"transaction": {"hash": "0xabc", "nonce": 1}});
        assert_eq!(
            ChainClient::parse_transaction(&bare).unwrap().hash,
            Some("0xabc".to_string())
        );
        assert_eq!(
            ChainClient::parse_transaction(&wrapped).unwrap().hash,
            Some("0xabc".to_string())
        );
    }
}
