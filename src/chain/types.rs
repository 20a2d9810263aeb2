//! Wire and entity types for the settlement chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Transaction parameter payloads, decoded from the chain's wire form.
///
/// The chain tags each ledger entry with a parameter class name; decoding
/// turns that stringly dispatch into a closed variant set once, at the
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "params_class", rename_all = "snake_case")]
pub enum TxParams {
    Transfer {
        to: String,
        amount_units: u64,
    },
    Faucet {
        amount_units: u64,
    },
    CreateEscrow {
        escrow_id: String,
        fulfiller: String,
        amount_units: u64,
        expires_at: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        verification_key: Option<String>,
    },
    FulfillEscrow {
        escrow_id: String,
    },
    ReleaseEscrow {
        escrow_id: String,
    },
    Unknown,
}

impl TxParams {
    /// The wire-level class names the chain uses.
    pub fn class_name(&self) -> &'static str {
        match self {
            TxParams::Transfer { .. } => "TransferParams",
            TxParams::Faucet { .. } => "FaucetParams",
            TxParams::CreateEscrow { .. } => "CreateEscrowParams",
            TxParams::FulfillEscrow { .. } => "FulfillEscrowParams",
            TxParams::ReleaseEscrow { .. } => "ReleaseEscrowParams",
            TxParams::Unknown => "Unknown",
        }
    }

    /// Decodes a raw `params` object by its `params_class_name` field.
    /// Anything unrecognised (or structurally broken) comes back `Unknown`
    /// rather than failing the whole ledger parse.
    pub fn decode(raw: &Value) -> Self {
        let class = raw["params_class_name"].as_str().unwrap_or("");
        match class {
            "TransferParams" => {
                match (raw["to"].as_str(), raw["amount"].as_u64()) {
                    (Some(to), Some(amount)) => TxParams::Transfer {
                        to: to.to_string(),
                        amount_units: amount,
                    },
                    _ => TxParams::Unknown,
                }
            }
            "FaucetParams" => TxParams::Faucet {
                amount_units: raw["amount"].as_u64().unwrap_or(0),
            },
            "CreateEscrowParams" => {
                match (raw["escrow_id"].as_str(), raw["amount"].as_u64()) {
                    (Some(escrow_id), Some(amount)) => TxParams::CreateEscrow {
                        escrow_id: escrow_id.to_string(),
                        fulfiller: raw["fulfiller"].as_str().unwrap_or("").to_string(),
                        amount_units: amount,
                        expires_at: raw["expires_at"].as_i64().unwrap_or(0),
                        verification_key: raw["verification_key"]
                            .as_str()
                            .map(str::to_string),
                    },
                    _ => TxParams::Unknown,
                }
            }
            "FulfillEscrowParams" => match raw["escrow_id"].as_str() {
                Some(escrow_id) => TxParams::FulfillEscrow {
                    escrow_id: escrow_id.to_string(),
                },
                None => TxParams::Unknown,
            },
            "ReleaseEscrowParams" => match raw["escrow_id"].as_str() {
                Some(escrow_id) => TxParams::ReleaseEscrow {
                    escrow_id: escrow_id.to_string(),
                },
                None => TxParams::Unknown,
            },
            _ => TxParams::Unknown,
        }
    }

    /// Encodes into the chain's wire shape.
    pub fn encode(&self) -> Value {
        let mut value = match self {
            TxParams::Transfer { to, amount_units } => serde_json::json!({
                "to": to,
                "amount": amount_units,
            }),
            TxParams::Faucet { amount_units } => serde_json::json!({
                "amount": amount_units,
            }),
            TxParams::CreateEscrow {
                escrow_id,
                fulfiller,
                amount_units,
                expires_at,
                verification_key,
            } => serde_json::json!({
                "escrow_id": escrow_id,
                "fulfiller": fulfiller,
                "amount": amount_units,
                "expires_at": expires_at,
                "verification_key": verification_key,
            }),
            TxParams::FulfillEscrow { escrow_id } => serde_json::json!({
                "escrow_id": escrow_id,
            }),
            TxParams::ReleaseEscrow { escrow_id } => serde_json::json!({
                "escrow_id": escrow_id,
            }),
            TxParams::Unknown => serde_json::json!({}),
        };
        value["params_class_name"] = Value::String(self.class_name().to_string());
        value
    }
}

/// A transaction as the chain reports it. Every field is optional because
/// the chain is inconsistent about what it includes; hash normalisation
/// papers over the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedTransaction {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub nonce: Option<u64>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub amount_units: Option<u64>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub params: Value,
}

/// Where a normalised transaction hash came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashSource {
    Chain,
    Signature,
    NonceTimestamp,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed,
    Unknown,
}

/// What the adapter hands back for any submission.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionResult {
    /// Normalised hash; `None` only when synthesis found nothing to work
    /// with (the transaction is still surfaced).
    pub hash: Option<String>,
    pub hash_source: HashSource,
    pub status: TxStatus,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    pub balance_units: u64,
    /// Two-decimal rendering of the balance.
    pub balance: String,
    pub nonce: u64,
}

/// A transaction signed outside the adapter (non-custodial flow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub params: Value,
    pub signature: String,
    pub public_key: String,
    pub nonce: u64,
    pub timestamp: i64,
}

/// A prepared, unsigned escrow creation for an external signer.
#[derive(Debug, Clone, Serialize)]
pub struct UnsignedTransaction {
    pub internal_id: String,
    pub params: Value,
    pub nonce: u64,
    pub timestamp: i64,
    /// Hex of the digest the wallet must sign.
    pub signing_payload_hex: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowPurpose {
    Deposit,
    Withdraw,
    Stake,
    Bond,
    Collateral,
    Investment,
    Reserve,
    Pool,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Pending,
    Fulfilled,
    Released,
    Expired,
    Cancelled,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Released | EscrowStatus::Expired | EscrowStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, to: EscrowStatus) -> bool {
        use EscrowStatus::*;
        match (self, to) {
            (Pending, Fulfilled) => true,
            // A creator may release a not-yet-fulfilled escrow (refund path)
            // as well as a fulfilled one.
            (Pending, Released) | (Fulfilled, Released) => true,
            (Pending, Expired) | (Fulfilled, Expired) => true,
            (Pending, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EscrowStatus::Pending => "PENDING",
            EscrowStatus::Fulfilled => "FULFILLED",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Expired => "EXPIRED",
            EscrowStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Generic escrow parameters the engine layer speaks. Adapters translate
/// this into their chain-specific shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowParams {
    /// Minor units (cents).
    pub amount_cents: u64,
    pub expires_at: DateTime<Utc>,
    pub recipient: String,
    pub fulfiller: String,
    pub purpose: EscrowPurpose,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_key: Option<String>,
}

/// The escrow entity as the rest of the system sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    /// Always present, generated by the adapter before submission.
    pub internal_id: String,
    /// Present once the chain acknowledges the escrow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_id: Option<String>,
    pub amount_cents: u64,
    pub expires_at: DateTime<Utc>,
    pub recipient: String,
    pub purpose: EscrowPurpose,
    pub status: EscrowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Escrow {
    pub fn check_transition(&self, to: EscrowStatus) -> CoreResult<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::state(format!(
                "escrow {} cannot move {} -> {}",
                self.internal_id, self.status, to
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_round_trips_every_class() {
        let cases = vec![
            TxParams::Transfer {
                to: "0xabc".into(),
                amount_units: 5_000,
            },
            TxParams::Faucet { amount_units: 100 },
            TxParams::CreateEscrow {
                escrow_id: "0xe1".into(),
                fulfiller: "0xdef".into(),
                amount_units: 50_000,
                expires_at: 1_751_400_000,
                verification_key: None,
            },
            TxParams::FulfillEscrow {
                escrow_id: "0xe1".into(),
            },
            TxParams::ReleaseEscrow {
                escrow_id: "0xe1".into(),
            },
        ];
        for params in cases {
            let decoded = TxParams::decode(&params.encode());
            assert_eq!(decoded, params);
        }
    }

    #[test]
    fn unknown_class_decodes_to_unknown() {
        let raw = json!({"params_class_name": "SomethingNew", "field": 1});
        assert_eq!(TxParams::decode(&raw), TxParams::Unknown);
        let raw = json!({});
        assert_eq!(TxParams::decode(&raw), TxParams::Unknown);
    }

    #[test]
    fn structurally_broken_params_decode_to_unknown() {
        let raw = json!({"params_class_name": "TransferParams", "amount": "not-a-number"});
        assert_eq!(TxParams::decode(&raw), TxParams::Unknown);
    }

    #[test]
    fn escrow_terminal_states_are_absorbing() {
        use EscrowStatus::*;
        for terminal in [Released, Expired, Cancelled] {
            for target in [Pending, Fulfilled, Released, Expired, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
        assert!(Pending.can_transition_to(Fulfilled));
        assert!(Fulfilled.can_transition_to(Released));
        assert!(!Fulfilled.can_transition_to(Cancelled));
    }

    #[test]
    fn processed_transaction_tolerates_sparse_payloads() {
        let tx: ProcessedTransaction = serde_json::from_value(json!({
            "signature": "ab".repeat(32),
            "nonce": 4,
        }))
        .unwrap();
        assert!(tx.hash.is_none());
        assert_eq!(tx.nonce, Some(4));
        assert!(tx.params.is_null());
    }
}
