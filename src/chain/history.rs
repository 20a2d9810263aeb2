//! Ledger history parsing: raw chain transactions into user-facing entries.

use chrono::{TimeZone, Utc};
use serde::Serialize;

use super::amount;
use super::escrow::normalise_hash;
use super::types::{HashSource, ProcessedTransaction, TxParams};

/// User-facing classification of a ledger entry, from the perspective of
/// the target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsedTxType {
    Send,
    Receive,
    EscrowCreate,
    EscrowFulfill,
    EscrowRelease,
    Faucet,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    pub class_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParsedTransaction {
    pub id: String,
    pub tx_type: ParsedTxType,
    /// Decimal currency string, e.g. `"500.00"`.
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// ISO-8601 UTC timestamp.
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub metadata: TxMetadata,
}

fn iso_date(timestamp_ms: Option<i64>) -> String {
    timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

/// Parses one ledger entry signed by `target`. `None` for entries the
/// classifier cannot place (unknown parameter classes).
pub fn parse_entry(
    entry: &ProcessedTransaction,
    target: &str,
    scale: u64,
    synthesis_enabled: bool,
) -> Option<ParsedTransaction> {
    let params = TxParams::decode(&entry.params);
    let signer = entry.sender.as_deref().unwrap_or(target);
    let signer_is_target = signer == target;

    let (tx_type, tx_amount, from, to, escrow_id) = match &params {
        TxParams::Transfer { to, amount_units } => {
            let tx_type = if signer_is_target {
                ParsedTxType::Send
            } else {
                ParsedTxType::Receive
            };
            (
                tx_type,
                *amount_units,
                Some(signer.to_string()),
                Some(to.clone()),
                None,
            )
        }
        // The signer of a faucet transaction is its receiver: the funds
        // flow from the faucet to the signer, so sender/receiver reverse.
        TxParams::Faucet { amount_units } => (
            ParsedTxType::Faucet,
            *amount_units,
            None,
            Some(signer.to_string()),
            None,
        ),
        TxParams::CreateEscrow {
            escrow_id,
            fulfiller,
            amount_units,
            ..
        } => (
            ParsedTxType::EscrowCreate,
            *amount_units,
            Some(signer.to_string()),
            Some(fulfiller.clone()),
            Some(escrow_id.clone()),
        ),
        // Who funded the escrow is unknown until the original create entry
        // is looked up; that join is the caller's concern.
        TxParams::FulfillEscrow { escrow_id } => (
            ParsedTxType::EscrowFulfill,
            entry.amount_units.unwrap_or(0),
            None,
            Some(signer.to_string()),
            Some(escrow_id.clone()),
        ),
        TxParams::ReleaseEscrow { escrow_id } => (
            ParsedTxType::EscrowRelease,
            entry.amount_units.unwrap_or(0),
            Some(signer.to_string()),
            entry.receiver.clone(),
            Some(escrow_id.clone()),
        ),
        TxParams::Unknown => return None,
    };

    let (hash, _source) = normalise_hash(entry, synthesis_enabled);
    let id = hash
        .clone()
        .unwrap_or_else(|| format!("{}-{}", signer, entry.nonce.unwrap_or(0)));

    Some(ParsedTransaction {
        id,
        tx_type,
        amount: amount::from_units(tx_amount, scale),
        from,
        to,
        date: iso_date(entry.timestamp),
        hash,
        metadata: TxMetadata {
            nonce: entry.nonce,
            class_name: params.class_name().to_string(),
            escrow_id,
        },
    })
}

/// Parses a signer's ledger slice, newest first.
pub fn parse_history(
    entries: &[ProcessedTransaction],
    target: &str,
    scale: u64,
    synthesis_enabled: bool,
) -> Vec<ParsedTransaction> {
    let mut parsed: Vec<(i64, u64, ParsedTransaction)> = entries
        .iter()
        .filter_map(|entry| {
            parse_entry(entry, target, scale, synthesis_enabled)
                .map(|p| (entry.timestamp.unwrap_or(0), entry.nonce.unwrap_or(0), p))
        })
        .collect();
    // Nonce breaks ties for entries landing in the same millisecond.
    parsed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    parsed.into_iter().map(|(_, _, p)| p).collect()
}

/// 1-based pagination over an already-ordered list.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Vec<T> {
    if page == 0 || page_size == 0 {
        return Vec::new();
    }
    items
        .iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .cloned()
        .collect()
}
