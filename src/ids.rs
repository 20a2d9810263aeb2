//! Identifier generation.
//!
//! Internal identifiers are 0x-prefixed hex of random bytes; human-facing
//! reference numbers carry a short prefix and a date stamp.

use chrono::Utc;

/// Random 32-byte internal identifier, `0x`-prefixed.
pub fn new_internal_id() -> String {
    format!("0x{}", hex::encode(rand::random::<[u8; 32]>()))
}

/// Shorter 16-byte identifier for entities that show up in logs a lot.
pub fn new_short_id() -> String {
    format!("0x{}", hex::encode(rand::random::<[u8; 16]>()))
}

/// Human-facing reference number, e.g. `QTE-20250701-4F2A9C`.
pub fn new_reference(prefix: &str) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().format("%Y%m%d"),
        hex::encode(rand::random::<[u8; 3]>()).to_uppercase()
    )
}
