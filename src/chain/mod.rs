//! Chain-agnostic escrow and transaction adapter.
//!
//! The rest of the system speaks escrow intents; this module translates them
//! into signed chain transactions, normalises what comes back (including
//! synthesising transaction hashes the chain omits) and parses ledger
//! history into user-facing transactions.

pub mod amount;
pub mod client;
pub mod escrow;
pub mod history;
pub mod types;
