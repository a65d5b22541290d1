//! Signature anchoring
//!
//! Append-only record of consent signatures: content address of the
//! encrypted image plus signer details and the verification judgment.

pub mod ledger;
pub mod types;

pub use ledger::SignatureLedger;
pub use types::*;
