//! Ledger substrate
//!
//! Hash-chained, append-only event log with a single writer. Contract state
//! is a pure function of the log: reopening a ledger replays every entry.

pub mod client;
pub mod clock;
pub mod entry;
pub mod events;
pub mod identity;
pub mod log;
pub mod substrate;
pub mod transaction;
pub mod verify;

pub use client::LedgerClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{LedgerEntry, GENESIS_HASH};
pub use events::LedgerEvent;
pub use identity::Identity;
pub use substrate::{PendingTransaction, Receipt, Substrate};
pub use transaction::{Call, ContractState, Outcome};
