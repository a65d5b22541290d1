//! Ledger Log Entry
//!
//! One committed transaction in the append-only log, linked to its
//! predecessor by a SHA-256 hash chain.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::ledger::events::LedgerEvent;
use crate::ledger::identity::Identity;
use crate::ledger::transaction::Call;

/// `previous_hash` of the genesis entry
pub const GENESIS_HASH: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub tx_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub caller: Identity,
    pub call: Call,
    pub events: Vec<LedgerEvent>,
    pub previous_hash: String,
    pub this_hash: String,
}

/// Everything covered by the entry hash, in a fixed field order.
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    sequence: u64,
    tx_id: &'a Uuid,
    timestamp: String,
    caller: &'a Identity,
    call: &'a Call,
    events: &'a [LedgerEvent],
    previous_hash: &'a str,
}

impl LedgerEntry {
    pub fn new(
        sequence: u64,
        tx_id: Uuid,
        timestamp: DateTime<Utc>,
        caller: Identity,
        call: Call,
        events: Vec<LedgerEvent>,
        previous_hash: String,
    ) -> Self {
        let mut entry = Self {
            sequence,
            tx_id,
            timestamp,
            caller,
            call,
            events,
            previous_hash,
            this_hash: String::new(),
        };
        entry.this_hash = entry.calculate_hash();
        entry
    }

    pub fn canonical_string(&self) -> String {
        let canonical = CanonicalEntry {
            sequence: self.sequence,
            tx_id: &self.tx_id,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            caller: &self.caller,
            call: &self.call,
            events: &self.events,
            previous_hash: &self.previous_hash,
        };
        // Plain structs and enums only; serialization cannot fail.
        serde_json::to_string(&canonical).unwrap_or_default()
    }

    pub fn calculate_hash(&self) -> String {
        let hash = Sha256::digest(self.canonical_string().as_bytes());
        format!("sha256:{}", hex::encode(hash))
    }

    pub fn verify_hash(&self) -> bool {
        self.this_hash == self.calculate_hash()
    }

    pub fn is_genesis(&self) -> bool {
        matches!(self.call, Call::Genesis { .. })
    }

    pub fn summary(&self) -> String {
        format!(
            "#{} {} by {} ({} events)",
            self.sequence,
            self.call.name(),
            self.caller,
            self.events.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::VotingParams;

    fn genesis() -> LedgerEntry {
        let admin: Identity = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        LedgerEntry::new(
            0,
            Uuid::new_v4(),
            Utc::now(),
            admin.clone(),
            Call::Genesis {
                admin,
                params: VotingParams::default(),
            },
            vec![],
            GENESIS_HASH.to_string(),
        )
    }

    #[test]
    fn test_hash_format() {
        let entry = genesis();
        assert!(entry.this_hash.starts_with("sha256:"));
        assert_eq!(entry.this_hash.len(), 71);
        assert!(entry.verify_hash());
        assert!(entry.is_genesis());
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let entry = genesis();
        let line = serde_json::to_string(&entry).unwrap();
        let parsed: LedgerEntry = serde_json::from_str(&line).unwrap();
        assert!(parsed.verify_hash());
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_tampering_breaks_hash() {
        let mut entry = genesis();
        entry.caller = "0x00000000000000000000000000000000000000bb".parse().unwrap();
        assert!(!entry.verify_hash());
    }
}
