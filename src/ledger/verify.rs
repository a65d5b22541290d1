//! Ledger Log Verification
//!
//! Offline integrity checks over a ledger log: every entry hash, the hash
//! chain back to genesis, dense sequence numbers and monotonic timestamps.

use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::ledger::entry::{LedgerEntry, GENESIS_HASH};
use crate::ledger::log::load_ledger_log;

/// Verify a complete ledger log, failing on the first problem found.
pub fn verify_ledger_log(entries: &[LedgerEntry]) -> Result<()> {
    let first = entries.first().ok_or_else(|| anyhow!("Empty ledger log"))?;
    if !first.is_genesis() {
        return Err(anyhow!("First entry must be genesis"));
    }
    if first.previous_hash != GENESIS_HASH {
        return Err(anyhow!("Genesis entry does not start the hash chain"));
    }

    for entry in entries {
        if !entry.verify_hash() {
            return Err(anyhow!("Invalid hash in entry {}", entry.sequence));
        }
    }

    for (i, entry) in entries.iter().enumerate() {
        if entry.sequence != i as u64 {
            return Err(anyhow!(
                "Sequence gap at position {}: found sequence {}",
                i,
                entry.sequence
            ));
        }
        if i > 0 && entry.is_genesis() {
            return Err(anyhow!("Unexpected second genesis at entry {}", i));
        }
    }

    for pair in entries.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        if curr.previous_hash != prev.this_hash {
            return Err(anyhow!(
                "Hash chain broken at entry {}: expected {}, got {}",
                curr.sequence,
                prev.this_hash,
                curr.previous_hash
            ));
        }
        if curr.timestamp < prev.timestamp {
            return Err(anyhow!(
                "Non-monotonic timestamp at entry {}: {} < {}",
                curr.sequence,
                curr.timestamp,
                prev.timestamp
            ));
        }
    }

    info!("Ledger log verification successful: {} entries", entries.len());
    Ok(())
}

pub fn verify_ledger_log_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    info!("Verifying ledger log file: {:?}", path);

    if !path.exists() {
        return Err(anyhow!("Ledger log file does not exist: {:?}", path));
    }

    let entries = load_ledger_log(path)?;
    verify_ledger_log(&entries)
}

/// Verify a ledger log file and report every check separately.
pub fn verify_ledger_log_detailed(path: impl AsRef<Path>) -> VerificationResult {
    let path = path.as_ref();
    info!("Detailed verification of ledger log file: {:?}", path);

    if !path.exists() {
        return VerificationResult::failed(format!("File does not exist: {:?}", path));
    }

    let entries = match load_ledger_log(path) {
        Ok(entries) => entries,
        Err(e) => return VerificationResult::failed(format!("Failed to load entries: {}", e)),
    };

    verify_entries_detailed(&entries)
}

pub fn verify_entries_detailed(entries: &[LedgerEntry]) -> VerificationResult {
    let mut errors: Vec<String> = Vec::new();

    match entries.first() {
        None => errors.push("Empty ledger log".to_string()),
        Some(first) if !first.is_genesis() => errors.push("First entry must be genesis".to_string()),
        Some(_) => {}
    }

    let tampered = find_tampered_entries(entries);
    if let Some(first_bad) = tampered.first() {
        errors.push(format!("Invalid hash in entry {}", first_bad));
    }

    let mut hash_chain_valid = entries
        .first()
        .map(|e| e.previous_hash == GENESIS_HASH)
        .unwrap_or(false);
    let mut timestamps_monotonic = true;
    let mut sequences_dense = true;

    for (i, entry) in entries.iter().enumerate() {
        if sequences_dense && entry.sequence != i as u64 {
            sequences_dense = false;
            errors.push(format!("Sequence gap at position {}: found {}", i, entry.sequence));
        }
    }

    for pair in entries.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        if hash_chain_valid && curr.previous_hash != prev.this_hash {
            hash_chain_valid = false;
            errors.push(format!("Hash chain broken at entry {}", curr.sequence));
        }
        if timestamps_monotonic && curr.timestamp < prev.timestamp {
            timestamps_monotonic = false;
            errors.push(format!("Non-monotonic timestamp at entry {}", curr.sequence));
        }
    }

    if !errors.is_empty() {
        warn!("Ledger log verification found {} problem(s)", errors.len());
    }

    VerificationResult {
        is_valid: errors.is_empty(),
        entry_count: entries.len(),
        error_message: errors.into_iter().next(),
        hash_chain_valid,
        timestamps_monotonic,
        sequences_dense,
        tampered_entries: tampered,
    }
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub entry_count: usize,
    pub error_message: Option<String>,
    pub hash_chain_valid: bool,
    pub timestamps_monotonic: bool,
    pub sequences_dense: bool,
    pub tampered_entries: Vec<u64>,
}

impl VerificationResult {
    fn failed(message: String) -> Self {
        Self {
            is_valid: false,
            entry_count: 0,
            error_message: Some(message),
            hash_chain_valid: false,
            timestamps_monotonic: false,
            sequences_dense: false,
            tampered_entries: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        if self.is_valid {
            format!("✅ Ledger log is valid ({} entries)", self.entry_count)
        } else {
            format!(
                "❌ Ledger log is invalid ({} entries): {}",
                self.entry_count,
                self.error_message.as_deref().unwrap_or("Unknown error")
            )
        }
    }

    pub fn detailed_status(&self) -> String {
        let tampered = if self.tampered_entries.is_empty() {
            "None".to_string()
        } else {
            self.tampered_entries
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Entries: {}\nHash chain: {}\nSequences: {}\nTimestamps: {}\nTampered entries: {}\nError: {}",
            self.entry_count,
            if self.hash_chain_valid { "✅ Valid" } else { "❌ Invalid" },
            if self.sequences_dense { "✅ Dense" } else { "❌ Gaps" },
            if self.timestamps_monotonic { "✅ Monotonic" } else { "❌ Non-monotonic" },
            tampered,
            self.error_message.as_deref().unwrap_or("None")
        )
    }
}

/// Sequence numbers of entries whose stored hash does not match their content.
pub fn find_tampered_entries(entries: &[LedgerEntry]) -> Vec<u64> {
    entries
        .iter()
        .filter(|entry| !entry.verify_hash())
        .map(|entry| entry.sequence)
        .collect()
}
