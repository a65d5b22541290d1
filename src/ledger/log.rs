//! Ledger Event Log
//!
//! Append-only JSONL file of [`LedgerEntry`] values, one per line. The log
//! refuses any entry that does not extend the current head of the hash
//! chain, and a failed write is rolled back to the previous file length so
//! the file only ever holds whole, committed entries. An open log holds an
//! exclusive lock on its file, so a second writer fails to open it.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::error::TrustError;
use crate::ledger::entry::{LedgerEntry, GENESIS_HASH};

enum Sink {
    File { path: PathBuf, file: File },
    Memory(Vec<LedgerEntry>),
    #[cfg(test)]
    Flaky {
        entries: Vec<LedgerEntry>,
        fail_sequence: Option<u64>,
    },
}

pub struct EventLog {
    sink: Sink,
    head_hash: String,
    next_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
    sync_writes: bool,
}

impl EventLog {
    /// Open (or create) a file-backed log and return it with its existing
    /// entries. The chain is checked while loading.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<(Self, Vec<LedgerEntry>), TrustError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TrustError::Storage(format!("Failed to create log directory: {}", e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrustError::Storage(format!("Failed to open ledger log: {}", e)))?;

        Self::from_locked_file(path, file, sync_writes)
    }

    fn from_locked_file(
        path: PathBuf,
        file: File,
        sync_writes: bool,
    ) -> Result<(Self, Vec<LedgerEntry>), TrustError> {
        file.try_lock_exclusive().map_err(|e| {
            TrustError::Storage(format!(
                "Ledger log {:?} is held by another writer: {}",
                path, e
            ))
        })?;

        let entries = load_ledger_log(&path)?;

        let mut log = Self {
            sink: Sink::File { path, file },
            head_hash: GENESIS_HASH.to_string(),
            next_sequence: 0,
            last_timestamp: None,
            sync_writes,
        };
        for entry in &entries {
            log.check_extends_head(entry)?;
            log.advance(entry);
        }

        info!("Loaded {} existing ledger entries", entries.len());
        Ok((log, entries))
    }

    pub fn in_memory() -> Self {
        Self {
            sink: Sink::Memory(Vec::new()),
            head_hash: GENESIS_HASH.to_string(),
            next_sequence: 0,
            last_timestamp: None,
            sync_writes: false,
        }
    }

    /// Memory log whose write of `fail_sequence` fails once.
    #[cfg(test)]
    pub(crate) fn flaky(fail_sequence: u64) -> Self {
        Self {
            sink: Sink::Flaky {
                entries: Vec::new(),
                fail_sequence: Some(fail_sequence),
            },
            head_hash: GENESIS_HASH.to_string(),
            next_sequence: 0,
            last_timestamp: None,
            sync_writes: false,
        }
    }

    /// File log opened without write access, so every append fails.
    #[cfg(test)]
    pub(crate) fn open_read_only(path: impl AsRef<Path>) -> Result<(Self, Vec<LedgerEntry>), TrustError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Self::from_locked_file(path, file, false)
    }

    pub fn head_hash(&self) -> &str {
        &self.head_hash
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn entry_count(&self) -> u64 {
        self.next_sequence
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    fn check_extends_head(&self, entry: &LedgerEntry) -> Result<(), TrustError> {
        if !entry.verify_hash() {
            return Err(TrustError::Storage(format!(
                "Invalid hash in entry {}",
                entry.sequence
            )));
        }
        if entry.sequence != self.next_sequence {
            return Err(TrustError::Storage(format!(
                "Expected sequence {}, got {}",
                self.next_sequence, entry.sequence
            )));
        }
        if entry.previous_hash != self.head_hash {
            return Err(TrustError::Storage(format!(
                "Hash chain broken at entry {}",
                entry.sequence
            )));
        }
        if let Some(last) = self.last_timestamp {
            if entry.timestamp < last {
                return Err(TrustError::Storage(format!(
                    "Non-monotonic timestamp at entry {}",
                    entry.sequence
                )));
            }
        }
        Ok(())
    }

    fn advance(&mut self, entry: &LedgerEntry) {
        self.head_hash = entry.this_hash.clone();
        self.next_sequence = entry.sequence + 1;
        self.last_timestamp = Some(entry.timestamp);
    }

    /// Append an entry. Returns only once the line is written and flushed
    /// (and synced to disk when `sync_writes` is set).
    pub fn append(&mut self, entry: &LedgerEntry) -> Result<(), TrustError> {
        self.check_extends_head(entry)?;

        match &mut self.sink {
            Sink::File { path, file } => {
                let json = serde_json::to_string(entry)?;
                let committed_len = file.metadata()?.len();

                let written = writeln!(file, "{}", json)
                    .and_then(|_| file.flush())
                    .and_then(|_| {
                        if self.sync_writes {
                            file.sync_data()
                        } else {
                            Ok(())
                        }
                    });

                if let Err(e) = written {
                    error!("Failed to append to ledger log {:?}: {}", path, e);
                    if let Err(truncate_err) = file.set_len(committed_len) {
                        error!("Failed to roll back partial ledger write: {}", truncate_err);
                    }
                    return Err(TrustError::Storage(format!(
                        "Failed to write ledger entry {}: {}",
                        entry.sequence, e
                    )));
                }
            }
            Sink::Memory(entries) => entries.push(entry.clone()),
            #[cfg(test)]
            Sink::Flaky {
                entries,
                fail_sequence,
            } => {
                if *fail_sequence == Some(entry.sequence) {
                    *fail_sequence = None;
                    return Err(TrustError::Storage(format!(
                        "Failed to write ledger entry {}: disk full",
                        entry.sequence
                    )));
                }
                entries.push(entry.clone());
            }
        }

        self.advance(entry);
        debug!("Appended ledger entry: {}", entry.summary());
        Ok(())
    }

    /// All committed entries, in order.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, TrustError> {
        match &self.sink {
            Sink::File { path, .. } => load_ledger_log(path),
            Sink::Memory(entries) => Ok(entries.clone()),
            #[cfg(test)]
            Sink::Flaky { entries, .. } => Ok(entries.clone()),
        }
    }
}

/// Parse every entry of a JSONL ledger log without checking the chain.
pub fn load_ledger_log(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>, TrustError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| TrustError::Storage(format!("Failed to open ledger log {:?}: {}", path, e)))?;

    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            TrustError::Storage(format!("Failed to read line {}: {}", line_num + 1, e))
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let entry: LedgerEntry = serde_json::from_str(&line).map_err(|e| {
            TrustError::Storage(format!("Failed to parse entry at line {}: {}", line_num + 1, e))
        })?;
        entries.push(entry);
    }

    debug!("Loaded {} entries from {:?}", entries.len(), path);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::identity::Identity;
    use crate::ledger::transaction::Call;
    use crate::policy::VotingParams;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn admin() -> Identity {
        "0x00000000000000000000000000000000000000aa".parse().unwrap()
    }

    fn entry_after(log: &EventLog, call: Call) -> LedgerEntry {
        LedgerEntry::new(
            log.next_sequence(),
            Uuid::new_v4(),
            Utc::now(),
            admin(),
            call,
            vec![],
            log.head_hash().to_string(),
        )
    }

    fn genesis_call() -> Call {
        Call::Genesis {
            admin: admin(),
            params: VotingParams::default(),
        }
    }

    #[test]
    fn test_append_and_reload() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("ledger").join("log.jsonl");

        {
            let (mut log, existing) = EventLog::open(&log_path, true).unwrap();
            assert!(existing.is_empty());

            let genesis = entry_after(&log, genesis_call());
            log.append(&genesis).unwrap();
            let next = entry_after(&log, Call::ExecutePolicy { policy_id: 1 });
            log.append(&next).unwrap();
            assert_eq!(log.entry_count(), 2);
        }

        let (log, existing) = EventLog::open(&log_path, false).unwrap();
        assert_eq!(existing.len(), 2);
        assert_eq!(log.next_sequence(), 2);
        assert_eq!(log.head_hash(), existing[1].this_hash);
    }

    #[test]
    fn test_rejects_entry_not_extending_head() {
        let mut log = EventLog::in_memory();
        let genesis = entry_after(&log, genesis_call());
        log.append(&genesis).unwrap();

        let stale = LedgerEntry::new(
            1,
            Uuid::new_v4(),
            Utc::now(),
            admin(),
            Call::ExecutePolicy { policy_id: 1 },
            vec![],
            GENESIS_HASH.to_string(),
        );
        assert!(log.append(&stale).is_err());
        assert_eq!(log.entry_count(), 1);
        assert_eq!(log.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_reload_detects_tampering() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("log.jsonl");

        {
            let (mut log, _) = EventLog::open(&log_path, false).unwrap();
            let genesis = entry_after(&log, genesis_call());
            log.append(&genesis).unwrap();
        }

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let tampered = contents.replace(
            "0x00000000000000000000000000000000000000aa",
            "0x00000000000000000000000000000000000000bb",
        );
        std::fs::write(&log_path, tampered).unwrap();

        assert!(EventLog::open(&log_path, false).is_err());
    }

    #[test]
    fn test_second_writer_cannot_open() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("log.jsonl");

        let (mut first, _) = EventLog::open(&log_path, false).unwrap();
        let genesis = entry_after(&first, genesis_call());
        first.append(&genesis).unwrap();

        let second = EventLog::open(&log_path, false);
        assert!(matches!(second, Err(TrustError::Storage(_))));

        drop(first);
        let (reopened, existing) = EventLog::open(&log_path, false).unwrap();
        assert_eq!(existing.len(), 1);
        assert_eq!(reopened.next_sequence(), 1);
    }

    #[test]
    fn test_failed_write_leaves_log_untouched() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("log.jsonl");
        {
            let (mut log, _) = EventLog::open(&log_path, false).unwrap();
            let genesis = entry_after(&log, genesis_call());
            log.append(&genesis).unwrap();
        }
        let before = std::fs::read_to_string(&log_path).unwrap();

        let (mut log, existing) = EventLog::open_read_only(&log_path).unwrap();
        let head = log.head_hash().to_string();
        let next = entry_after(&log, Call::ExecutePolicy { policy_id: 1 });

        assert!(matches!(log.append(&next), Err(TrustError::Storage(_))));
        assert_eq!(log.next_sequence(), 1);
        assert_eq!(log.head_hash(), head);
        assert_eq!(log.entries().unwrap(), existing);
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), before);
    }

    #[test]
    fn test_flaky_log_fails_once() {
        let mut log = EventLog::flaky(1);
        let genesis = entry_after(&log, genesis_call());
        log.append(&genesis).unwrap();

        let next = entry_after(&log, Call::ExecutePolicy { policy_id: 1 });
        assert!(log.append(&next).is_err());
        assert_eq!(log.entry_count(), 1);
        log.append(&next).unwrap();
        assert_eq!(log.entry_count(), 2);
    }
}
