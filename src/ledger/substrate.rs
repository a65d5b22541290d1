//! Ledger Substrate
//!
//! Serialises every state-changing call through a single writer task that
//! owns the event log. A call is applied to the contract state, recorded in
//! the log and only then confirmed to the submitter. Reads go straight to
//! the shared state and never wait on the writer. A file-backed ledger is
//! locked for as long as its writer runs; [`Substrate::shutdown`] releases it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::TrustError;
use crate::ledger::clock::Clock;
use crate::ledger::entry::LedgerEntry;
use crate::ledger::events::LedgerEvent;
use crate::ledger::identity::Identity;
use crate::ledger::log::EventLog;
use crate::ledger::transaction::{Call, ContractState, Outcome};
use crate::policy::{TallyResult, VotingParams};

const SUBMISSION_QUEUE: usize = 256;
const COMMITTED_FEED: usize = 1024;

/// Confirmation that a transaction is durably part of the log.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub tx_id: Uuid,
    pub sequence: u64,
    pub entry_hash: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub events: Vec<LedgerEvent>,
}

impl Receipt {
    pub fn signature_id(&self) -> Option<u64> {
        match self.outcome {
            Outcome::SignatureStored { id } => Some(id),
            _ => None,
        }
    }

    pub fn policy_id(&self) -> Option<u64> {
        match self.outcome {
            Outcome::PolicyProposed { id } => Some(id),
            _ => None,
        }
    }

    pub fn tally(&self) -> Option<TallyResult> {
        match self.outcome {
            Outcome::PolicyExecuted { tally } => Some(tally),
            _ => None,
        }
    }
}

/// A submitted transaction whose outcome is not yet known.
#[derive(Debug)]
pub struct PendingTransaction {
    tx_id: Uuid,
    reply: oneshot::Receiver<Result<Receipt, TrustError>>,
}

impl PendingTransaction {
    pub fn tx_id(&self) -> Uuid {
        self.tx_id
    }

    /// Wait until the transaction is committed or rejected.
    pub async fn confirmed(self) -> Result<Receipt, TrustError> {
        self.reply.await.map_err(|_| {
            TrustError::Storage(format!(
                "ledger writer stopped before transaction {} completed",
                self.tx_id
            ))
        })?
    }
}

enum Command {
    Submit {
        tx_id: Uuid,
        caller: Identity,
        call: Call,
        reply: oneshot::Sender<Result<Receipt, TrustError>>,
    },
    History {
        reply: oneshot::Sender<Result<Vec<LedgerEntry>, TrustError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct Substrate {
    state: Arc<RwLock<ContractState>>,
    commands: mpsc::Sender<Command>,
    committed: broadcast::Sender<LedgerEntry>,
    clock: Arc<dyn Clock>,
}

impl Substrate {
    /// Open a file-backed ledger. An empty log is initialised with a genesis
    /// entry naming `admin` and `params`; an existing log is replayed and its
    /// recorded genesis wins.
    pub async fn open(
        path: impl AsRef<Path>,
        admin: Identity,
        params: VotingParams,
        sync_writes: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TrustError> {
        let (log, existing) = EventLog::open(path.as_ref(), sync_writes)?;
        if existing.is_empty() {
            info!("Initialising new ledger at {:?}", path.as_ref());
        }
        Self::resume(log, existing, admin, params, clock)
    }

    fn resume(
        log: EventLog,
        existing: Vec<LedgerEntry>,
        admin: Identity,
        params: VotingParams,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TrustError> {
        if existing.is_empty() {
            return Self::start_fresh(log, admin, params, clock);
        }

        let state = ContractState::replay(&existing)?;
        if state.signatures.admin() != &admin {
            warn!(
                "Configured admin {} differs from recorded admin {}; using the recorded one",
                admin,
                state.signatures.admin()
            );
        }
        info!(
            "Replayed {} ledger entries ({} signatures, {} policies)",
            existing.len(),
            state.signatures.total_signatures(),
            state.policies.total_policies()
        );
        Ok(Self::spawn(log, state, clock))
    }

    /// Volatile ledger for tests and dry runs.
    pub async fn in_memory(
        admin: Identity,
        params: VotingParams,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TrustError> {
        Self::start_fresh(EventLog::in_memory(), admin, params, clock)
    }

    fn start_fresh(
        mut log: EventLog,
        admin: Identity,
        params: VotingParams,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TrustError> {
        params.validate()?;

        let genesis = LedgerEntry::new(
            log.next_sequence(),
            Uuid::new_v4(),
            clock.now(),
            admin.clone(),
            Call::Genesis {
                admin: admin.clone(),
                params,
            },
            vec![],
            log.head_hash().to_string(),
        );
        log.append(&genesis)?;

        let state = ContractState::genesis(admin, params);
        Ok(Self::spawn(log, state, clock))
    }

    fn spawn(log: EventLog, state: ContractState, clock: Arc<dyn Clock>) -> Self {
        let state = Arc::new(RwLock::new(state));
        let (commands, receiver) = mpsc::channel(SUBMISSION_QUEUE);
        let (committed, _) = broadcast::channel(COMMITTED_FEED);

        let writer = Writer {
            log,
            state: state.clone(),
            committed: committed.clone(),
            clock: clock.clone(),
            halted: false,
        };
        tokio::spawn(writer.run(receiver));

        Self {
            state,
            commands,
            committed,
            clock,
        }
    }

    /// Queue a call for execution as `caller`.
    pub async fn submit(&self, caller: Identity, call: Call) -> Result<PendingTransaction, TrustError> {
        let tx_id = Uuid::new_v4();
        let (reply, receiver) = oneshot::channel();

        debug!("Submitting {} {} from {}", call.name(), tx_id, caller);
        self.commands
            .send(Command::Submit {
                tx_id,
                caller,
                call,
                reply,
            })
            .await
            .map_err(|_| TrustError::Storage("ledger writer is not running".to_string()))?;

        Ok(PendingTransaction {
            tx_id,
            reply: receiver,
        })
    }

    /// Run a read against the current committed state.
    pub async fn read<R>(&self, f: impl FnOnce(&ContractState) -> R) -> R {
        let state = self.state.read().await;
        f(&state)
    }

    /// Feed of entries as they are committed.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEntry> {
        self.committed.subscribe()
    }

    /// Every committed entry, genesis first.
    pub async fn history(&self) -> Result<Vec<LedgerEntry>, TrustError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::History { reply })
            .await
            .map_err(|_| TrustError::Storage("ledger writer is not running".to_string()))?;
        receiver
            .await
            .map_err(|_| TrustError::Storage("ledger writer stopped".to_string()))?
    }

    /// Stop the writer once queued calls are done and release the log.
    /// Later submissions on any clone fail.
    pub async fn shutdown(&self) -> Result<(), TrustError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| TrustError::Storage("ledger writer is not running".to_string()))?;
        receiver
            .await
            .map_err(|_| TrustError::Storage("ledger writer stopped".to_string()))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

struct Writer {
    log: EventLog,
    state: Arc<RwLock<ContractState>>,
    committed: broadcast::Sender<LedgerEntry>,
    clock: Arc<dyn Clock>,
    halted: bool,
}

impl Writer {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        let mut stopped = None;
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Submit {
                    tx_id,
                    caller,
                    call,
                    reply,
                } => {
                    let result = self.execute(tx_id, caller, call).await;
                    // Submitter may have dropped its handle; the commit stands.
                    let _ = reply.send(result);
                }
                Command::History { reply } => {
                    let _ = reply.send(self.log.entries());
                }
                Command::Shutdown { reply } => {
                    stopped = Some(reply);
                    break;
                }
            }
        }
        receiver.close();
        drop(self);
        debug!("Ledger writer stopped");
        if let Some(reply) = stopped {
            let _ = reply.send(());
        }
    }

    /// Timestamps never run backwards, whatever the clock says.
    fn timestamp(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        match self.log.last_timestamp() {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    async fn execute(&mut self, tx_id: Uuid, caller: Identity, call: Call) -> Result<Receipt, TrustError> {
        if self.halted {
            return Err(TrustError::Storage(
                "ledger halted after an unrecoverable write failure".to_string(),
            ));
        }

        let now = self.timestamp();
        let mut state = self.state.write().await;

        let (outcome, events) = match state.apply(&caller, &call, now) {
            Ok(applied) => applied,
            Err(e) => {
                debug!("Rejected {} {} from {}: {}", call.name(), tx_id, caller, e);
                return Err(e);
            }
        };

        let entry = LedgerEntry::new(
            self.log.next_sequence(),
            tx_id,
            now,
            caller,
            call,
            events,
            self.log.head_hash().to_string(),
        );

        if let Err(e) = self.log.append(&entry) {
            error!("Failed to commit {}: {}", entry.summary(), e);
            match self.log.entries().and_then(|entries| ContractState::replay(&entries)) {
                Ok(rebuilt) => *state = rebuilt,
                Err(rebuild_err) => {
                    error!("Could not rebuild ledger state, halting writes: {}", rebuild_err);
                    self.halted = true;
                }
            }
            return Err(e);
        }
        drop(state);

        info!("Committed {}", entry.summary());
        let receipt = Receipt {
            tx_id,
            sequence: entry.sequence,
            entry_hash: entry.this_hash.clone(),
            timestamp: entry.timestamp,
            outcome,
            events: entry.events.clone(),
        };
        let _ = self.committed.send(entry);

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::clock::ManualClock;
    use crate::policy::PolicyProposal;
    use crate::signatures::{EntityType, NewSignature, SignerType};
    use chrono::Duration;
    use tempfile::tempdir;

    fn identity(n: u64) -> Identity {
        format!("0x{:040x}", n).parse().unwrap()
    }

    fn signature(content_hash: &str) -> Call {
        Call::StoreSignature(NewSignature {
            content_hash: content_hash.to_string(),
            signer_name: "Ravi Kumar".to_string(),
            signer_type: SignerType::SelfSigned,
            guardian_name: String::new(),
            guardian_relation: String::new(),
            entity_type: EntityType::Donor,
            entity_id: 7,
            hospital_id: "kem-mumbai".to_string(),
            is_verified: true,
            confidence_score: 90,
        })
    }

    fn register(n: u64) -> Call {
        Call::RegisterOrganization {
            identity: identity(n),
            name: format!("Hospital {}", n),
            org_type: "HOSPITAL".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rejected_call_is_not_logged() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let substrate = Substrate::in_memory(identity(1), VotingParams::default(), clock)
            .await
            .unwrap();

        let pending = substrate
            .submit(
                identity(2),
                Call::ChangeSignatureAdmin {
                    new_admin: identity(2),
                },
            )
            .await
            .unwrap();
        let result = pending.confirmed().await;
        assert!(matches!(result, Err(TrustError::Authorization(_))));

        let history = substrate.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_genesis());
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let admin = identity(1);
        let substrate = Substrate::in_memory(admin.clone(), VotingParams::default(), clock.clone())
            .await
            .unwrap();

        let register = Call::RegisterOrganization {
            identity: identity(2),
            name: "AIIMS Delhi".to_string(),
            org_type: "HOSPITAL".to_string(),
        };
        substrate
            .submit(admin.clone(), register)
            .await
            .unwrap()
            .confirmed()
            .await
            .unwrap();

        clock.set(start - Duration::hours(1));
        let receipt = substrate
            .submit(
                identity(2),
                Call::ProposePolicy(PolicyProposal {
                    title: "Kidney priority".to_string(),
                    description: "Pediatric first".to_string(),
                    organ_type: "KIDNEY".to_string(),
                    data: "{}".to_string(),
                }),
            )
            .await
            .unwrap()
            .confirmed()
            .await
            .unwrap();

        assert_eq!(receipt.timestamp, start);
        assert_eq!(receipt.policy_id(), Some(1));
    }

    #[tokio::test]
    async fn test_subscribers_see_commits() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let admin = identity(1);
        let substrate = Substrate::in_memory(admin.clone(), VotingParams::default(), clock)
            .await
            .unwrap();
        let mut feed = substrate.subscribe();

        let receipt = substrate
            .submit(
                admin.clone(),
                Call::ChangePolicyAdmin {
                    new_admin: identity(9),
                },
            )
            .await
            .unwrap()
            .confirmed()
            .await
            .unwrap();

        let entry = feed.recv().await.unwrap();
        assert_eq!(entry.sequence, receipt.sequence);
        assert_eq!(entry.this_hash, receipt.entry_hash);
        assert_eq!(
            substrate.read(|s| s.policies.admin().clone()).await,
            identity(9)
        );
    }

    #[tokio::test]
    async fn test_failed_append_rolls_back_state() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let admin = identity(1);
        // genesis is 0, the registration 1, so the first signature hits 2
        let substrate = Substrate::start_fresh(
            EventLog::flaky(2),
            admin.clone(),
            VotingParams::default(),
            clock,
        )
        .unwrap();

        substrate
            .submit(admin.clone(), register(2))
            .await
            .unwrap()
            .confirmed()
            .await
            .unwrap();

        let failed = substrate
            .submit(admin.clone(), signature("QmLost"))
            .await
            .unwrap()
            .confirmed()
            .await;
        assert!(matches!(failed, Err(TrustError::Storage(_))));
        assert_eq!(substrate.read(|s| s.signatures.total_signatures()).await, 0);
        assert_eq!(substrate.read(|s| s.policies.total_organizations()).await, 1);
        assert_eq!(substrate.history().await.unwrap().len(), 2);

        let receipt = substrate
            .submit(admin.clone(), signature("QmKept"))
            .await
            .unwrap()
            .confirmed()
            .await
            .unwrap();
        assert_eq!(receipt.signature_id(), Some(1));
        assert_eq!(receipt.sequence, 2);
        assert_eq!(
            substrate
                .read(|s| s.signatures.get_signature(1).map(|r| r.content_hash.clone()))
                .await
                .unwrap(),
            "QmKept"
        );
    }

    #[tokio::test]
    async fn test_failed_file_append_rebuilds_from_disk() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("ledger.jsonl");
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let admin = identity(1);

        let substrate = Substrate::open(&log_path, admin.clone(), VotingParams::default(), false, clock.clone())
            .await
            .unwrap();
        substrate
            .submit(admin.clone(), register(2))
            .await
            .unwrap()
            .confirmed()
            .await
            .unwrap();
        substrate.shutdown().await.unwrap();

        let (log, existing) = EventLog::open_read_only(&log_path).unwrap();
        let substrate =
            Substrate::resume(log, existing, admin.clone(), VotingParams::default(), clock.clone()).unwrap();
        let failed = substrate
            .submit(admin.clone(), signature("QmLost"))
            .await
            .unwrap()
            .confirmed()
            .await;
        assert!(matches!(failed, Err(TrustError::Storage(_))));
        assert_eq!(substrate.read(|s| s.signatures.total_signatures()).await, 0);
        assert_eq!(substrate.read(|s| s.policies.total_organizations()).await, 1);
        substrate.shutdown().await.unwrap();

        let substrate = Substrate::open(&log_path, admin.clone(), VotingParams::default(), false, clock)
            .await
            .unwrap();
        let receipt = substrate
            .submit(admin, signature("QmKept"))
            .await
            .unwrap()
            .confirmed()
            .await
            .unwrap();
        assert_eq!(receipt.signature_id(), Some(1));
        assert_eq!(receipt.sequence, 2);
    }

    #[tokio::test]
    async fn test_second_writer_is_refused_until_shutdown() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("ledger.jsonl");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let admin = identity(1);

        let first = Substrate::open(&log_path, admin.clone(), VotingParams::default(), false, clock.clone())
            .await
            .unwrap();
        let second = Substrate::open(&log_path, admin.clone(), VotingParams::default(), false, clock.clone()).await;
        assert!(matches!(second, Err(TrustError::Storage(_))));

        let receipt = first
            .submit(admin.clone(), signature("QmOnly"))
            .await
            .unwrap()
            .confirmed()
            .await
            .unwrap();
        assert_eq!(receipt.signature_id(), Some(1));

        first.shutdown().await.unwrap();
        assert!(first.submit(admin.clone(), signature("QmLate")).await.is_err());

        let reopened = Substrate::open(&log_path, admin, VotingParams::default(), false, clock)
            .await
            .unwrap();
        assert_eq!(reopened.read(|s| s.signatures.total_signatures()).await, 1);
        assert_eq!(reopened.history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_voting_period_refused() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let params = VotingParams {
            approval_threshold: 51,
            voting_period_secs: 1_000_000_000_000_000,
        };
        let result = Substrate::in_memory(identity(1), params, clock).await;
        assert!(matches!(result, Err(TrustError::Validation(_))));
    }
}
