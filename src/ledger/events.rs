//! Events emitted by committed transactions
//!
//! Events carry a subset of the written state for off-ledger indexers. They
//! are stored inside each log entry, so replaying the log replays them too.

use serde::{Deserialize, Serialize};

use crate::ledger::identity::Identity;
use crate::signatures::types::EntityType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum LedgerEvent {
    SignatureStored {
        id: u64,
        content_hash: String,
        signer_name: String,
        entity_type: EntityType,
        hospital_id: String,
    },
    SignatureVerified {
        id: u64,
        is_verified: bool,
        confidence_score: u8,
    },
    SignatureAdminChanged {
        previous: Identity,
        new: Identity,
    },
    OrganizationRegistered {
        identity: Identity,
        name: String,
    },
    OrganizationStatusUpdated {
        identity: Identity,
        active: bool,
        can_vote: bool,
        can_propose: bool,
    },
    PolicyProposed {
        id: u64,
        title: String,
        proposer: Identity,
    },
    VoteCast {
        policy_id: u64,
        voter: Identity,
        support: bool,
    },
    PolicyExecuted {
        id: u64,
        approved: bool,
    },
    PolicyAdminChanged {
        previous: Identity,
        new: Identity,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::SignatureStored { .. } => "SignatureStored",
            LedgerEvent::SignatureVerified { .. } => "SignatureVerified",
            LedgerEvent::SignatureAdminChanged { .. } => "SignatureAdminChanged",
            LedgerEvent::OrganizationRegistered { .. } => "OrganizationRegistered",
            LedgerEvent::OrganizationStatusUpdated { .. } => "OrganizationStatusUpdated",
            LedgerEvent::PolicyProposed { .. } => "PolicyProposed",
            LedgerEvent::VoteCast { .. } => "VoteCast",
            LedgerEvent::PolicyExecuted { .. } => "PolicyExecuted",
            LedgerEvent::PolicyAdminChanged { .. } => "PolicyAdminChanged",
        }
    }
}
