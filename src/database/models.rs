use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSignature {
    pub id: u64,
    pub content_hash: String,
    pub signer_name: String,
    pub signer_type: String,
    pub guardian_name: String,
    pub guardian_relation: String,
    pub entity_type: String,
    pub entity_id: u64,
    pub hospital_id: String,
    pub is_verified: bool,
    pub confidence_score: u8,
    pub anchored_at: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedOrganization {
    pub identity: String,
    pub name: String,
    pub org_type: String,
    pub active: bool,
    pub can_vote: bool,
    pub can_propose: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedPolicy {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub organ_type: String,
    pub proposer: String,
    pub created_at: DateTime<Utc>,
    pub voting_deadline: DateTime<Utc>,
    pub yes_votes: u64,
    pub no_votes: u64,
    /// `open`, `approved` or `rejected`
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedVote {
    pub policy_id: u64,
    pub voter: String,
    pub support: bool,
    pub cast_at: DateTime<Utc>,
}
