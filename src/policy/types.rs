//! Policy Registry Types and Data Structures

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TrustError;
use crate::ledger::identity::Identity;

/// Default percentage of eligible voters that must vote yes.
pub const APPROVAL_THRESHOLD: u64 = 51;

/// Default length of the voting window, in seconds (seven days).
pub const VOTING_PERIOD_SECS: i64 = 7 * 24 * 60 * 60;

/// Longest voting window a ledger accepts (ten years).
pub const MAX_VOTING_PERIOD_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Deployment-wide voting constants, fixed when the ledger is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingParams {
    pub approval_threshold: u64,
    pub voting_period_secs: i64,
}

impl Default for VotingParams {
    fn default() -> Self {
        Self {
            approval_threshold: APPROVAL_THRESHOLD,
            voting_period_secs: VOTING_PERIOD_SECS,
        }
    }
}

impl VotingParams {
    pub fn voting_period(&self) -> Result<Duration, TrustError> {
        Duration::try_seconds(self.voting_period_secs).ok_or_else(|| {
            TrustError::Validation(format!(
                "voting period of {} seconds is out of range",
                self.voting_period_secs
            ))
        })
    }

    pub fn validate(&self) -> Result<(), TrustError> {
        if self.approval_threshold > 100 {
            return Err(TrustError::Validation(format!(
                "approval threshold {} exceeds 100 percent",
                self.approval_threshold
            )));
        }
        if self.voting_period_secs <= 0 {
            return Err(TrustError::Validation(format!(
                "voting period must be positive, got {} seconds",
                self.voting_period_secs
            )));
        }
        if self.voting_period_secs > MAX_VOTING_PERIOD_SECS {
            return Err(TrustError::Validation(format!(
                "voting period of {} seconds exceeds the {} second limit",
                self.voting_period_secs, MAX_VOTING_PERIOD_SECS
            )));
        }
        Ok(())
    }
}

/// A registered organization. Deactivation is soft; entries are never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub identity: Identity,
    pub name: String,
    pub org_type: String,
    pub active: bool,
    pub can_vote: bool,
    pub can_propose: bool,
    pub registered_at: DateTime<Utc>,
}

impl Organization {
    pub fn status(&self) -> OrganizationStatus {
        OrganizationStatus {
            active: self.active,
            can_vote: self.can_vote,
            can_propose: self.can_propose,
        }
    }

    /// Counted in threshold math and allowed to vote.
    pub fn is_eligible_voter(&self) -> bool {
        self.active && self.can_vote
    }

    pub fn is_eligible_proposer(&self) -> bool {
        self.active && self.can_propose
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationStatus {
    pub active: bool,
    pub can_vote: bool,
    pub can_propose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PolicyStatus {
    Open,
    Executed { approved: bool },
}

impl PolicyStatus {
    pub fn is_executed(&self) -> bool {
        matches!(self, PolicyStatus::Executed { .. })
    }

    /// Outcome, meaningful only once executed.
    pub fn approved(&self) -> bool {
        matches!(self, PolicyStatus::Executed { approved: true })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Open => "open",
            PolicyStatus::Executed { approved: true } => "approved",
            PolicyStatus::Executed { approved: false } => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub organ_type: String,
    pub data: String,
    pub proposer: Identity,
    pub created_at: DateTime<Utc>,
    pub voting_deadline: DateTime<Utc>,
    pub yes_votes: u64,
    pub no_votes: u64,
    pub status: PolicyStatus,
    pub votes: BTreeMap<Identity, bool>,
}

impl Policy {
    /// Open and strictly before its deadline.
    pub fn is_votable(&self, now: DateTime<Utc>) -> bool {
        self.status == PolicyStatus::Open && now < self.voting_deadline
    }

    pub fn applies_to(&self, organ_type: &str) -> bool {
        self.organ_type.eq_ignore_ascii_case(organ_type)
    }
}

/// Result of a tally at execution time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyResult {
    pub yes_votes: u64,
    pub eligible_voters: u64,
    pub approval_percent: u64,
    pub approved: bool,
}

impl TallyResult {
    /// `yes * 100 / eligible` in integer arithmetic; zero eligible voters
    /// always rejects.
    pub fn compute(yes_votes: u64, eligible_voters: u64, approval_threshold: u64) -> Self {
        if eligible_voters == 0 {
            return Self {
                yes_votes,
                eligible_voters,
                approval_percent: 0,
                approved: false,
            };
        }

        let approval_percent = yes_votes.saturating_mul(100) / eligible_voters;
        Self {
            yes_votes,
            eligible_voters,
            approval_percent,
            approved: approval_percent >= approval_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_boundary() {
        assert!(!TallyResult::compute(1, 2, 51).approved);
        assert!(TallyResult::compute(1, 2, 50).approved);
        assert_eq!(TallyResult::compute(1, 2, 50).approval_percent, 50);
    }

    #[test]
    fn test_tally_truncates_like_integer_division() {
        // 2 of 3 is 66.67%, truncated to 66
        let tally = TallyResult::compute(2, 3, 67);
        assert_eq!(tally.approval_percent, 66);
        assert!(!tally.approved);
    }

    #[test]
    fn test_tally_zero_eligible_never_approves() {
        assert!(!TallyResult::compute(0, 0, 0).approved);
        assert!(!TallyResult::compute(3, 0, 0).approved);
    }

    #[test]
    fn test_voting_params_validation() {
        assert!(VotingParams::default().validate().is_ok());
        assert!(VotingParams { approval_threshold: 101, voting_period_secs: 60 }.validate().is_err());
        assert!(VotingParams { approval_threshold: 51, voting_period_secs: 0 }.validate().is_err());
    }

    #[test]
    fn test_voting_period_upper_bound() {
        let at_limit = VotingParams {
            approval_threshold: 51,
            voting_period_secs: MAX_VOTING_PERIOD_SECS,
        };
        assert!(at_limit.validate().is_ok());
        assert_eq!(at_limit.voting_period().unwrap().num_seconds(), MAX_VOTING_PERIOD_SECS);

        let huge = VotingParams {
            approval_threshold: 51,
            voting_period_secs: 1_000_000_000_000_000,
        };
        assert!(matches!(huge.validate(), Err(TrustError::Validation(_))));
        assert!(matches!(huge.voting_period(), Err(TrustError::Validation(_))));
    }
}
