//! Policy Registry and Voting
//!
//! Organizations propose policies, vote once each within a fixed window,
//! and anyone may execute a policy after its window has elapsed. Every
//! mutating call checks authorization and state before touching anything,
//! so a rejected call leaves the registry exactly as it was.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::organizations::OrganizationRegistry;
use super::types::*;
use crate::error::{StateViolation, TrustError};
use crate::ledger::events::LedgerEvent;
use crate::ledger::identity::Identity;

/// Fields supplied by a proposer
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PolicyProposal {
    pub title: String,
    pub description: String,
    pub organ_type: String,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    admin: Identity,
    params: VotingParams,
    organizations: OrganizationRegistry,
    policies: Vec<Policy>,
}

impl PolicyRegistry {
    pub fn new(admin: Identity, params: VotingParams) -> Self {
        Self {
            admin,
            params,
            organizations: OrganizationRegistry::new(),
            policies: Vec::new(),
        }
    }

    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    pub fn params(&self) -> VotingParams {
        self.params
    }

    fn require_admin(&self, caller: &Identity) -> Result<(), TrustError> {
        if caller != &self.admin {
            warn!("Rejected policy registry admin call from {}", caller);
            return Err(TrustError::not_admin(caller.as_str()));
        }
        Ok(())
    }

    pub fn change_admin(
        &mut self,
        caller: &Identity,
        new_admin: Identity,
    ) -> Result<Vec<LedgerEvent>, TrustError> {
        self.require_admin(caller)?;

        let previous = std::mem::replace(&mut self.admin, new_admin.clone());
        warn!("Policy registry admin changed from {} to {}", previous, new_admin);

        Ok(vec![LedgerEvent::PolicyAdminChanged {
            previous,
            new: new_admin,
        }])
    }

    // ------------------------------------------------------------------
    // Organizations
    // ------------------------------------------------------------------

    pub fn register_organization(
        &mut self,
        caller: &Identity,
        identity: Identity,
        name: &str,
        org_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>, TrustError> {
        self.require_admin(caller)?;

        let organization = self.organizations.register(identity, name, org_type, now)?;
        info!("Registered organization {} ({})", organization.name, organization.identity);

        Ok(vec![LedgerEvent::OrganizationRegistered {
            identity: organization.identity.clone(),
            name: organization.name.clone(),
        }])
    }

    pub fn update_organization_status(
        &mut self,
        caller: &Identity,
        identity: &Identity,
        active: bool,
    ) -> Result<Vec<LedgerEvent>, TrustError> {
        self.require_admin(caller)?;

        let organization = self.organizations.set_active(identity, active)?;
        info!(
            "Organization {} is now {}",
            organization.identity,
            if active { "active" } else { "inactive" }
        );

        Ok(vec![status_event(organization)])
    }

    pub fn update_organization_capabilities(
        &mut self,
        caller: &Identity,
        identity: &Identity,
        can_vote: bool,
        can_propose: bool,
    ) -> Result<Vec<LedgerEvent>, TrustError> {
        self.require_admin(caller)?;

        let organization = self.organizations.set_capabilities(identity, can_vote, can_propose)?;
        info!(
            "Organization {} capabilities: vote={} propose={}",
            organization.identity, can_vote, can_propose
        );

        Ok(vec![status_event(organization)])
    }

    pub fn organization(&self, identity: &Identity) -> Result<&Organization, TrustError> {
        self.organizations.get(identity)
    }

    pub fn organization_name(&self, identity: &Identity) -> Result<&str, TrustError> {
        Ok(&self.organizations.get(identity)?.name)
    }

    pub fn organization_type(&self, identity: &Identity) -> Result<&str, TrustError> {
        Ok(&self.organizations.get(identity)?.org_type)
    }

    pub fn organization_status(&self, identity: &Identity) -> Result<OrganizationStatus, TrustError> {
        Ok(self.organizations.get(identity)?.status())
    }

    pub fn organizations(&self) -> impl Iterator<Item = &Organization> {
        self.organizations.iter()
    }

    pub fn total_organizations(&self) -> u64 {
        self.organizations.total()
    }

    pub fn eligible_voters(&self) -> u64 {
        self.organizations.eligible_voter_count()
    }

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    pub fn propose_policy(
        &mut self,
        caller: &Identity,
        proposal: PolicyProposal,
        now: DateTime<Utc>,
    ) -> Result<(u64, Vec<LedgerEvent>), TrustError> {
        let proposer = self.organizations.get(caller).map_err(|_| {
            TrustError::Authorization(format!("{} is not a registered organization", caller))
        })?;
        if !proposer.is_eligible_proposer() {
            warn!("Organization {} may not propose policies", caller);
            return Err(TrustError::Authorization(format!(
                "organization {} is inactive or not allowed to propose",
                caller
            )));
        }
        if proposal.title.trim().is_empty() {
            return Err(TrustError::Validation("policy title must not be empty".to_string()));
        }

        let voting_deadline = now
            .checked_add_signed(self.params.voting_period()?)
            .ok_or_else(|| {
                TrustError::Validation(format!(
                    "voting deadline overflows for a proposal at {}",
                    now
                ))
            })?;

        let id = self.policies.len() as u64 + 1;
        let policy = Policy {
            id,
            title: proposal.title,
            description: proposal.description,
            organ_type: proposal.organ_type,
            data: proposal.data,
            proposer: caller.clone(),
            created_at: now,
            voting_deadline,
            yes_votes: 0,
            no_votes: 0,
            status: PolicyStatus::Open,
            votes: BTreeMap::new(),
        };

        info!(
            "Policy {} proposed by {}: {} (voting closes {})",
            id, caller, policy.title, policy.voting_deadline
        );
        let event = LedgerEvent::PolicyProposed {
            id,
            title: policy.title.clone(),
            proposer: caller.clone(),
        };
        self.policies.push(policy);

        Ok((id, vec![event]))
    }

    pub fn cast_vote(
        &mut self,
        caller: &Identity,
        policy_id: u64,
        support: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>, TrustError> {
        let voter = self.organizations.get(caller).map_err(|_| {
            TrustError::Authorization(format!("{} is not a registered organization", caller))
        })?;
        if !voter.is_eligible_voter() {
            warn!("Organization {} may not vote", caller);
            return Err(TrustError::Authorization(format!(
                "organization {} is inactive or not allowed to vote",
                caller
            )));
        }

        let policy = self.policy_mut(policy_id)?;
        if policy.status.is_executed() {
            return Err(StateViolation::AlreadyExecuted(policy_id).into());
        }
        if !policy.is_votable(now) {
            return Err(StateViolation::VotingClosed(policy_id).into());
        }
        if policy.votes.contains_key(caller) {
            return Err(StateViolation::AlreadyVoted {
                policy_id,
                voter: caller.to_string(),
            }
            .into());
        }

        policy.votes.insert(caller.clone(), support);
        if support {
            policy.yes_votes += 1;
        } else {
            policy.no_votes += 1;
        }

        info!(
            "Vote on policy {} by {}: {} ({} yes / {} no)",
            policy_id,
            caller,
            if support { "yes" } else { "no" },
            policy.yes_votes,
            policy.no_votes
        );

        Ok(vec![LedgerEvent::VoteCast {
            policy_id,
            voter: caller.clone(),
            support,
        }])
    }

    /// Tally and finalize. Callable by anyone once `now` is past the deadline.
    pub fn execute_policy(
        &mut self,
        policy_id: u64,
        now: DateTime<Utc>,
    ) -> Result<(TallyResult, Vec<LedgerEvent>), TrustError> {
        let eligible_voters = self.organizations.eligible_voter_count();
        let approval_threshold = self.params.approval_threshold;

        let policy = self.policy_mut(policy_id)?;
        if policy.status.is_executed() {
            return Err(StateViolation::AlreadyExecuted(policy_id).into());
        }
        if now <= policy.voting_deadline {
            return Err(StateViolation::VotingStillOpen(policy_id).into());
        }

        let tally = TallyResult::compute(policy.yes_votes, eligible_voters, approval_threshold);
        policy.status = PolicyStatus::Executed {
            approved: tally.approved,
        };

        info!(
            "Policy {} executed: {} ({}% of {} eligible, threshold {}%)",
            policy_id,
            policy.status.as_str(),
            tally.approval_percent,
            tally.eligible_voters,
            approval_threshold
        );

        Ok((
            tally,
            vec![LedgerEvent::PolicyExecuted {
                id: policy_id,
                approved: tally.approved,
            }],
        ))
    }

    fn policy_mut(&mut self, id: u64) -> Result<&mut Policy, TrustError> {
        if id == 0 {
            return Err(TrustError::policy_not_found(id));
        }
        self.policies
            .get_mut((id - 1) as usize)
            .ok_or_else(|| TrustError::policy_not_found(id))
    }

    pub fn policy(&self, id: u64) -> Result<&Policy, TrustError> {
        if id == 0 {
            return Err(TrustError::policy_not_found(id));
        }
        self.policies
            .get((id - 1) as usize)
            .ok_or_else(|| TrustError::policy_not_found(id))
    }

    pub fn total_policies(&self) -> u64 {
        self.policies.len() as u64
    }

    /// `(executed, approved)`
    pub fn policy_status(&self, id: u64) -> Result<(bool, bool), TrustError> {
        let status = self.policy(id)?.status;
        Ok((status.is_executed(), status.approved()))
    }

    /// `(created_at, voting_deadline)`
    pub fn policy_times(&self, id: u64) -> Result<(DateTime<Utc>, DateTime<Utc>), TrustError> {
        let policy = self.policy(id)?;
        Ok((policy.created_at, policy.voting_deadline))
    }

    /// `(yes_votes, no_votes)`
    pub fn policy_votes(&self, id: u64) -> Result<(u64, u64), TrustError> {
        let policy = self.policy(id)?;
        Ok((policy.yes_votes, policy.no_votes))
    }

    pub fn has_voted(&self, id: u64, voter: &Identity) -> Result<bool, TrustError> {
        Ok(self.policy(id)?.votes.contains_key(voter))
    }

    pub fn vote(&self, id: u64, voter: &Identity) -> Result<bool, TrustError> {
        self.policy(id)?
            .votes
            .get(voter)
            .copied()
            .ok_or_else(|| TrustError::NotFound(format!("vote by {} on policy {}", voter, id)))
    }

    pub fn vote_count(&self, id: u64) -> Result<u64, TrustError> {
        Ok(self.policy(id)?.votes.len() as u64)
    }

    /// Ids of policies for `organ_type` that can still be voted on.
    pub fn active_policies(&self, organ_type: &str, now: DateTime<Utc>) -> Vec<u64> {
        let ids: Vec<u64> = self
            .policies
            .iter()
            .filter(|policy| policy.applies_to(organ_type) && policy.is_votable(now))
            .map(|policy| policy.id)
            .collect();
        debug!("{} active policies for {}", ids.len(), organ_type);
        ids
    }
}

fn status_event(organization: &Organization) -> LedgerEvent {
    LedgerEvent::OrganizationStatusUpdated {
        identity: organization.identity.clone(),
        active: organization.active,
        can_vote: organization.can_vote,
        can_propose: organization.can_propose,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity(n: u64) -> Identity {
        format!("0x{:040x}", n).parse().unwrap()
    }

    fn proposal(organ_type: &str) -> PolicyProposal {
        PolicyProposal {
            title: "Kidney donor age limit".to_string(),
            description: "Kidney donors must be 65 or younger".to_string(),
            organ_type: organ_type.to_string(),
            data: "{\"max_age\":65}".to_string(),
        }
    }

    fn registry_with_orgs(threshold: u64, orgs: u64) -> (PolicyRegistry, DateTime<Utc>) {
        let admin = identity(1);
        let now = Utc::now();
        let mut registry = PolicyRegistry::new(
            admin.clone(),
            VotingParams {
                approval_threshold: threshold,
                voting_period_secs: 3600,
            },
        );
        for n in 0..orgs {
            registry
                .register_organization(&admin, identity(100 + n), &format!("Org {}", n), "hospital", now)
                .unwrap();
        }
        (registry, now)
    }

    #[test]
    fn test_only_admin_registers() {
        let (mut registry, now) = registry_with_orgs(51, 0);
        let result = registry.register_organization(&identity(2), identity(100), "Org", "hospital", now);
        assert!(matches!(result, Err(TrustError::Authorization(_))));
        assert_eq!(registry.total_organizations(), 0);
    }

    #[test]
    fn test_proposal_sets_fixed_deadline() {
        let (mut registry, now) = registry_with_orgs(51, 1);
        let (id, events) = registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();

        assert_eq!(id, 1);
        assert_eq!(events.len(), 1);
        let (created, deadline) = registry.policy_times(1).unwrap();
        assert_eq!(created, now);
        assert_eq!(deadline, now + Duration::seconds(3600));
        assert_eq!(registry.policy_status(1).unwrap(), (false, false));
    }

    #[test]
    fn test_out_of_range_deadline_rejected_without_state_change() {
        let admin = identity(1);
        let now = Utc::now();
        let mut registry = PolicyRegistry::new(
            admin.clone(),
            VotingParams {
                approval_threshold: 51,
                voting_period_secs: 1_000_000_000_000_000,
            },
        );
        registry
            .register_organization(&admin, identity(100), "Org", "hospital", now)
            .unwrap();

        assert!(matches!(
            registry.propose_policy(&identity(100), proposal("kidney"), now),
            Err(TrustError::Validation(_))
        ));
        assert_eq!(registry.total_policies(), 0);

        let (mut registry, _) = registry_with_orgs(51, 1);
        assert!(matches!(
            registry.propose_policy(&identity(100), proposal("kidney"), DateTime::<Utc>::MAX_UTC),
            Err(TrustError::Validation(_))
        ));
        assert_eq!(registry.total_policies(), 0);
    }

    #[test]
    fn test_unregistered_or_ineligible_proposer_rejected() {
        let (mut registry, now) = registry_with_orgs(51, 1);
        assert!(matches!(
            registry.propose_policy(&identity(999), proposal("kidney"), now),
            Err(TrustError::Authorization(_))
        ));

        registry
            .update_organization_capabilities(&identity(1), &identity(100), true, false)
            .unwrap();
        assert!(matches!(
            registry.propose_policy(&identity(100), proposal("kidney"), now),
            Err(TrustError::Authorization(_))
        ));
        assert_eq!(registry.total_policies(), 0);
    }

    #[test]
    fn test_double_vote_rejected_and_tally_unchanged() {
        let (mut registry, now) = registry_with_orgs(51, 2);
        registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();

        registry.cast_vote(&identity(100), 1, true, now).unwrap();
        let second = registry.cast_vote(&identity(100), 1, false, now);
        assert!(matches!(
            second,
            Err(TrustError::State(StateViolation::AlreadyVoted { .. }))
        ));

        assert_eq!(registry.policy_votes(1).unwrap(), (1, 0));
        assert_eq!(registry.vote_count(1).unwrap(), 1);
        assert!(registry.vote(1, &identity(100)).unwrap());
        assert!(registry.has_voted(1, &identity(100)).unwrap());
        assert!(!registry.has_voted(1, &identity(101)).unwrap());
        assert!(matches!(registry.vote(1, &identity(101)), Err(TrustError::NotFound(_))));
    }

    #[test]
    fn test_vote_after_deadline_rejected() {
        let (mut registry, now) = registry_with_orgs(51, 1);
        registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();

        let late = now + Duration::seconds(3601);
        assert!(matches!(
            registry.cast_vote(&identity(100), 1, true, late),
            Err(TrustError::State(StateViolation::VotingClosed(1)))
        ));
    }

    #[test]
    fn test_execute_waits_for_deadline() {
        let (mut registry, now) = registry_with_orgs(51, 1);
        registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();

        let deadline = now + Duration::seconds(3600);
        assert!(matches!(
            registry.execute_policy(1, now),
            Err(TrustError::State(StateViolation::VotingStillOpen(1)))
        ));
        assert!(matches!(
            registry.execute_policy(1, deadline),
            Err(TrustError::State(StateViolation::VotingStillOpen(1)))
        ));
        assert!(registry.execute_policy(1, deadline + Duration::seconds(1)).is_ok());
        assert!(matches!(
            registry.execute_policy(1, deadline + Duration::seconds(2)),
            Err(TrustError::State(StateViolation::AlreadyExecuted(1)))
        ));
    }

    #[test]
    fn test_split_vote_threshold_boundary() {
        for (threshold, expected) in [(51, false), (50, true)] {
            let (mut registry, now) = registry_with_orgs(threshold, 2);
            registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();
            registry.cast_vote(&identity(100), 1, true, now).unwrap();
            registry.cast_vote(&identity(101), 1, false, now).unwrap();

            let after = now + Duration::seconds(3601);
            let (tally, events) = registry.execute_policy(1, after).unwrap();
            assert_eq!(tally.approval_percent, 50);
            assert_eq!(tally.approved, expected);
            assert_eq!(
                events,
                vec![LedgerEvent::PolicyExecuted {
                    id: 1,
                    approved: expected
                }]
            );
            assert_eq!(registry.policy_status(1).unwrap(), (true, expected));
        }
    }

    #[test]
    fn test_zero_eligible_voters_rejects() {
        let (mut registry, now) = registry_with_orgs(0, 1);
        registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();
        registry.update_organization_status(&identity(1), &identity(100), false).unwrap();

        let (tally, _) = registry.execute_policy(1, now + Duration::seconds(3601)).unwrap();
        assert_eq!(tally.eligible_voters, 0);
        assert!(!tally.approved);
    }

    #[test]
    fn test_eligibility_counted_at_execution() {
        let (mut registry, now) = registry_with_orgs(51, 3);
        registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();
        registry.cast_vote(&identity(100), 1, true, now).unwrap();
        registry.cast_vote(&identity(101), 1, true, now).unwrap();

        // 2 of 3 would pass; adding a fourth eligible org before execution
        // drops the ratio to 50%.
        registry
            .register_organization(&identity(1), identity(200), "Late Org", "ngo", now)
            .unwrap();
        let (tally, _) = registry.execute_policy(1, now + Duration::seconds(3601)).unwrap();
        assert_eq!(tally.eligible_voters, 4);
        assert!(!tally.approved);
    }

    #[test]
    fn test_active_policies_filter() {
        let (mut registry, now) = registry_with_orgs(51, 1);
        registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();
        registry.propose_policy(&identity(100), proposal("liver"), now).unwrap();
        registry
            .propose_policy(&identity(100), proposal("kidney"), now + Duration::seconds(1800))
            .unwrap();

        assert_eq!(registry.active_policies("kidney", now), vec![1, 3]);
        assert_eq!(registry.active_policies("KIDNEY", now), vec![1, 3]);
        assert_eq!(registry.active_policies("liver", now), vec![2]);

        // First kidney policy's window has closed; the third is still open.
        let later = now + Duration::seconds(3600);
        assert_eq!(registry.active_policies("kidney", later), vec![3]);
    }

    #[test]
    fn test_deactivated_voter_rejected() {
        let (mut registry, now) = registry_with_orgs(51, 2);
        registry.propose_policy(&identity(100), proposal("kidney"), now).unwrap();
        registry.update_organization_status(&identity(1), &identity(101), false).unwrap();

        assert!(matches!(
            registry.cast_vote(&identity(101), 1, true, now),
            Err(TrustError::Authorization(_))
        ));
        assert!(!registry.organization_status(&identity(101)).unwrap().active);
    }
}
