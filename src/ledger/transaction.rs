//! Ledger transactions
//!
//! A [`Call`] is one state-changing request. [`ContractState`] applies calls
//! to the signature ledger and the policy registry; a call either succeeds
//! completely or returns an error without changing anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StateViolation, TrustError};
use crate::ledger::entry::LedgerEntry;
use crate::ledger::events::LedgerEvent;
use crate::ledger::identity::Identity;
use crate::policy::{PolicyProposal, PolicyRegistry, TallyResult, VotingParams};
use crate::signatures::{NewSignature, SignatureLedger};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    Genesis {
        admin: Identity,
        params: VotingParams,
    },
    StoreSignature(NewSignature),
    ChangeSignatureAdmin {
        new_admin: Identity,
    },
    RegisterOrganization {
        identity: Identity,
        name: String,
        org_type: String,
    },
    UpdateOrganizationStatus {
        identity: Identity,
        active: bool,
    },
    UpdateOrganizationCapabilities {
        identity: Identity,
        can_vote: bool,
        can_propose: bool,
    },
    ProposePolicy(PolicyProposal),
    CastVote {
        policy_id: u64,
        support: bool,
    },
    ExecutePolicy {
        policy_id: u64,
    },
    ChangePolicyAdmin {
        new_admin: Identity,
    },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::Genesis { .. } => "genesis",
            Call::StoreSignature(_) => "store_signature",
            Call::ChangeSignatureAdmin { .. } => "change_signature_admin",
            Call::RegisterOrganization { .. } => "register_organization",
            Call::UpdateOrganizationStatus { .. } => "update_organization_status",
            Call::UpdateOrganizationCapabilities { .. } => "update_organization_capabilities",
            Call::ProposePolicy(_) => "propose_policy",
            Call::CastVote { .. } => "cast_vote",
            Call::ExecutePolicy { .. } => "execute_policy",
            Call::ChangePolicyAdmin { .. } => "change_policy_admin",
        }
    }
}

/// What a committed call produced, beyond its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Initialised,
    SignatureStored { id: u64 },
    PolicyProposed { id: u64 },
    PolicyExecuted { tally: TallyResult },
    Applied,
}

/// Current state of both contracts.
#[derive(Debug, Clone)]
pub struct ContractState {
    pub signatures: SignatureLedger,
    pub policies: PolicyRegistry,
}

impl ContractState {
    pub fn genesis(admin: Identity, params: VotingParams) -> Self {
        Self {
            signatures: SignatureLedger::new(admin.clone()),
            policies: PolicyRegistry::new(admin, params),
        }
    }

    pub fn apply(
        &mut self,
        caller: &Identity,
        call: &Call,
        now: DateTime<Utc>,
    ) -> Result<(Outcome, Vec<LedgerEvent>), TrustError> {
        match call {
            Call::Genesis { .. } => Err(StateViolation::AlreadyInitialised.into()),
            Call::StoreSignature(signature) => {
                let (id, events) = self.signatures.store_signature(caller, signature.clone(), now)?;
                Ok((Outcome::SignatureStored { id }, events))
            }
            Call::ChangeSignatureAdmin { new_admin } => {
                let events = self.signatures.change_admin(caller, new_admin.clone())?;
                Ok((Outcome::Applied, events))
            }
            Call::RegisterOrganization {
                identity,
                name,
                org_type,
            } => {
                let events =
                    self.policies
                        .register_organization(caller, identity.clone(), name, org_type, now)?;
                Ok((Outcome::Applied, events))
            }
            Call::UpdateOrganizationStatus { identity, active } => {
                let events = self
                    .policies
                    .update_organization_status(caller, identity, *active)?;
                Ok((Outcome::Applied, events))
            }
            Call::UpdateOrganizationCapabilities {
                identity,
                can_vote,
                can_propose,
            } => {
                let events = self.policies.update_organization_capabilities(
                    caller,
                    identity,
                    *can_vote,
                    *can_propose,
                )?;
                Ok((Outcome::Applied, events))
            }
            Call::ProposePolicy(proposal) => {
                let (id, events) = self.policies.propose_policy(caller, proposal.clone(), now)?;
                Ok((Outcome::PolicyProposed { id }, events))
            }
            Call::CastVote { policy_id, support } => {
                let events = self.policies.cast_vote(caller, *policy_id, *support, now)?;
                Ok((Outcome::Applied, events))
            }
            Call::ExecutePolicy { policy_id } => {
                let (tally, events) = self.policies.execute_policy(*policy_id, now)?;
                Ok((Outcome::PolicyExecuted { tally }, events))
            }
            Call::ChangePolicyAdmin { new_admin } => {
                let events = self.policies.change_admin(caller, new_admin.clone())?;
                Ok((Outcome::Applied, events))
            }
        }
    }

    /// Rebuild state by re-executing every committed entry in order.
    ///
    /// Each entry is applied with its recorded caller and timestamp; the
    /// events it produces must match the events stored in the entry.
    pub fn replay(entries: &[LedgerEntry]) -> Result<Self, TrustError> {
        let (first, rest) = entries
            .split_first()
            .ok_or(TrustError::State(StateViolation::MissingGenesis))?;

        let mut state = match &first.call {
            Call::Genesis { admin, params } => {
                params.validate()?;
                Self::genesis(admin.clone(), *params)
            }
            _ => return Err(StateViolation::MissingGenesis.into()),
        };

        for entry in rest {
            let (_, events) = state
                .apply(&entry.caller, &entry.call, entry.timestamp)
                .map_err(|e| {
                    TrustError::Storage(format!(
                        "replay failed at sequence {} ({}): {}",
                        entry.sequence,
                        entry.call.name(),
                        e
                    ))
                })?;

            if events != entry.events {
                return Err(TrustError::Storage(format!(
                    "replay diverged at sequence {}: recorded events do not match",
                    entry.sequence
                )));
            }
        }

        Ok(state)
    }
}
