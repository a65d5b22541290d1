//! Typed access to both contracts on behalf of one caller identity.

use chrono::{DateTime, Duration, Utc};

use crate::error::TrustError;
use crate::ledger::identity::Identity;
use crate::ledger::substrate::{PendingTransaction, Substrate};
use crate::ledger::transaction::Call;
use crate::policy::{OrganizationStatus, Policy, PolicyProposal};
use crate::signatures::{NewSignature, SignatureRecord};

#[derive(Clone)]
pub struct LedgerClient {
    substrate: Substrate,
    caller: Identity,
}

impl LedgerClient {
    pub fn new(substrate: Substrate, caller: Identity) -> Self {
        Self { substrate, caller }
    }

    pub fn caller(&self) -> &Identity {
        &self.caller
    }

    pub fn substrate(&self) -> &Substrate {
        &self.substrate
    }

    /// Same substrate, different caller.
    pub fn as_caller(&self, caller: Identity) -> Self {
        Self::new(self.substrate.clone(), caller)
    }

    async fn submit(&self, call: Call) -> Result<PendingTransaction, TrustError> {
        self.substrate.submit(self.caller.clone(), call).await
    }

    // Signature ledger writes

    pub async fn store_signature(&self, signature: NewSignature) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::StoreSignature(signature)).await
    }

    pub async fn change_signature_admin(&self, new_admin: Identity) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::ChangeSignatureAdmin { new_admin }).await
    }

    // Signature ledger reads

    pub async fn signature_admin(&self) -> Identity {
        self.substrate.read(|s| s.signatures.admin().clone()).await
    }

    pub async fn get_signature(&self, id: u64) -> Result<SignatureRecord, TrustError> {
        self.substrate
            .read(|s| s.signatures.get_signature(id).cloned())
            .await
    }

    pub async fn total_signatures(&self) -> u64 {
        self.substrate.read(|s| s.signatures.total_signatures()).await
    }

    pub async fn verify_signature_integrity(&self, id: u64, candidate_hash: &str) -> Result<bool, TrustError> {
        self.substrate
            .read(|s| s.signatures.verify_signature_integrity(id, candidate_hash))
            .await
    }

    // Policy registry writes

    pub async fn register_organization(
        &self,
        identity: Identity,
        name: &str,
        org_type: &str,
    ) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::RegisterOrganization {
            identity,
            name: name.to_string(),
            org_type: org_type.to_string(),
        })
        .await
    }

    pub async fn update_organization_status(
        &self,
        identity: Identity,
        active: bool,
    ) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::UpdateOrganizationStatus { identity, active }).await
    }

    pub async fn update_organization_capabilities(
        &self,
        identity: Identity,
        can_vote: bool,
        can_propose: bool,
    ) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::UpdateOrganizationCapabilities {
            identity,
            can_vote,
            can_propose,
        })
        .await
    }

    pub async fn propose_policy(&self, proposal: PolicyProposal) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::ProposePolicy(proposal)).await
    }

    pub async fn cast_vote(&self, policy_id: u64, support: bool) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::CastVote { policy_id, support }).await
    }

    pub async fn execute_policy(&self, policy_id: u64) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::ExecutePolicy { policy_id }).await
    }

    pub async fn change_policy_admin(&self, new_admin: Identity) -> Result<PendingTransaction, TrustError> {
        self.submit(Call::ChangePolicyAdmin { new_admin }).await
    }

    // Policy registry reads

    pub async fn policy_admin(&self) -> Identity {
        self.substrate.read(|s| s.policies.admin().clone()).await
    }

    pub async fn approval_threshold(&self) -> u64 {
        self.substrate
            .read(|s| s.policies.params().approval_threshold)
            .await
    }

    pub async fn voting_period(&self) -> Result<Duration, TrustError> {
        self.substrate.read(|s| s.policies.params().voting_period()).await
    }

    pub async fn organization_name(&self, identity: &Identity) -> Result<String, TrustError> {
        self.substrate
            .read(|s| s.policies.organization_name(identity).map(str::to_string))
            .await
    }

    pub async fn organization_type(&self, identity: &Identity) -> Result<String, TrustError> {
        self.substrate
            .read(|s| s.policies.organization_type(identity).map(str::to_string))
            .await
    }

    pub async fn organization_status(&self, identity: &Identity) -> Result<OrganizationStatus, TrustError> {
        self.substrate
            .read(|s| s.policies.organization_status(identity))
            .await
    }

    pub async fn total_organizations(&self) -> u64 {
        self.substrate.read(|s| s.policies.total_organizations()).await
    }

    pub async fn eligible_voters(&self) -> u64 {
        self.substrate.read(|s| s.policies.eligible_voters()).await
    }

    pub async fn policy(&self, id: u64) -> Result<Policy, TrustError> {
        self.substrate.read(|s| s.policies.policy(id).cloned()).await
    }

    pub async fn total_policies(&self) -> u64 {
        self.substrate.read(|s| s.policies.total_policies()).await
    }

    pub async fn policy_title(&self, id: u64) -> Result<String, TrustError> {
        Ok(self.policy(id).await?.title)
    }

    pub async fn policy_description(&self, id: u64) -> Result<String, TrustError> {
        Ok(self.policy(id).await?.description)
    }

    pub async fn policy_organ_type(&self, id: u64) -> Result<String, TrustError> {
        Ok(self.policy(id).await?.organ_type)
    }

    pub async fn policy_proposer(&self, id: u64) -> Result<Identity, TrustError> {
        Ok(self.policy(id).await?.proposer)
    }

    pub async fn policy_data(&self, id: u64) -> Result<String, TrustError> {
        Ok(self.policy(id).await?.data)
    }

    /// `(executed, approved)`
    pub async fn policy_status(&self, id: u64) -> Result<(bool, bool), TrustError> {
        self.substrate.read(|s| s.policies.policy_status(id)).await
    }

    /// `(created_at, voting_deadline)`
    pub async fn policy_times(&self, id: u64) -> Result<(DateTime<Utc>, DateTime<Utc>), TrustError> {
        self.substrate.read(|s| s.policies.policy_times(id)).await
    }

    /// `(yes_votes, no_votes)`
    pub async fn policy_votes(&self, id: u64) -> Result<(u64, u64), TrustError> {
        self.substrate.read(|s| s.policies.policy_votes(id)).await
    }

    pub async fn has_voted(&self, id: u64, voter: &Identity) -> Result<bool, TrustError> {
        self.substrate.read(|s| s.policies.has_voted(id, voter)).await
    }

    pub async fn vote(&self, id: u64, voter: &Identity) -> Result<bool, TrustError> {
        self.substrate.read(|s| s.policies.vote(id, voter)).await
    }

    pub async fn vote_count(&self, id: u64) -> Result<u64, TrustError> {
        self.substrate.read(|s| s.policies.vote_count(id)).await
    }

    /// Open policies for `organ_type` whose deadline has not passed.
    pub async fn active_policies(&self, organ_type: &str) -> Vec<u64> {
        let now = self.substrate.now();
        self.substrate
            .read(|s| s.policies.active_policies(organ_type, now))
            .await
    }
}
