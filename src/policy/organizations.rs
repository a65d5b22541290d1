//! Organization Registry
//!
//! Keeps the set of organizations allowed to take part in policy voting.
//! Authorization is checked by the owning [`PolicyRegistry`]; this type only
//! enforces uniqueness and existence.
//!
//! [`PolicyRegistry`]: super::registry::PolicyRegistry

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

use super::types::*;
use crate::error::TrustError;
use crate::ledger::identity::Identity;

#[derive(Debug, Clone, Default)]
pub struct OrganizationRegistry {
    organizations: BTreeMap<Identity, Organization>,
    names: HashSet<String>,
}

impl OrganizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        identity: Identity,
        name: &str,
        org_type: &str,
        now: DateTime<Utc>,
    ) -> Result<&Organization, TrustError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrustError::Validation("organization name must not be empty".to_string()));
        }
        if self.organizations.contains_key(&identity) {
            return Err(TrustError::Duplicate(format!("organization identity {}", identity)));
        }
        if self.names.contains(name) {
            return Err(TrustError::Duplicate(format!("organization name {}", name)));
        }

        self.names.insert(name.to_string());
        let organization = Organization {
            identity: identity.clone(),
            name: name.to_string(),
            org_type: org_type.trim().to_string(),
            active: true,
            can_vote: true,
            can_propose: true,
            registered_at: now,
        };

        Ok(self.organizations.entry(identity).or_insert(organization))
    }

    pub fn get(&self, identity: &Identity) -> Result<&Organization, TrustError> {
        self.organizations
            .get(identity)
            .ok_or_else(|| TrustError::organization_not_found(identity.as_str()))
    }

    fn get_mut(&mut self, identity: &Identity) -> Result<&mut Organization, TrustError> {
        self.organizations
            .get_mut(identity)
            .ok_or_else(|| TrustError::organization_not_found(identity.as_str()))
    }

    pub fn set_active(&mut self, identity: &Identity, active: bool) -> Result<&Organization, TrustError> {
        let organization = self.get_mut(identity)?;
        organization.active = active;
        Ok(organization)
    }

    pub fn set_capabilities(
        &mut self,
        identity: &Identity,
        can_vote: bool,
        can_propose: bool,
    ) -> Result<&Organization, TrustError> {
        let organization = self.get_mut(identity)?;
        organization.can_vote = can_vote;
        organization.can_propose = can_propose;
        Ok(organization)
    }

    pub fn total(&self) -> u64 {
        self.organizations.len() as u64
    }

    /// Registered, active and vote-capable organizations right now.
    pub fn eligible_voter_count(&self) -> u64 {
        self.organizations
            .values()
            .filter(|org| org.is_eligible_voter())
            .count() as u64
    }

    pub fn iter(&self) -> impl Iterator<Item = &Organization> {
        self.organizations.values()
    }
}
