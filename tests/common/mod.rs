#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use consent_ledger::ledger::{Identity, LedgerClient, ManualClock, Substrate};
use consent_ledger::policy::{PolicyProposal, VotingParams};
use consent_ledger::signatures::{EntityType, NewSignature, SignerType};
use std::sync::Arc;

pub fn identity(n: u64) -> Identity {
    format!("0x{:040x}", n).parse().expect("valid identity")
}

pub fn admin() -> Identity {
    identity(0xad)
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// In-memory ledger driven by a manual clock, plus an admin client.
pub async fn setup_ledger(params: VotingParams) -> (LedgerClient, ManualClock) {
    let clock = ManualClock::new(start_time());
    let substrate = Substrate::in_memory(admin(), params, Arc::new(clock.clone()))
        .await
        .expect("Failed to create test ledger");
    (LedgerClient::new(substrate, admin()), clock)
}

pub fn sample_signature(content_hash: &str) -> NewSignature {
    NewSignature {
        content_hash: content_hash.to_string(),
        signer_name: "Ananya Rao".to_string(),
        signer_type: SignerType::SelfSigned,
        guardian_name: String::new(),
        guardian_relation: String::new(),
        entity_type: EntityType::Donor,
        entity_id: 1001,
        hospital_id: "apollo-chennai".to_string(),
        is_verified: true,
        confidence_score: 80,
    }
}

pub fn sample_proposal(title: &str, organ_type: &str) -> PolicyProposal {
    PolicyProposal {
        title: title.to_string(),
        description: format!("{} allocation rule", organ_type),
        organ_type: organ_type.to_string(),
        data: r#"{"max_wait_days":90}"#.to_string(),
    }
}

/// Register `count` hospitals (identities 1..=count) as the admin and
/// return a client acting as each.
pub async fn register_hospitals(admin: &LedgerClient, count: u64) -> Vec<LedgerClient> {
    let mut clients = Vec::new();
    for n in 1..=count {
        admin
            .register_organization(identity(n), &format!("Hospital {}", n), "HOSPITAL")
            .await
            .expect("submit")
            .confirmed()
            .await
            .expect("register hospital");
        clients.push(admin.as_caller(identity(n)));
    }
    clients
}
