//! SQLite read model built from the ledger's committed entries

use chrono::Duration;
use consent_ledger::database::indexer::EventIndexer;
use consent_ledger::database::Database;
use consent_ledger::policy::VotingParams;
use consent_ledger::signatures::EntityType;

mod common;
use common::*;

async fn setup_indexer() -> Result<EventIndexer, Box<dyn std::error::Error>> {
    let db = Database::new_in_memory().await?;
    db.run_migrations().await?;
    Ok(EventIndexer::new(db.pool().clone()))
}

#[tokio::test]
async fn test_sync_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let (client, _clock) = setup_ledger(VotingParams::default()).await;
    for n in 1..=3 {
        client
            .store_signature(sample_signature(&format!("Qm{}", n)))
            .await?
            .confirmed()
            .await?;
    }

    let indexer = setup_indexer().await?;
    assert_eq!(indexer.last_indexed_sequence().await?, None);

    let history = client.substrate().history().await?;
    assert_eq!(indexer.sync(&history).await?, 4);
    assert_eq!(indexer.last_indexed_sequence().await?, Some(3));
    assert_eq!(indexer.sync(&history).await?, 0);

    client
        .store_signature(sample_signature("Qm4"))
        .await?
        .confirmed()
        .await?;
    let history = client.substrate().history().await?;
    assert_eq!(indexer.sync(&history).await?, 1);

    // Skipping an entry is refused rather than silently indexed.
    let indexer_with_gap = setup_indexer().await?;
    assert!(indexer_with_gap.index_entry(&history[2]).await.is_err());

    println!("✅ Indexer sync is idempotent");
    Ok(())
}

#[tokio::test]
async fn test_signature_queries() -> Result<(), Box<dyn std::error::Error>> {
    let (client, _clock) = setup_ledger(VotingParams::default()).await;

    client
        .store_signature(sample_signature("QmDonor"))
        .await?
        .confirmed()
        .await?;
    let mut patient = sample_signature("QmPatient");
    patient.entity_type = EntityType::Patient;
    patient.entity_id = 1001;
    patient.hospital_id = "aiims-delhi".to_string();
    patient.is_verified = false;
    patient.confidence_score = 40;
    client.store_signature(patient).await?.confirmed().await?;

    let indexer = setup_indexer().await?;
    indexer.sync(&client.substrate().history().await?).await?;

    let donor = indexer.signatures_for_entity(EntityType::Donor, 1001).await?;
    assert_eq!(donor.len(), 1);
    assert_eq!(donor[0].content_hash, "QmDonor");
    assert_eq!(donor[0].signer_type, "SELF");
    assert_eq!(donor[0].entity_type, "DONOR");
    assert!(donor[0].is_verified);
    assert_eq!(donor[0].confidence_score, 80);
    assert_eq!(donor[0].sequence, 1);

    let patient = indexer.signatures_for_entity(EntityType::Patient, 1001).await?;
    assert_eq!(patient.len(), 1);
    assert!(!patient[0].is_verified);

    assert_eq!(indexer.signatures_for_hospital("apollo-chennai").await?.len(), 1);
    assert_eq!(indexer.signatures_for_hospital("aiims-delhi").await?.len(), 1);
    assert!(indexer.signatures_for_hospital("unknown").await?.is_empty());

    let by_hash = indexer.signature_by_content_hash("QmPatient").await?;
    assert_eq!(by_hash.map(|s| s.id), Some(2));
    assert!(indexer.signature_by_content_hash("QmNone").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_policy_and_vote_projection() -> Result<(), Box<dyn std::error::Error>> {
    let (admin_client, clock) = setup_ledger(VotingParams::default()).await;
    let hospitals = register_hospitals(&admin_client, 3).await;

    hospitals[0]
        .propose_policy(sample_proposal("Kidney allocation", "Kidney"))
        .await?
        .confirmed()
        .await?;
    hospitals[1]
        .propose_policy(sample_proposal("Liver allocation", "liver"))
        .await?
        .confirmed()
        .await?;
    hospitals[0].cast_vote(1, true).await?.confirmed().await?;
    hospitals[1].cast_vote(1, true).await?.confirmed().await?;
    hospitals[2].cast_vote(1, false).await?.confirmed().await?;
    admin_client
        .update_organization_status(identity(3), false)
        .await?
        .confirmed()
        .await?;

    let indexer = setup_indexer().await?;
    indexer.sync(&admin_client.substrate().history().await?).await?;

    let kidney = indexer.policies_for_organ_type("KIDNEY").await?;
    assert_eq!(kidney.len(), 1);
    assert_eq!(kidney[0].status, "open");
    assert_eq!((kidney[0].yes_votes, kidney[0].no_votes), (2, 1));
    assert_eq!(kidney[0].proposer, identity(1).to_string());
    let (created_at, deadline) = admin_client.policy_times(1).await?;
    assert_eq!(kidney[0].created_at, created_at);
    assert_eq!(kidney[0].voting_deadline, deadline);

    let votes = indexer.votes_for_policy(1).await?;
    assert_eq!(votes.len(), 3);
    assert_eq!(votes.iter().filter(|v| v.support).count(), 2);

    let org = indexer
        .organization(identity(3).as_str())
        .await?
        .ok_or("organization not indexed")?;
    assert_eq!(org.name, "Hospital 3");
    assert!(!org.active);
    assert!(org.can_vote);

    clock.advance(Duration::days(7) + Duration::seconds(1));
    admin_client.execute_policy(1).await?.confirmed().await?;
    admin_client.execute_policy(2).await?.confirmed().await?;
    assert_eq!(indexer.sync(&admin_client.substrate().history().await?).await?, 2);

    // 2 yes of 2 eligible voters once the third hospital was deactivated
    assert_eq!(indexer.policies_for_organ_type("kidney").await?[0].status, "approved");
    assert_eq!(indexer.policies_for_organ_type("liver").await?[0].status, "rejected");
    Ok(())
}

#[tokio::test]
async fn test_follow_indexes_live_commits() -> Result<(), Box<dyn std::error::Error>> {
    let (client, _clock) = setup_ledger(VotingParams::default()).await;
    client
        .store_signature(sample_signature("QmBefore"))
        .await?
        .confirmed()
        .await?;

    let db = Database::new_in_memory().await?;
    db.run_migrations().await?;
    let follower = EventIndexer::new(db.pool().clone());
    let substrate = client.substrate().clone();
    let handle = tokio::spawn(async move { follower.follow(&substrate).await });

    client
        .store_signature(sample_signature("QmAfter"))
        .await?
        .confirmed()
        .await?;

    let indexer = EventIndexer::new(db.pool().clone());
    let mut indexed = None;
    for _ in 0..50 {
        indexed = indexer.last_indexed_sequence().await?;
        if indexed == Some(2) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(indexed, Some(2));
    assert!(indexer.signature_by_content_hash("QmAfter").await?.is_some());

    handle.abort();
    Ok(())
}
