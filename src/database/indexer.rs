//! Event Indexer
//!
//! Projects committed ledger entries into SQLite tables. Each entry is
//! applied in its own transaction together with the last-indexed sequence,
//! so re-running over entries already seen is a no-op.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::models::{IndexedOrganization, IndexedPolicy, IndexedSignature, IndexedVote};
use crate::error::TrustError;
use crate::ledger::{Call, LedgerEntry, LedgerEvent, Substrate};
use crate::signatures::EntityType;

pub struct EventIndexer {
    pool: SqlitePool,
}

impl EventIndexer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Sequence of the newest indexed entry, if any.
    pub async fn last_indexed_sequence(&self) -> Result<Option<u64>, TrustError> {
        let row = sqlx::query("SELECT last_sequence FROM indexer_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        let last: i64 = row.get("last_sequence");
        Ok(if last < 0 { None } else { Some(last as u64) })
    }

    /// Index one entry. Returns false when it was already indexed.
    pub async fn index_entry(&self, entry: &LedgerEntry) -> Result<bool, TrustError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT last_sequence FROM indexer_state WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        let last: i64 = row.get("last_sequence");
        let sequence = entry.sequence as i64;

        if sequence <= last {
            debug!("Skipping already indexed entry {}", entry.sequence);
            return Ok(false);
        }
        if sequence != last + 1 {
            return Err(TrustError::Database(format!(
                "Index gap: last indexed {}, received {}",
                last, entry.sequence
            )));
        }

        if let Call::Genesis { admin, params } = &entry.call {
            sqlx::query(
                r#"
                UPDATE indexer_state
                SET signature_admin = ?, policy_admin = ?, approval_threshold = ?, voting_period_secs = ?
                WHERE id = 1
                "#,
            )
            .bind(admin.as_str())
            .bind(admin.as_str())
            .bind(params.approval_threshold as i64)
            .bind(params.voting_period_secs)
            .execute(&mut *tx)
            .await?;
        }

        for event in &entry.events {
            apply_event(&mut *tx, entry, event).await?;
        }

        sqlx::query("UPDATE indexer_state SET last_sequence = ?, updated_at = ? WHERE id = 1")
            .bind(sequence)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!("Indexed {}", entry.summary());
        Ok(true)
    }

    /// Index every entry not yet seen. Returns how many were new.
    pub async fn sync(&self, entries: &[LedgerEntry]) -> Result<usize, TrustError> {
        let mut indexed = 0;
        for entry in entries {
            if self.index_entry(entry).await? {
                indexed += 1;
            }
        }
        if indexed > 0 {
            info!("Indexed {} new ledger entries", indexed);
        }
        Ok(indexed)
    }

    /// Catch up with `substrate`, then keep indexing commits until the
    /// substrate shuts down.
    pub async fn follow(&self, substrate: &Substrate) -> Result<(), TrustError> {
        let mut feed = substrate.subscribe();
        self.sync(&substrate.history().await?).await?;

        loop {
            match feed.recv().await {
                Ok(entry) => {
                    self.index_entry(&entry).await?;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Indexer fell behind by {} entries, resyncing", missed);
                    self.sync(&substrate.history().await?).await?;
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn signatures_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: u64,
    ) -> Result<Vec<IndexedSignature>, TrustError> {
        let rows = sqlx::query("SELECT * FROM signatures WHERE entity_type = ? AND entity_id = ? ORDER BY id")
            .bind(entity_type.as_str())
            .bind(entity_id as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(signature_from_row).collect()
    }

    pub async fn signatures_for_hospital(&self, hospital_id: &str) -> Result<Vec<IndexedSignature>, TrustError> {
        let rows = sqlx::query("SELECT * FROM signatures WHERE hospital_id = ? ORDER BY id")
            .bind(hospital_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(signature_from_row).collect()
    }

    pub async fn signature_by_content_hash(&self, content_hash: &str) -> Result<Option<IndexedSignature>, TrustError> {
        let row = sqlx::query("SELECT * FROM signatures WHERE content_hash = ? ORDER BY id LIMIT 1")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(signature_from_row).transpose()
    }

    /// Policies scoped to `organ_type`, matched case-insensitively.
    pub async fn policies_for_organ_type(&self, organ_type: &str) -> Result<Vec<IndexedPolicy>, TrustError> {
        let rows = sqlx::query("SELECT * FROM policies WHERE organ_type = ? COLLATE NOCASE ORDER BY id")
            .bind(organ_type)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(policy_from_row).collect()
    }

    pub async fn organization(&self, identity: &str) -> Result<Option<IndexedOrganization>, TrustError> {
        let row = sqlx::query("SELECT * FROM organizations WHERE identity = ?")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| IndexedOrganization {
            identity: row.get("identity"),
            name: row.get("name"),
            org_type: row.get("org_type"),
            active: row.get("active"),
            can_vote: row.get("can_vote"),
            can_propose: row.get("can_propose"),
            registered_at: row.get("registered_at"),
        }))
    }

    pub async fn votes_for_policy(&self, policy_id: u64) -> Result<Vec<IndexedVote>, TrustError> {
        let rows = sqlx::query("SELECT * FROM votes WHERE policy_id = ? ORDER BY cast_at, voter")
            .bind(policy_id as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| IndexedVote {
                policy_id: row.get::<i64, _>("policy_id") as u64,
                voter: row.get("voter"),
                support: row.get("support"),
                cast_at: row.get("cast_at"),
            })
            .collect())
    }
}

async fn apply_event(
    conn: &mut SqliteConnection,
    entry: &LedgerEntry,
    event: &LedgerEvent,
) -> Result<(), TrustError> {
    match (event, &entry.call) {
        (LedgerEvent::SignatureStored { id, .. }, Call::StoreSignature(signature)) => {
            sqlx::query(
                r#"
                INSERT INTO signatures
                (id, content_hash, signer_name, signer_type, guardian_name, guardian_relation,
                 entity_type, entity_id, hospital_id, is_verified, confidence_score, anchored_at, sequence)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(*id as i64)
            .bind(&signature.content_hash)
            .bind(&signature.signer_name)
            .bind(signature.signer_type.as_str())
            .bind(&signature.guardian_name)
            .bind(&signature.guardian_relation)
            .bind(signature.entity_type.as_str())
            .bind(signature.entity_id as i64)
            .bind(&signature.hospital_id)
            .bind(signature.is_verified)
            .bind(signature.confidence_score as i64)
            .bind(entry.timestamp)
            .bind(entry.sequence as i64)
            .execute(&mut *conn)
            .await?;
        }
        (
            LedgerEvent::SignatureVerified {
                id,
                is_verified,
                confidence_score,
            },
            _,
        ) => {
            sqlx::query("UPDATE signatures SET is_verified = ?, confidence_score = ? WHERE id = ?")
                .bind(*is_verified)
                .bind(*confidence_score as i64)
                .bind(*id as i64)
                .execute(&mut *conn)
                .await?;
        }
        (LedgerEvent::SignatureAdminChanged { new, .. }, _) => {
            sqlx::query("UPDATE indexer_state SET signature_admin = ? WHERE id = 1")
                .bind(new.as_str())
                .execute(&mut *conn)
                .await?;
        }
        (
            LedgerEvent::OrganizationRegistered { identity, name },
            Call::RegisterOrganization { org_type, .. },
        ) => {
            sqlx::query(
                r#"
                INSERT INTO organizations (identity, name, org_type, active, can_vote, can_propose, registered_at)
                VALUES (?, ?, ?, 1, 1, 1, ?)
                "#,
            )
            .bind(identity.as_str())
            .bind(name)
            .bind(org_type)
            .bind(entry.timestamp)
            .execute(&mut *conn)
            .await?;
        }
        (
            LedgerEvent::OrganizationStatusUpdated {
                identity,
                active,
                can_vote,
                can_propose,
            },
            _,
        ) => {
            sqlx::query(
                "UPDATE organizations SET active = ?, can_vote = ?, can_propose = ? WHERE identity = ?",
            )
            .bind(*active)
            .bind(*can_vote)
            .bind(*can_propose)
            .bind(identity.as_str())
            .execute(&mut *conn)
            .await?;
        }
        (LedgerEvent::PolicyProposed { id, title, proposer }, Call::ProposePolicy(proposal)) => {
            let row = sqlx::query("SELECT voting_period_secs FROM indexer_state WHERE id = 1")
                .fetch_one(&mut *conn)
                .await?;
            let period: Option<i64> = row.get("voting_period_secs");
            let period = period.ok_or_else(|| {
                TrustError::Database("Policy proposed before genesis was indexed".to_string())
            })?;
            let deadline: DateTime<Utc> = entry.timestamp + Duration::seconds(period);

            sqlx::query(
                r#"
                INSERT INTO policies
                (id, title, description, organ_type, data, proposer, created_at, voting_deadline)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(*id as i64)
            .bind(title)
            .bind(&proposal.description)
            .bind(&proposal.organ_type)
            .bind(&proposal.data)
            .bind(proposer.as_str())
            .bind(entry.timestamp)
            .bind(deadline)
            .execute(&mut *conn)
            .await?;
        }
        (
            LedgerEvent::VoteCast {
                policy_id,
                voter,
                support,
            },
            _,
        ) => {
            sqlx::query("INSERT INTO votes (policy_id, voter, support, cast_at) VALUES (?, ?, ?, ?)")
                .bind(*policy_id as i64)
                .bind(voter.as_str())
                .bind(*support)
                .bind(entry.timestamp)
                .execute(&mut *conn)
                .await?;

            let tally = if *support {
                "UPDATE policies SET yes_votes = yes_votes + 1 WHERE id = ?"
            } else {
                "UPDATE policies SET no_votes = no_votes + 1 WHERE id = ?"
            };
            sqlx::query(tally)
                .bind(*policy_id as i64)
                .execute(&mut *conn)
                .await?;
        }
        (LedgerEvent::PolicyExecuted { id, approved }, _) => {
            sqlx::query("UPDATE policies SET status = ? WHERE id = ?")
                .bind(if *approved { "approved" } else { "rejected" })
                .bind(*id as i64)
                .execute(&mut *conn)
                .await?;
        }
        (LedgerEvent::PolicyAdminChanged { new, .. }, _) => {
            sqlx::query("UPDATE indexer_state SET policy_admin = ? WHERE id = 1")
                .bind(new.as_str())
                .execute(&mut *conn)
                .await?;
        }
        (event, call) => {
            return Err(TrustError::Database(format!(
                "Event {} does not fit call {} at sequence {}",
                event.name(),
                call.name(),
                entry.sequence
            )));
        }
    }
    Ok(())
}

fn signature_from_row(row: &SqliteRow) -> Result<IndexedSignature, TrustError> {
    let confidence: i64 = row.get("confidence_score");
    Ok(IndexedSignature {
        id: row.get::<i64, _>("id") as u64,
        content_hash: row.get("content_hash"),
        signer_name: row.get("signer_name"),
        signer_type: row.get("signer_type"),
        guardian_name: row.get("guardian_name"),
        guardian_relation: row.get("guardian_relation"),
        entity_type: row.get("entity_type"),
        entity_id: row.get::<i64, _>("entity_id") as u64,
        hospital_id: row.get("hospital_id"),
        is_verified: row.get("is_verified"),
        confidence_score: u8::try_from(confidence)
            .map_err(|_| TrustError::Database(format!("Stored confidence {} out of range", confidence)))?,
        anchored_at: row.get("anchored_at"),
        sequence: row.get::<i64, _>("sequence") as u64,
    })
}

fn policy_from_row(row: &SqliteRow) -> Result<IndexedPolicy, TrustError> {
    Ok(IndexedPolicy {
        id: row.get::<i64, _>("id") as u64,
        title: row.get("title"),
        description: row.get("description"),
        organ_type: row.get("organ_type"),
        proposer: row.get("proposer"),
        created_at: row.get("created_at"),
        voting_deadline: row.get("voting_deadline"),
        yes_votes: row.get::<i64, _>("yes_votes") as u64,
        no_votes: row.get::<i64, _>("no_votes") as u64,
        status: row.get("status"),
    })
}
