//! Durable profile and decision log.
//!
//! This store is the single source of truth for user profiles and
//! decisions. Every mutation takes the next value of a per-user write
//! sequence; summaries record the sequence they were derived at, which is
//! how staleness is detected without read-time aggregation.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use strata_core::error::StoreError;
use strata_core::record::{AppendOutcome, DecisionRecord, ProfileUpdate, UserProfile};
use strata_core::store::{DocumentStore, InsertOutcome, Predicate, SortOrder};
use tokio::sync::Mutex;
use tracing::{debug, info};

const PROFILES: &str = "profiles";
const DECISIONS: &str = "decisions";
const SEQUENCES: &str = "user_sequences";

pub struct PersistentStore {
    docs: Arc<dyn DocumentStore>,
    /// Serialises sequence allocation with the write that uses it
    write_lock: Mutex<()>,
}

impl PersistentStore {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self {
            docs,
            write_lock: Mutex::new(()),
        }
    }

    /// The latest write sequence for a user (0 if they never wrote).
    pub async fn latest_seq(&self, user_id: &str) -> Result<u64, StoreError> {
        let row = self.docs.get(SEQUENCES, user_id).await?;
        Ok(row.and_then(|r| r.get("seq").and_then(|s| s.as_u64())).unwrap_or(0))
    }

    /// Allocate the next sequence. Caller must hold `write_lock`.
    async fn next_seq(&self, user_id: &str) -> Result<u64, StoreError> {
        let next = self.latest_seq(user_id).await? + 1;
        self.docs
            .upsert(SEQUENCES, user_id, json!({ "user_id": user_id, "seq": next }))
            .await?;
        Ok(next)
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        match self.docs.get(PROFILES, user_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update, creating the profile if needed.
    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<UserProfile, StoreError> {
        let _lock = self.write_lock.lock().await;

        let mut profile = self
            .get_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(user_id));
        update.apply_to(&mut profile);
        profile.seq = self.next_seq(user_id).await?;
        profile.updated_at = Utc::now();

        self.docs
            .upsert(PROFILES, user_id, serde_json::to_value(&profile)?)
            .await?;
        info!(user_id, seq = profile.seq, "Profile updated");
        Ok(profile)
    }

    /// Append a decision. Idempotent on `decision_id`: a repeated id returns
    /// `Duplicate` with the originally assigned sequence and writes nothing.
    pub async fn append_decision(&self, mut record: DecisionRecord) -> Result<AppendOutcome, StoreError> {
        let _lock = self.write_lock.lock().await;

        if let Some(existing) = self.docs.get(DECISIONS, &record.decision_id).await? {
            let seq = existing.get("seq").and_then(|s| s.as_u64()).unwrap_or(0);
            debug!(decision_id = %record.decision_id, seq, "Duplicate decision ignored");
            return Ok(AppendOutcome::Duplicate { seq });
        }

        record.seq = self.next_seq(&record.user_id).await?;
        let seq = record.seq;
        let outcome = self
            .docs
            .insert(DECISIONS, &record.decision_id, serde_json::to_value(&record)?)
            .await?;

        match outcome {
            InsertOutcome::Inserted => {
                info!(
                    user_id = %record.user_id,
                    decision_id = %record.decision_id,
                    symbol = %record.symbol,
                    seq,
                    "Decision appended"
                );
                Ok(AppendOutcome::Appended { seq })
            }
            // Another process won the race for this id
            InsertOutcome::Duplicate => {
                let existing = self.docs.get(DECISIONS, &record.decision_id).await?;
                let seq = existing
                    .and_then(|r| r.get("seq").and_then(|s| s.as_u64()))
                    .unwrap_or(seq);
                Ok(AppendOutcome::Duplicate { seq })
            }
        }
    }

    /// A single decision by id.
    pub async fn get_decision(&self, decision_id: &str) -> Result<Option<DecisionRecord>, StoreError> {
        match self.docs.get(DECISIONS, decision_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Most recent decisions for a user, newest first, optionally for one symbol.
    pub async fn recent_decisions(
        &self,
        user_id: &str,
        symbol: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        let mut predicate = Predicate::all().eq("user_id", user_id);
        if let Some(symbol) = symbol {
            predicate = predicate.eq("symbol", symbol.trim().to_ascii_uppercase());
        }
        let predicate = predicate.order_by("seq", SortOrder::Desc).limit(limit);
        self.decisions(&predicate).await
    }

    /// Every decision of a user, newest first.
    pub async fn all_decisions(&self, user_id: &str, symbol: Option<&str>) -> Result<Vec<DecisionRecord>, StoreError> {
        let mut predicate = Predicate::all().eq("user_id", user_id);
        if let Some(symbol) = symbol {
            predicate = predicate.eq("symbol", symbol.trim().to_ascii_uppercase());
        }
        self.decisions(&predicate.order_by("seq", SortOrder::Desc)).await
    }

    async fn decisions(&self, predicate: &Predicate) -> Result<Vec<DecisionRecord>, StoreError> {
        self.docs
            .query(DECISIONS, predicate)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }
}
