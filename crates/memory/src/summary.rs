//! Write-time summaries.
//!
//! Summaries are recomputed synchronously right after the write that
//! touches their subject and stored with the write-sequence watermark they
//! reflect. Reads never aggregate: they return the stored record, or
//! nothing when it is missing or older than the subject's latest write.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use strata_core::error::StoreError;
use strata_core::record::{
    DecisionDigest, SubjectKey, SummaryPayload, SummaryRecord, SymbolSummary, UserSummary,
};
use strata_core::store::DocumentStore;
use tracing::debug;

use crate::persistent::PersistentStore;

const SUMMARIES: &str = "summaries";

pub struct SummaryIndex {
    docs: Arc<dyn DocumentStore>,
    persistent: Arc<PersistentStore>,
    recent_len: usize,
}

impl SummaryIndex {
    pub fn new(docs: Arc<dyn DocumentStore>, persistent: Arc<PersistentStore>, recent_len: usize) -> Self {
        Self {
            docs,
            persistent,
            recent_len,
        }
    }

    /// The write sequence a fresh summary for `subject` must reflect.
    async fn watermark(&self, subject: &SubjectKey) -> Result<u64, StoreError> {
        match subject {
            SubjectKey::User { user_id } => self.persistent.latest_seq(user_id).await,
            SubjectKey::Symbol { user_id, symbol } => Ok(self
                .persistent
                .recent_decisions(user_id, Some(symbol), 1)
                .await?
                .first()
                .map(|d| d.seq)
                .unwrap_or(0)),
        }
    }

    /// Serve the stored summary, or `None` if absent or stale.
    pub async fn get_summary(&self, subject: &SubjectKey) -> Result<Option<SummaryRecord>, StoreError> {
        let key = subject.to_string();
        let Some(value) = self.docs.get(SUMMARIES, &key).await? else {
            return Ok(None);
        };
        let record: SummaryRecord = serde_json::from_value(value)?;

        let watermark = self.watermark(subject).await?;
        if record.derived_at_version < watermark {
            debug!(subject = %key, derived_at = record.derived_at_version, watermark, "Stale summary treated as absent");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Rebuild the summary for `subject` from the durable store.
    pub async fn recompute(&self, subject: &SubjectKey) -> Result<SummaryRecord, StoreError> {
        // Read the watermark first: a write landing mid-recompute leaves this
        // record conservatively stale instead of wrongly fresh.
        let watermark = self.watermark(subject).await?;

        let payload = match subject {
            SubjectKey::User { user_id } => SummaryPayload::User(self.user_summary(user_id).await?),
            SubjectKey::Symbol { user_id, symbol } => {
                SummaryPayload::Symbol(self.symbol_summary(user_id, symbol).await?)
            }
        };

        let record = SummaryRecord {
            subject_key: subject.to_string(),
            derived_at_version: watermark,
            payload,
            derived_at: Utc::now(),
        };

        // Never replace a newer summary with an older one
        if let Some(existing) = self.docs.get(SUMMARIES, &record.subject_key).await?
            && let Ok(existing) = serde_json::from_value::<SummaryRecord>(existing)
            && existing.derived_at_version > record.derived_at_version
        {
            return Ok(existing);
        }

        self.docs
            .upsert(SUMMARIES, &record.subject_key, serde_json::to_value(&record)?)
            .await?;
        debug!(subject = %record.subject_key, version = watermark, "Summary recomputed");
        Ok(record)
    }

    async fn user_summary(&self, user_id: &str) -> Result<UserSummary, StoreError> {
        let profile = self.persistent.get_profile(user_id).await?;
        let decisions = self.persistent.all_decisions(user_id, None).await?;

        let symbols: BTreeSet<String> = decisions.iter().map(|d| d.symbol.clone()).collect();
        let last_decision = decisions.iter().map(|d| d.recorded_at).max();
        let last_profile = profile.as_ref().map(|p| p.updated_at);

        Ok(UserSummary {
            user_id: user_id.to_string(),
            risk_tolerance: profile.as_ref().and_then(|p| p.risk_tolerance.clone()),
            preferred_sectors: profile.as_ref().map(|p| p.preferred_sectors.clone()).unwrap_or_default(),
            trading_style: profile.as_ref().and_then(|p| p.trading_style.clone()),
            total_decisions: decisions.len() as u64,
            symbols_analyzed: symbols.into_iter().collect(),
            last_active: last_decision.max(last_profile),
        })
    }

    async fn symbol_summary(&self, user_id: &str, symbol: &str) -> Result<SymbolSummary, StoreError> {
        let decisions = self.persistent.all_decisions(user_id, Some(symbol)).await?;

        let sentiments: Vec<f64> = decisions.iter().filter_map(|d| d.sentiment).collect();
        let avg_sentiment = (!sentiments.is_empty()).then(|| sentiments.iter().sum::<f64>() / sentiments.len() as f64);

        Ok(SymbolSummary {
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            total_analyses: decisions.len() as u64,
            last_action: decisions.first().map(|d| d.action.clone()),
            last_recorded_at: decisions.first().map(|d| d.recorded_at),
            recent: decisions
                .iter()
                .take(self.recent_len)
                .map(|d| DecisionDigest {
                    action: d.action.clone(),
                    sentiment: d.sentiment,
                    recorded_at: d.recorded_at,
                })
                .collect(),
            avg_sentiment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryDocumentStore;
    use strata_core::record::{DecisionRecord, ProfileUpdate};

    fn setup() -> (Arc<PersistentStore>, SummaryIndex) {
        let docs: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let persistent = Arc::new(PersistentStore::new(docs.clone()));
        let index = SummaryIndex::new(docs, persistent.clone(), 5);
        (persistent, index)
    }

    #[tokio::test]
    async fn missing_summary_is_absent() {
        let (_, index) = setup();
        assert!(index.get_summary(&SubjectKey::user("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_recompute_then_read() {
        let (persistent, index) = setup();
        let d = DecisionRecord::new("d1", "u1", "AAPL", "buy").with_sentiment(0.6);
        persistent.append_decision(d.clone()).await.unwrap();
        for subject in d.subjects() {
            index.recompute(&subject).await.unwrap();
        }

        let user = index.get_summary(&SubjectKey::user("u1")).await.unwrap().unwrap();
        match user.payload {
            SummaryPayload::User(u) => {
                assert_eq!(u.total_decisions, 1);
                assert_eq!(u.symbols_analyzed, vec!["AAPL".to_string()]);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let sym = index
            .get_summary(&SubjectKey::symbol("u1", "AAPL"))
            .await
            .unwrap()
            .unwrap();
        match sym.payload {
            SummaryPayload::Symbol(s) => {
                assert_eq!(s.last_action.as_deref(), Some("buy"));
                assert_eq!(s.avg_sentiment, Some(0.6));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn summary_goes_stale_after_unsummarised_write() {
        let (persistent, index) = setup();
        persistent
            .append_decision(DecisionRecord::new("d1", "u1", "AAPL", "buy"))
            .await
            .unwrap();
        index.recompute(&SubjectKey::user("u1")).await.unwrap();
        assert!(index.get_summary(&SubjectKey::user("u1")).await.unwrap().is_some());

        // Profile write without a recompute
        persistent
            .update_profile(
                "u1",
                ProfileUpdate {
                    risk_tolerance: Some("low".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(index.get_summary(&SubjectKey::user("u1")).await.unwrap().is_none());

        // Symbol summaries only track their own symbol's decisions
        index.recompute(&SubjectKey::symbol("u1", "AAPL")).await.unwrap();
        persistent
            .append_decision(DecisionRecord::new("d2", "u1", "TSLA", "sell"))
            .await
            .unwrap();
        assert!(
            index
                .get_summary(&SubjectKey::symbol("u1", "AAPL"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn symbol_summary_keeps_recent_five_newest_first() {
        let (persistent, index) = setup();
        for i in 0..7 {
            let action = if i % 2 == 0 { "buy" } else { "sell" };
            persistent
                .append_decision(DecisionRecord::new(format!("d{i}"), "u1", "MSFT", action))
                .await
                .unwrap();
        }
        let record = index.recompute(&SubjectKey::symbol("u1", "MSFT")).await.unwrap();
        let SummaryPayload::Symbol(s) = record.payload else {
            panic!("expected symbol summary");
        };
        assert_eq!(s.total_analyses, 7);
        assert_eq!(s.recent.len(), 5);
        assert_eq!(s.recent[0].action, "buy"); // d6
        assert_eq!(s.avg_sentiment, None);
        assert_eq!(record.derived_at_version, 7);
    }
}
