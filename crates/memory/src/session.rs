//! Per-user session state: rolling history plus a versioned preference
//! snapshot derived from the durable profile.
//!
//! Storage layout in the key/value store:
//! - `{prefix}:{user}:history`  → JSON list of `HistoryEntry`, capped
//! - `{prefix}:{user}:epoch`    → invalidation counter (the snapshot version)
//! - `{prefix}:{user}:snapshot` → cached preferences tagged with the epoch
//!
//! A cached snapshot whose epoch differs from the current one is never
//! served. Invalidation bumps the epoch before dropping the cached copy, so
//! a read racing the invalidation can at worst re-cache a snapshot under
//! the old epoch, which the next read rejects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use strata_config::SessionConfig;
use strata_core::error::StoreError;
use strata_core::record::{HistoryEntry, SessionSnapshot};
use strata_core::store::KeyValueStore;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::persistent::PersistentStore;

#[derive(Debug, Serialize, Deserialize)]
struct CachedPreferences {
    epoch: u64,
    preferences: Value,
    built_at: DateTime<Utc>,
}

pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    persistent: Arc<PersistentStore>,
    config: SessionConfig,
    /// Serialises read-modify-write of history lists and epochs
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, persistent: Arc<PersistentStore>, config: SessionConfig) -> Self {
        Self {
            kv,
            persistent,
            config,
            write_lock: Mutex::new(()),
        }
    }

    fn key(&self, user_id: &str, part: &str) -> String {
        format!("{}:{}:{}", self.config.key_prefix, user_id, part)
    }

    async fn read_epoch(&self, user_id: &str) -> Result<u64, StoreError> {
        let raw = self.kv.get(&self.key(user_id, "epoch")).await?;
        Ok(match raw {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => 0,
        })
    }

    async fn read_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let raw = self.kv.get(&self.key(user_id, "history")).await?;
        Ok(match raw {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        })
    }

    /// The latest snapshot for a user, or the empty version-0 snapshot for
    /// a first-time user.
    ///
    /// If the key/value store is unreachable the snapshot is rebuilt from
    /// the durable profile and not cached. Only a durable-store failure
    /// during rebuild is an error.
    pub async fn get_snapshot(&self, user_id: &str) -> Result<SessionSnapshot, StoreError> {
        let epoch = match self.read_epoch(user_id).await {
            Ok(epoch) => epoch,
            Err(e) => {
                warn!(user_id, error = %e, "Session store unavailable, rebuilding snapshot from persistent store");
                return self.rebuild(user_id, 0, Vec::new()).await;
            }
        };

        let history = self.read_history(user_id).await.unwrap_or_else(|e| {
            warn!(user_id, error = %e, "Session history unreadable");
            Vec::new()
        });

        let cached = match self.kv.get(&self.key(user_id, "snapshot")).await {
            Ok(Some(bytes)) => serde_json::from_slice::<CachedPreferences>(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(user_id, error = %e, "Session snapshot unreadable");
                None
            }
        };

        if let Some(cached) = cached {
            if cached.epoch == epoch {
                debug!(user_id, version = epoch, "Session snapshot hit");
                return Ok(SessionSnapshot {
                    user_id: user_id.to_string(),
                    version: epoch,
                    preferences: cached.preferences,
                    history,
                    built_at: cached.built_at,
                });
            }
            debug!(user_id, cached = cached.epoch, current = epoch, "Discarding snapshot from older epoch");
        }

        let snapshot = self.rebuild(user_id, epoch, history).await?;
        let cached = CachedPreferences {
            epoch,
            preferences: snapshot.preferences.clone(),
            built_at: snapshot.built_at,
        };
        match serde_json::to_vec(&cached) {
            Ok(bytes) => {
                let ttl = Duration::from_secs(self.config.snapshot_ttl_secs);
                if let Err(e) = self.kv.set(&self.key(user_id, "snapshot"), bytes, Some(ttl)).await {
                    warn!(user_id, error = %e, "Failed to cache session snapshot");
                }
            }
            Err(e) => warn!(user_id, error = %e, "Failed to encode session snapshot"),
        }
        Ok(snapshot)
    }

    async fn rebuild(
        &self,
        user_id: &str,
        version: u64,
        history: Vec<HistoryEntry>,
    ) -> Result<SessionSnapshot, StoreError> {
        let mut snapshot = SessionSnapshot::empty(user_id, version);
        snapshot.history = history;
        if let Some(profile) = self.persistent.get_profile(user_id).await? {
            snapshot.preferences = profile.preference_view();
            snapshot.built_at = profile.updated_at;
        }
        Ok(snapshot)
    }

    /// Append a history entry. Best-effort: failures are logged and `None`
    /// is returned, never an error. Returns the assigned sequence.
    pub async fn append_history(&self, user_id: &str, mut entry: HistoryEntry) -> Option<u64> {
        let _lock = self.write_lock.lock().await;

        let mut history = match self.read_history(user_id).await {
            Ok(h) => h,
            Err(e) => {
                warn!(user_id, error = %e, "History append skipped");
                return None;
            }
        };

        entry.seq = history.last().map(|h| h.seq + 1).unwrap_or(1);
        let seq = entry.seq;
        history.push(entry);
        if history.len() > self.config.history_limit {
            let excess = history.len() - self.config.history_limit;
            history.drain(..excess);
        }

        let bytes = match serde_json::to_vec(&history) {
            Ok(b) => b,
            Err(e) => {
                warn!(user_id, error = %e, "History append skipped");
                return None;
            }
        };
        let ttl = Duration::from_secs(self.config.history_ttl_secs);
        match self.kv.set(&self.key(user_id, "history"), bytes, Some(ttl)).await {
            Ok(()) => Some(seq),
            Err(e) => {
                warn!(user_id, error = %e, "History append failed");
                None
            }
        }
    }

    /// The most recent `limit` history entries, oldest first.
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut history = self.read_history(user_id).await?;
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
        Ok(history)
    }

    /// Bump the user's epoch and drop the cached snapshot. Returns the new epoch.
    pub async fn invalidate(&self, user_id: &str) -> Result<u64, StoreError> {
        let _lock = self.write_lock.lock().await;
        let next = self.read_epoch(user_id).await? + 1;
        self.kv
            .set(&self.key(user_id, "epoch"), serde_json::to_vec(&next)?, None)
            .await?;
        self.kv.delete(&self.key(user_id, "snapshot")).await?;
        debug!(user_id, epoch = next, "Session snapshot invalidated");
        Ok(next)
    }

    /// Drop the user's history and cached snapshot. The epoch is kept so
    /// versions stay monotonic.
    pub async fn clear(&self, user_id: &str) -> Result<(), StoreError> {
        let _lock = self.write_lock.lock().await;
        self.kv.delete(&self.key(user_id, "history")).await?;
        self.kv.delete(&self.key(user_id, "snapshot")).await?;
        Ok(())
    }
}
