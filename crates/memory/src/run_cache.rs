//! Run-scoped tool result cache.
//!
//! Within one multi-step execution (a "run") several steps often ask for the
//! same tool result. Entries are keyed by `(run_id, tool, argument
//! fingerprint)` and live in an external key/value store until the run is
//! released or their TTL lapses, whichever comes first.
//!
//! Storage layout: `{prefix}:{run_id}:{tool}:{fingerprint}` → JSON bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::Duration;
use strata_config::RunCacheConfig;
use strata_core::error::StoreError;
use strata_core::store::KeyValueStore;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Hex characters kept from the SHA-256 argument digest.
const FINGERPRINT_LEN: usize = 16;

/// Identifies one tool invocation within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub tool: String,
    pub fingerprint: String,
}

impl CacheKey {
    /// Build a key from a tool name and its arguments.
    ///
    /// `serde_json` maps are ordered, so the serialized form is canonical:
    /// argument order never changes the fingerprint.
    pub fn new(tool: impl Into<String>, args: &Value) -> Self {
        let canonical = serde_json::to_string(args).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            tool: tool.into(),
            fingerprint: hex[..FINGERPRINT_LEN].to_string(),
        }
    }
}

/// One live entry of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub tool: String,
    pub fingerprint: String,
    pub value: Value,
}

impl CachedResult {
    /// `tool:fingerprint`, unique within a run.
    pub fn key(&self) -> String {
        format!("{}:{}", self.tool, self.fingerprint)
    }
}

type Gates = Arc<SyncMutex<HashMap<String, Arc<Mutex<()>>>>>;

pub struct RunCache {
    store: Arc<dyn KeyValueStore>,
    config: RunCacheConfig,
    /// Per-key locks for in-process single-flight
    inflight: Gates,
}

/// A caller's claim on a single-flight gate.
///
/// Dropping it, on completion or on cancellation, removes the gate once no
/// other caller holds it.
struct FlightTicket {
    inflight: Gates,
    key: String,
    gate: Arc<Mutex<()>>,
}

impl FlightTicket {
    fn join(inflight: &Gates, key: String) -> Self {
        let gate = inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        Self {
            inflight: inflight.clone(),
            key,
            gate,
        }
    }
}

impl Drop for FlightTicket {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        // The map holds one reference and this ticket another
        if Arc::strong_count(&self.gate) <= 2 {
            inflight.remove(&self.key);
        }
    }
}

impl RunCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RunCacheConfig) -> Self {
        Self {
            store,
            config,
            inflight: Arc::new(SyncMutex::new(HashMap::new())),
        }
    }

    fn run_prefix(&self, run_id: &str) -> String {
        format!("{}:{}:", self.config.key_prefix, run_id)
    }

    fn storage_key(&self, run_id: &str, key: &CacheKey) -> String {
        format!("{}{}:{}", self.run_prefix(run_id), key.tool, key.fingerprint)
    }

    /// Store a tool result. `ttl = None` uses the tool family's TTL.
    pub async fn put(
        &self,
        run_id: &str,
        key: &CacheKey,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(&key.tool));
        let bytes = serde_json::to_vec(value)?;
        self.store
            .set(&self.storage_key(run_id, key), bytes, Some(ttl))
            .await?;
        debug!(run_id, tool = %key.tool, ttl_secs = ttl.as_secs(), "Run cache put");
        Ok(())
    }

    /// Read a tool result. A miss is `Ok(None)`; an unreachable store is `Err`.
    pub async fn get(&self, run_id: &str, key: &CacheKey) -> Result<Option<Value>, StoreError> {
        let raw = self.store.get(&self.storage_key(run_id, key)).await?;
        match raw {
            Some(bytes) => {
                debug!(run_id, tool = %key.tool, "Run cache hit");
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => {
                debug!(run_id, tool = %key.tool, "Run cache miss");
                Ok(None)
            }
        }
    }

    /// All live entries of a run, sorted by key.
    pub async fn entries(&self, run_id: &str) -> Result<Vec<CachedResult>, StoreError> {
        let prefix = self.run_prefix(run_id);
        let keys = self.store.scan(&prefix).await?;

        let mut out = Vec::with_capacity(keys.len());
        for storage_key in keys {
            let Some(rest) = storage_key.strip_prefix(&prefix) else {
                continue;
            };
            let Some((tool, fingerprint)) = rest.rsplit_once(':') else {
                warn!(key = %storage_key, "Malformed run cache key");
                continue;
            };
            // Expired between scan and get
            let Some(bytes) = self.store.get(&storage_key).await? else {
                continue;
            };
            match serde_json::from_slice(&bytes) {
                Ok(value) => out.push(CachedResult {
                    tool: tool.to_string(),
                    fingerprint: fingerprint.to_string(),
                    value,
                }),
                Err(e) => warn!(key = %storage_key, error = %e, "Undecodable run cache entry"),
            }
        }
        Ok(out)
    }

    /// Delete every entry of a finished run. Returns how many were removed.
    pub async fn release(&self, run_id: &str) -> Result<usize, StoreError> {
        let prefix = self.run_prefix(run_id);
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, gate| !key.starts_with(&prefix) || Arc::strong_count(gate) > 1);

        let keys = self.store.scan(&prefix).await?;
        let mut removed = 0;
        for key in keys {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        debug!(run_id, removed, "Run released");
        Ok(removed)
    }

    /// Return the cached value, or run `fetch`, cache its result and return it.
    ///
    /// Concurrent callers for the same `(run_id, key)` in this process are
    /// coalesced: one runs `fetch`, the others wait and read its result.
    /// A failed fetch is not cached; the next waiter fetches again.
    pub async fn get_or_fetch<F, Fut, E>(&self, run_id: &str, key: &CacheKey, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: From<StoreError>,
    {
        let ticket = FlightTicket::join(&self.inflight, self.storage_key(run_id, key));
        let _held = ticket.gate.lock().await;

        if let Some(value) = self.get(run_id, key).await? {
            return Ok(value);
        }
        let value = fetch().await?;
        if let Err(e) = self.put(run_id, key, &value, None).await {
            warn!(run_id, tool = %key.tool, error = %e, "Failed to cache fetched tool result");
        }
        Ok(value)
    }
}
