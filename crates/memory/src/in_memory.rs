//! In-memory backends, useful for testing and single-process deployments.

use crate::vector::{cosine_similarity, sparse_dot};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use strata_core::document::{ScoredId, SearchFilters, SparseTerms, VectorDocument};
use strata_core::error::StoreError;
use strata_core::store::{DocumentStore, InsertOutcome, KeyValueStore, Predicate, VectorIndex};
use tokio::sync::RwLock;
use tokio::time::Instant;

// ── Key/value ─────────────────────────────────────────────────────────────

struct KvEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// A TTL-aware key/value store held in a `BTreeMap`.
///
/// Expiry uses `tokio::time::Instant`, so tests running on a paused clock
/// can advance past TTLs deterministically.
pub struct InMemoryKvStore {
    entries: Arc<RwLock<BTreeMap<String, KvEntry>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(e) if e.is_live(now) => return Ok(Some(e.value.clone())),
                Some(_) => {}
            }
        }
        // Expired: evict unless a writer refreshed it meanwhile
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(key.to_string(), KvEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| e.is_live(now)))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ── Documents ─────────────────────────────────────────────────────────────

/// JSON records grouped by table, keyed by record key.
pub struct InMemoryDocumentStore {
    tables: Arc<RwLock<HashMap<String, BTreeMap<String, Value>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert(&self, table: &str, key: &str, record: Value) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(key) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(key.to_string(), record);
        Ok(InsertOutcome::Inserted)
    }

    async fn upsert(&self, table: &str, key: &str, record: Value) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), record);
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn query(&self, table: &str, predicate: &Predicate) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read().await;
        let rows = match tables.get(table) {
            Some(rows) => rows.values().cloned().collect::<Vec<_>>(),
            None => return Ok(Vec::new()),
        };
        Ok(predicate.apply(rows))
    }
}

// ── Vector index ──────────────────────────────────────────────────────────

/// Brute-force vector index. Filters first, then ranks the survivors.
pub struct InMemoryVectorIndex {
    docs: Arc<RwLock<BTreeMap<String, VectorDocument>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            docs: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort by score descending, then id ascending, and keep `top_k`.
fn rank(mut hits: Vec<ScoredId>, top_k: usize) -> Vec<ScoredId> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(top_k);
    hits
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn upsert(&self, doc: VectorDocument) -> Result<(), StoreError> {
        self.docs.write().await.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn search(
        &self,
        dense: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<ScoredId>, StoreError> {
        let docs = self.docs.read().await;
        let hits = docs
            .values()
            .filter(|d| filters.matches(&d.fields) && !d.dense.is_empty())
            .map(|d| ScoredId {
                id: d.id.clone(),
                score: cosine_similarity(&d.dense, dense),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn search_sparse(
        &self,
        terms: &SparseTerms,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<ScoredId>, StoreError> {
        let docs = self.docs.read().await;
        let hits = docs
            .values()
            .filter(|d| filters.matches(&d.fields))
            .filter_map(|d| {
                let score = sparse_dot(&d.sparse, terms);
                (score > 0.0).then(|| ScoredId {
                    id: d.id.clone(),
                    score,
                })
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<VectorDocument>, StoreError> {
        let docs = self.docs.read().await;
        Ok(ids.iter().filter_map(|id| docs.get(id).cloned()).collect())
    }
}
