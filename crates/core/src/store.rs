//! Store traits: the wire-level collaborators the memory tiers are built on.
//!
//! Each tier talks to its backing store only through these traits:
//! - `KeyValueStore` (run cache, session store)
//! - `DocumentStore` (profiles, decision log, summaries)
//! - `VectorIndex` + `Embedder` (hybrid retrieval)
//!
//! Implementations: in-memory (for testing and single-process use) and SQLite
//! live in `strata-memory`.

use crate::document::{ScoredId, SearchFilters, SparseTerms, VectorDocument};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::time::Duration;

/// Byte-oriented key/value store with optional per-key TTL.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "redis").
    fn name(&self) -> &str;

    /// Read a key. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a key, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// List live keys starting with `prefix`, in lexicographic order.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Outcome of an insert into a keyed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same key already exists; nothing was written.
    Duplicate,
}

/// Sort direction for `Predicate::order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A minimal, backend-agnostic query over JSON records:
/// field equality, one sort key, and a limit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default)]
    pub equals: Vec<(String, Value)>,
    #[serde(default)]
    pub order_by: Option<(String, SortOrder)>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Predicate {
    /// Match every record in the table.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies every equality condition.
    pub fn matches(&self, record: &Value) -> bool {
        self.equals
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }

    /// Filter, sort and limit an in-memory set of records.
    pub fn apply(&self, records: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut out: Vec<Value> = records.into_iter().filter(|r| self.matches(r)).collect();
        if let Some((field, order)) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_json(a.get(field), b.get(field));
                match order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Total order over optional JSON scalars: missing < numbers < strings < other.
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Durable relational/document store holding JSON records in named tables.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert a record under `key`. Never overwrites: an existing key yields
    /// `InsertOutcome::Duplicate`. Durable once `Ok` is returned.
    async fn insert(&self, table: &str, key: &str, record: Value) -> Result<InsertOutcome, StoreError>;

    /// Insert or replace the record under `key`.
    async fn upsert(&self, table: &str, key: &str, record: Value) -> Result<(), StoreError>;

    /// Point lookup by key.
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Query records matching a predicate.
    async fn query(&self, table: &str, predicate: &Predicate) -> Result<Vec<Value>, StoreError>;
}

/// Vector index supporting dense and sparse search over the same documents.
///
/// Filters are applied *before* ranking, so `top_k` is satisfied from the
/// filtered set whenever enough documents match.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Add a document. Documents are immutable once stored.
    async fn upsert(&self, doc: VectorDocument) -> Result<(), StoreError>;

    /// Rank filtered documents by dense similarity (descending).
    async fn search(
        &self,
        dense: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<ScoredId>, StoreError>;

    /// Rank filtered documents by sparse term overlap (descending).
    async fn search_sparse(
        &self,
        terms: &SparseTerms,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<ScoredId>, StoreError>;

    /// Load full documents by id. Unknown ids are skipped.
    async fn fetch(&self, ids: &[String]) -> Result<Vec<VectorDocument>, StoreError>;
}

/// Produces dense embeddings for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError>;
}
