//! Vector documents, search filters and retrieval results.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sparse lexical representation: term → weight.
pub type SparseTerms = BTreeMap<String, f32>;

/// Metadata a document can be pre-filtered on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// A document in the hybrid index.
///
/// Dense and sparse representations are computed once at ingestion and never
/// mutated; re-ingesting the same logical document produces a new `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub fields: FilterFields,
    #[serde(skip)]
    pub dense: Vec<f32>,
    #[serde(default)]
    pub sparse: SparseTerms,
}

/// Pre-ranking filters. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub doc_types: Vec<String>,
    /// Inclusive lower bound on the document date
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub users: Vec<String>,
}

impl SearchFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_symbols(mut self, symbols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_doc_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.doc_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_users(mut self, users: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }

    pub fn since(mut self, date: NaiveDate) -> Self {
        self.date_from = Some(date);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty() && self.doc_types.is_empty() && self.date_from.is_none() && self.users.is_empty()
    }

    /// Whether a document's fields pass every active filter.
    /// A document lacking a filtered field never matches that filter.
    pub fn matches(&self, fields: &FilterFields) -> bool {
        fn any_of(allowed: &[String], value: &Option<String>) -> bool {
            allowed.is_empty()
                || value
                    .as_deref()
                    .is_some_and(|v| allowed.iter().any(|a| a.eq_ignore_ascii_case(v)))
        }

        let date_ok = match (self.date_from, fields.date) {
            (None, _) => true,
            (Some(from), Some(date)) => date >= from,
            (Some(_), None) => false,
        };

        date_ok
            && any_of(&self.symbols, &fields.symbol)
            && any_of(&self.doc_types, &fields.doc_type)
            && any_of(&self.users, &fields.user)
    }
}

/// A ranked id as returned by a single index search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// One document in a fused, budget-fitted retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    /// Fusion score (sum of reciprocal ranks), not a raw similarity
    pub score: f32,
    /// Raw dense similarity, kept for tie-breaking and diagnostics
    pub dense_similarity: f32,
    pub snippet: String,
    pub tokens: usize,
    #[serde(default)]
    pub fields: FilterFields,
}

/// Ordered output of the hybrid retriever.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub documents: Vec<RetrievedDocument>,
    /// Documents dropped to fit the aggregate token ceiling
    pub dropped: usize,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.documents.iter().map(|d| d.tokens).sum()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.id.as_str()).collect()
    }
}
