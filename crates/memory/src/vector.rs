//! Vector similarity, lexical term weighting and rank fusion.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Sparse term vectors (log-scaled term frequency, L2-normalised)
//! - Reciprocal Rank Fusion (RRF) for merging ranked result lists
//! - A deterministic feature-hashing embedder

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use strata_core::document::{ScoredId, SparseTerms};
use strata_core::error::StoreError;
use strata_core::store::Embedder;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it", "of", "on", "or",
    "that", "the", "to", "was", "were", "will", "with", "what", "how", "me", "my", "i",
];

/// Lower-cased alphanumeric tokens, stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Sparse lexical representation of `text`: `1 + ln(tf)` per term, L2-normalised.
pub fn sparse_terms(text: &str) -> SparseTerms {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_default() += 1;
    }

    let mut terms: SparseTerms = counts
        .into_iter()
        .map(|(term, tf)| (term, 1.0 + (tf as f32).ln()))
        .collect();

    let norm = terms.values().map(|w| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        terms.values_mut().for_each(|w| *w /= norm);
    }
    terms
}

/// Dot product over shared terms.
pub fn sparse_dot(a: &SparseTerms, b: &SparseTerms) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum()
}

/// One fused result.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    /// Sum of reciprocal ranks across the input rankings
    pub score: f32,
    /// Raw dense similarity used for tie-breaking
    pub dense_similarity: f32,
}

/// Reciprocal Rank Fusion (RRF): merge a dense and a sparse ranking.
///
/// Each id's score is `Σ 1/(k + rank)` with 1-based ranks; an id absent
/// from a ranking contributes nothing for it. Ties are broken by higher
/// dense similarity, then by id, so the output is fully deterministic.
///
/// `similarity` supplies dense similarities for ids missing from `dense`.
pub fn reciprocal_rank_fusion(
    dense: &[ScoredId],
    sparse: &[ScoredId],
    k: u32,
    similarity: &HashMap<String, f32>,
) -> Vec<FusedHit> {
    let k = k as f32;
    let mut scores: HashMap<&str, f32> = HashMap::new();

    for ranking in [dense, sparse] {
        for (rank, hit) in ranking.iter().enumerate() {
            *scores.entry(hit.id.as_str()).or_default() += 1.0 / (k + rank as f32 + 1.0);
        }
    }

    let dense_scores: HashMap<&str, f32> = dense.iter().map(|h| (h.id.as_str(), h.score)).collect();

    let mut fused: Vec<FusedHit> = scores
        .into_iter()
        .map(|(id, score)| FusedHit {
            id: id.to_string(),
            score,
            dense_similarity: similarity
                .get(id)
                .or_else(|| dense_scores.get(id))
                .copied()
                .unwrap_or(f32::NEG_INFINITY),
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.dense_similarity
                    .partial_cmp(&a.dense_similarity)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

/// Deterministic feature-hashing embedder.
///
/// Hashes unigrams and adjacent bigrams into a fixed number of signed
/// buckets and L2-normalises the result. Stable across processes and
/// platforms, so it can back a durable index.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut out = vec![0.0f32; self.dimensions];

        let bigrams = tokens.windows(2).map(|w| format!("{} {}", w[0], w[1]));
        for feature in tokens.iter().cloned().chain(bigrams) {
            let digest = Sha256::digest(feature.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            out[idx] += sign;
        }

        let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            out.iter_mut().for_each(|v| *v /= norm);
        }
        out
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        Ok(self.embed_sync(text))
    }
}
