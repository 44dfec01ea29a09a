//! Hybrid dense + sparse retrieval with rank fusion and budget fitting.
//!
//! Query pipeline:
//! 1. Embed the query and build its sparse term vector
//! 2. Run dense and sparse searches over the same pre-filtered candidates
//! 3. Fuse the two rankings with RRF
//! 4. Compress each document to the per-document ceiling at a sentence boundary
//! 5. Drop the lowest-ranked whole documents until the aggregate ceiling holds

use crate::vector::{cosine_similarity, reciprocal_rank_fusion, sparse_terms};
use std::collections::HashMap;
use std::sync::Arc;
use strata_config::RetrievalConfig;
use strata_core::document::{FilterFields, RetrievalResult, RetrievedDocument, SearchFilters, VectorDocument};
use strata_core::error::StoreError;
use strata_core::store::{Embedder, VectorIndex};
use strata_core::token;
use tracing::debug;
use uuid::Uuid;

pub struct HybridRetriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Embed `text`, rejecting vectors that do not match the embedder's
    /// declared width.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let dense = self.embedder.embed(text).await?;
        let expected = self.embedder.dimensions();
        if dense.len() != expected {
            return Err(StoreError::EmbeddingFailed(format!(
                "expected {expected} dimensions, got {}",
                dense.len()
            )));
        }
        Ok(dense)
    }

    /// Index a document. Representations are computed once here; every
    /// call yields a fresh id, so re-ingesting the same text adds a new
    /// document rather than mutating the old one.
    pub async fn ingest(&self, text: &str, fields: FilterFields) -> Result<String, StoreError> {
        let dense = self.embed(text).await?;
        let doc = VectorDocument {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            fields,
            dense,
            sparse: sparse_terms(text),
        };
        let id = doc.id.clone();
        self.index.upsert(doc).await?;
        debug!(id = %id, index = self.index.name(), "Document ingested");
        Ok(id)
    }

    /// Retrieve up to `top_k` documents for `text`, optionally fitted to an
    /// aggregate token ceiling.
    pub async fn query(
        &self,
        text: &str,
        filters: &SearchFilters,
        top_k: usize,
        budget: Option<usize>,
    ) -> Result<RetrievalResult, StoreError> {
        if top_k == 0 || budget == Some(0) {
            return Ok(RetrievalResult::default());
        }

        let dense_query = self.embed(text).await?;
        let sparse_query = sparse_terms(text);
        let pool = self.config.candidate_pool.max(top_k);

        let (dense_hits, sparse_hits) = tokio::try_join!(
            self.index.search(&dense_query, filters, pool),
            self.index.search_sparse(&sparse_query, filters, pool),
        )?;

        let mut ids: Vec<String> = dense_hits.iter().map(|h| h.id.clone()).collect();
        for hit in &sparse_hits {
            if !ids.contains(&hit.id) {
                ids.push(hit.id.clone());
            }
        }
        let docs = self.index.fetch(&ids).await?;

        let similarity: HashMap<String, f32> = docs
            .iter()
            .filter(|d| !d.dense.is_empty())
            .map(|d| (d.id.clone(), cosine_similarity(&d.dense, &dense_query)))
            .collect();

        let mut fused = reciprocal_rank_fusion(&dense_hits, &sparse_hits, self.config.rrf_k, &similarity);
        fused.truncate(top_k);

        let by_id: HashMap<&str, &VectorDocument> = docs.iter().map(|d| (d.id.as_str(), d)).collect();
        let per_doc = budget.map_or(self.config.max_doc_tokens, |b| b.min(self.config.max_doc_tokens));

        let documents: Vec<RetrievedDocument> = fused
            .into_iter()
            .filter_map(|hit| {
                let doc = by_id.get(hit.id.as_str())?;
                let snippet = token::compress_to_sentences(&doc.text, per_doc);
                Some(RetrievedDocument {
                    tokens: token::estimate_tokens(&snippet),
                    id: hit.id,
                    score: hit.score,
                    dense_similarity: hit.dense_similarity.max(-1.0),
                    snippet,
                    fields: doc.fields.clone(),
                })
            })
            .collect();

        let result = match budget {
            Some(ceiling) => fit_to_budget(documents, ceiling),
            None => RetrievalResult {
                documents,
                dropped: 0,
            },
        };

        debug!(
            dense = dense_hits.len(),
            sparse = sparse_hits.len(),
            returned = result.documents.len(),
            dropped = result.dropped,
            tokens = result.total_tokens(),
            "Hybrid retrieval complete"
        );
        Ok(result)
    }
}

/// Drop lowest-ranked whole documents until the total fits `ceiling`.
/// Only when the top document alone exceeds the ceiling is its text cut.
pub fn fit_to_budget(mut documents: Vec<RetrievedDocument>, ceiling: usize) -> RetrievalResult {
    let mut dropped = 0;
    while documents.len() > 1 && documents.iter().map(|d| d.tokens).sum::<usize>() > ceiling {
        documents.pop();
        dropped += 1;
    }

    if let Some(top) = documents.first_mut()
        && top.tokens > ceiling
    {
        top.snippet = token::compress_to_sentences(&top.snippet, ceiling);
        top.tokens = token::estimate_tokens(&top.snippet);
        if top.tokens == 0 || top.tokens > ceiling {
            documents.clear();
            dropped += 1;
        }
    }

    RetrievalResult { documents, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryVectorIndex;
    use crate::vector::HashingEmbedder;
    use chrono::NaiveDate;

    fn retriever() -> HybridRetriever {
        HybridRetriever::new(
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(HashingEmbedder::new(256)),
            RetrievalConfig::default(),
        )
    }

    fn fields(symbol: &str, date: (i32, u32, u32)) -> FilterFields {
        FilterFields {
            symbol: Some(symbol.into()),
            doc_type: Some("news".into()),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            user: None,
        }
    }

    fn retrieved(id: &str, tokens: usize) -> RetrievedDocument {
        RetrievedDocument {
            id: id.into(),
            score: 0.0,
            dense_similarity: 0.0,
            snippet: "x".repeat(tokens * 4),
            tokens,
            fields: FilterFields::default(),
        }
    }

    #[tokio::test]
    async fn ingest_assigns_fresh_ids() {
        let r = retriever();
        let a = r.ingest("Apple beats earnings.", fields("AAPL", (2024, 5, 1))).await.unwrap();
        let b = r.ingest("Apple beats earnings.", fields("AAPL", (2024, 5, 1))).await.unwrap();
        assert_ne!(a, b);
    }

    struct ShortEmbedder;

    #[async_trait::async_trait]
    impl Embedder for ShortEmbedder {
        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, StoreError> {
            Ok(vec![1.0; 4])
        }
    }

    #[tokio::test]
    async fn mismatched_embedding_width_is_rejected() {
        let r = HybridRetriever::new(
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(ShortEmbedder),
            RetrievalConfig::default(),
        );
        let err = r.ingest("Apple beats earnings.", fields("AAPL", (2024, 5, 1))).await.unwrap_err();
        assert!(matches!(err, StoreError::EmbeddingFailed(_)));
        assert!(r.query("apple", &SearchFilters::none(), 3, None).await.is_err());
    }

    #[tokio::test]
    async fn query_ranks_relevant_documents_first() {
        let r = retriever();
        let relevant = r
            .ingest("Apple quarterly earnings beat expectations on iPhone sales.", fields("AAPL", (2024, 5, 1)))
            .await
            .unwrap();
        r.ingest("Oil futures slump as inventories build.", fields("XOM", (2024, 5, 1)))
            .await
            .unwrap();

        let result = r
            .query("apple earnings", &SearchFilters::none(), 5, None)
            .await
            .unwrap();
        assert_eq!(result.documents[0].id, relevant);
    }

    #[tokio::test]
    async fn filters_apply_before_ranking() {
        let r = retriever();
        r.ingest("Apple earnings preview.", fields("AAPL", (2024, 1, 10))).await.unwrap();
        let recent = r
            .ingest("Apple earnings recap.", fields("AAPL", (2024, 6, 10)))
            .await
            .unwrap();
        r.ingest("Tesla earnings recap.", fields("TSLA", (2024, 6, 10))).await.unwrap();

        let filters = SearchFilters::none()
            .with_symbols(["AAPL"])
            .since(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        let result = r.query("earnings", &filters, 5, None).await.unwrap();
        assert_eq!(result.ids(), vec![recent.as_str()]);
    }

    #[tokio::test]
    async fn query_is_deterministic() {
        let r = retriever();
        for text in ["Apple news one.", "Apple news two.", "Apple news three."] {
            r.ingest(text, fields("AAPL", (2024, 1, 1))).await.unwrap();
        }
        let first = r.query("apple news", &SearchFilters::none(), 3, None).await.unwrap();
        let second = r.query("apple news", &SearchFilters::none(), 3, None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn budget_is_respected() {
        let r = retriever();
        for i in 0..6 {
            let text = format!("Apple update number {i}. {}", "Details follow here. ".repeat(10));
            r.ingest(&text, fields("AAPL", (2024, 1, 1))).await.unwrap();
        }
        let result = r.query("apple update", &SearchFilters::none(), 6, Some(100)).await.unwrap();
        assert!(result.total_tokens() <= 100);
        assert!(!result.is_empty());
        assert_eq!(result.documents.len() + result.dropped, 6);
    }

    #[tokio::test]
    async fn zero_budget_returns_nothing() {
        let r = retriever();
        r.ingest("Apple.", fields("AAPL", (2024, 1, 1))).await.unwrap();
        let result = r.query("apple", &SearchFilters::none(), 5, Some(0)).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn fit_drops_lowest_ranked_whole_documents() {
        let docs = vec![retrieved("a", 40), retrieved("b", 40), retrieved("c", 40)];
        let result = fit_to_budget(docs, 90);
        assert_eq!(result.ids(), vec!["a", "b"]);
        assert_eq!(result.dropped, 1);
    }

    #[test]
    fn fit_truncates_only_the_top_document() {
        let result = fit_to_budget(vec![retrieved("a", 50), retrieved("b", 5)], 20);
        assert_eq!(result.ids(), vec!["a"]);
        assert!(result.documents[0].tokens <= 20);
        assert_eq!(result.dropped, 1);
    }
}
