//! End-to-end tests for the memory orchestrator.
//!
//! These drive `MemoryManager` through its public API with in-memory
//! stores, swapping in slow or broken stores and classifiers to exercise
//! timeouts and degraded paths. Clock-sensitive tests run on a paused
//! tokio clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use strata_config::StrataConfig;
use strata_context::{KeywordClassifier, MemoryManager, MemoryStores};
use strata_core::classifier::{Classification, IntentClassifier};
use strata_core::context::{ContextRequest, MissingReason};
use strata_core::document::{FilterFields, ScoredId, SearchFilters, SparseTerms, VectorDocument};
use strata_core::error::{ClassifierError, StoreError, WriteError};
use strata_core::event::DomainEvent;
use strata_core::layer::{Intent, MemoryLayer};
use strata_core::record::{AppendOutcome, HistoryEntry, ProfileUpdate, SubjectKey, SummaryPayload};
use strata_core::store::{DocumentStore, InsertOutcome, KeyValueStore, Predicate, VectorIndex};
use strata_memory::{InMemoryDocumentStore, InMemoryVectorIndex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("strata_context=debug,strata_memory=debug")
        .with_test_writer()
        .try_init();
}

// ── Mock stores ──────────────────────────────────────────────────────────

/// A vector index whose searches never finish.
struct HangingIndex;

#[async_trait]
impl VectorIndex for HangingIndex {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn upsert(&self, _doc: VectorDocument) -> Result<(), StoreError> {
        Ok(())
    }

    async fn search(&self, _: &[f32], _: &SearchFilters, _: usize) -> Result<Vec<ScoredId>, StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn search_sparse(&self, _: &SparseTerms, _: &SearchFilters, _: usize) -> Result<Vec<ScoredId>, StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn fetch(&self, _ids: &[String]) -> Result<Vec<VectorDocument>, StoreError> {
        Ok(Vec::new())
    }
}

/// Wraps a real index, delaying searches by a fixed amount.
struct SlowIndex {
    inner: InMemoryVectorIndex,
    delay: Duration,
}

#[async_trait]
impl VectorIndex for SlowIndex {
    fn name(&self) -> &str {
        "slow"
    }

    async fn upsert(&self, doc: VectorDocument) -> Result<(), StoreError> {
        self.inner.upsert(doc).await
    }

    async fn search(&self, dense: &[f32], filters: &SearchFilters, top_k: usize) -> Result<Vec<ScoredId>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.search(dense, filters, top_k).await
    }

    async fn search_sparse(
        &self,
        terms: &SparseTerms,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<ScoredId>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.search_sparse(terms, filters, top_k).await
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<VectorDocument>, StoreError> {
        self.inner.fetch(ids).await
    }
}

/// A document store that is always down.
struct DownDocuments;

#[async_trait]
impl DocumentStore for DownDocuments {
    fn name(&self) -> &str {
        "down"
    }

    async fn insert(&self, _: &str, _: &str, _: serde_json::Value) -> Result<InsertOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn upsert(&self, _: &str, _: &str, _: serde_json::Value) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn get(&self, _: &str, _: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn query(&self, _: &str, _: &Predicate) -> Result<Vec<serde_json::Value>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Durable writes succeed; summary writes do not.
struct SummaryRejectingDocuments {
    inner: InMemoryDocumentStore,
}

#[async_trait]
impl DocumentStore for SummaryRejectingDocuments {
    fn name(&self) -> &str {
        "summary-rejecting"
    }

    async fn insert(&self, table: &str, key: &str, record: serde_json::Value) -> Result<InsertOutcome, StoreError> {
        self.inner.insert(table, key, record).await
    }

    async fn upsert(&self, table: &str, key: &str, record: serde_json::Value) -> Result<(), StoreError> {
        if table == "summaries" {
            return Err(StoreError::QueryFailed("summaries table locked".into()));
        }
        self.inner.upsert(table, key, record).await
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.inner.get(table, key).await
    }

    async fn query(&self, table: &str, predicate: &Predicate) -> Result<Vec<serde_json::Value>, StoreError> {
        self.inner.query(table, predicate).await
    }
}

struct DownKv;

#[async_trait]
impl KeyValueStore for DownKv {
    fn name(&self) -> &str {
        "down-kv"
    }

    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _: &str, _: Vec<u8>, _: Option<Duration>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn scan(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

// ── Mock classifiers ─────────────────────────────────────────────────────

struct FailingClassifier;

#[async_trait]
impl IntentClassifier for FailingClassifier {
    fn name(&self) -> &str {
        "failing"
    }

    async fn classify(&self, _query: &str) -> Result<Classification, ClassifierError> {
        Err(ClassifierError::Failed("model unavailable".into()))
    }
}

struct HangingClassifier;

#[async_trait]
impl IntentClassifier for HangingClassifier {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn classify(&self, _query: &str) -> Result<Classification, ClassifierError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Classification::new(Intent::TradeDecision, 1.0))
    }
}

/// Always returns the same intent, counting calls.
struct FixedClassifier {
    intent: Intent,
    calls: AtomicUsize,
}

#[async_trait]
impl IntentClassifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn classify(&self, _query: &str) -> Result<Classification, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Classification::new(self.intent, 1.0).with_symbols(vec!["AAPL".into()]))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn config() -> StrataConfig {
    StrataConfig::default()
}

fn keyword_manager(stores: MemoryStores) -> MemoryManager {
    MemoryManager::new(&config(), stores, Arc::new(KeywordClassifier::new()))
}

fn aapl_news(day: u32) -> FilterFields {
    FilterFields {
        symbol: Some("AAPL".into()),
        doc_type: Some("news".into()),
        date: NaiveDate::from_ymd_opt(2024, 6, day),
        user: None,
    }
}

/// Populate every layer for user `u1` and run `r1`.
async fn seed(manager: &MemoryManager) {
    manager
        .cache_tool_result("r1", "get_quote", &json!({"symbol": "AAPL"}), &json!({"price": 189.9}), None)
        .await
        .unwrap();
    manager
        .on_profile_updated(
            "u1",
            ProfileUpdate {
                risk_tolerance: Some("moderate".into()),
                trading_style: Some("swing".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    manager
        .record_decision("u1", "d1", "AAPL", "hold", json!({"query": "hold AAPL?", "sentiment": 0.2}))
        .await
        .unwrap();
    manager.append_history("u1", HistoryEntry::user("What about Apple?")).await;
    manager
        .append_history("u1", HistoryEntry::assistant("Apple looks range-bound."))
        .await;
    for day in 1..=4 {
        manager
            .ingest_document(
                &format!("Apple earnings update {day}. iPhone demand remains steady. Margins improved."),
                aapl_news(day),
            )
            .await
            .unwrap();
    }
}

fn trade_request() -> ContextRequest {
    ContextRequest::new("Should I buy AAPL after earnings?", "u1").with_run("r1")
}

// ── Read path ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn price_only_with_empty_run_cache() {
    init_tracing();
    let manager = MemoryManager::in_memory(&config());

    let ctx = manager
        .get_context(&ContextRequest::new("price of AAPL", "u1").with_run("r-empty"))
        .await;

    assert_eq!(ctx.intent, Intent::PriceOnly);
    assert_eq!(ctx.budget, 600);
    assert!(ctx.is_empty());
    assert_eq!(ctx.tokens_used, 0);
    assert_eq!(ctx.layers_attempted.iter().copied().collect::<Vec<_>>(), vec![MemoryLayer::RunCache]);
    assert_eq!(ctx.missing_reason(MemoryLayer::RunCache), Some(MissingReason::Empty));
}

#[tokio::test(start_paused = true)]
async fn trade_decision_uses_all_four_layers() {
    init_tracing();
    let manager = MemoryManager::in_memory(&config());
    seed(&manager).await;

    let ctx = manager.get_context(&trade_request()).await;

    assert_eq!(ctx.intent, Intent::TradeDecision);
    assert_eq!(ctx.symbols, vec!["AAPL"]);
    for layer in MemoryLayer::ALL {
        assert!(ctx.has_layer(layer), "{layer} missing: {:?}", ctx.missing_reason(layer));
    }
    assert!(ctx.layers_missing.is_empty());
    assert!(ctx.tokens_used <= 5000);
    assert_eq!(ctx.budget, 5000);

    let prompt = ctx.to_prompt_context();
    assert!(prompt.contains("189.9"));
    assert!(prompt.contains("AAPL: 1 analyses"));
    assert!(prompt.contains("Apple looks range-bound."));
    assert!(prompt.contains("Apple earnings update"));
}

#[tokio::test(start_paused = true)]
async fn vector_timeout_degrades_gracefully() {
    init_tracing();
    let cfg = config();
    let stores = MemoryStores {
        index: Arc::new(HangingIndex),
        ..MemoryStores::in_memory(&cfg)
    };
    let manager = keyword_manager(stores);
    seed(&manager).await;

    let started = tokio::time::Instant::now();
    let ctx = manager.get_context(&trade_request()).await;

    assert!(!ctx.has_layer(MemoryLayer::Vector));
    assert_eq!(ctx.missing_reason(MemoryLayer::Vector), Some(MissingReason::Timeout));
    assert!(ctx.has_layer(MemoryLayer::RunCache));
    assert!(ctx.has_layer(MemoryLayer::Persistent));
    assert!(ctx.has_layer(MemoryLayer::Session));
    assert!(!ctx.to_prompt_context().contains("[Retrieved Documents]"));
    // Per-layer vector timeout, well inside the deep deadline
    assert!(started.elapsed() <= Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn shared_deadline_caps_slow_layers() {
    init_tracing();
    let mut cfg = config();
    cfg.timeouts.vector_ms = 1000;
    cfg.timeouts.deep_deadline_ms = 120;
    let stores = MemoryStores {
        index: Arc::new(SlowIndex {
            inner: InMemoryVectorIndex::new(),
            delay: Duration::from_millis(500),
        }),
        ..MemoryStores::in_memory(&cfg)
    };
    let manager = MemoryManager::new(&cfg, stores, Arc::new(KeywordClassifier::new()));
    seed(&manager).await;

    let started = tokio::time::Instant::now();
    let ctx = manager.get_context(&trade_request()).await;

    assert_eq!(ctx.missing_reason(MemoryLayer::Vector), Some(MissingReason::Timeout));
    assert!(started.elapsed() <= Duration::from_millis(120));
}

#[tokio::test(start_paused = true)]
async fn slow_but_timely_layer_still_contributes() {
    init_tracing();
    let cfg = config();
    let stores = MemoryStores {
        index: Arc::new(SlowIndex {
            inner: InMemoryVectorIndex::new(),
            delay: Duration::from_millis(40),
        }),
        ..MemoryStores::in_memory(&cfg)
    };
    let manager = keyword_manager(stores);
    seed(&manager).await;

    let ctx = manager.get_context(&trade_request()).await;
    assert!(ctx.has_layer(MemoryLayer::Vector));
}

#[tokio::test(start_paused = true)]
async fn every_attempted_layer_is_accounted_for() {
    init_tracing();
    let manager = MemoryManager::in_memory(&config());
    seed(&manager).await;

    let queries = [
        "price of AAPL",
        "tell me about MSFT",
        "latest news on TSLA",
        "Should I sell NVDA?",
        "what did i decide before",
        "what is my risk tolerance",
        "find reports similar to the Apple one",
        "can you elaborate",
        "hmm",
    ];
    for query in queries {
        let ctx = manager.get_context(&ContextRequest::new(query, "u1").with_run("r1")).await;
        for layer in &ctx.layers_attempted {
            assert!(
                ctx.has_layer(*layer) ^ ctx.layers_missing.contains(layer),
                "{query}: {layer} must be either present or missing"
            );
        }
        for layer in ctx.layers.keys() {
            assert!(ctx.layers_attempted.contains(layer));
        }
        assert!(ctx.tokens_used <= ctx.budget, "{query}");
    }
}

#[tokio::test(start_paused = true)]
async fn repeated_reads_without_writes_are_identical() {
    init_tracing();
    let manager = MemoryManager::in_memory(&config());
    seed(&manager).await;

    let first = manager.get_context(&trade_request()).await;
    let second = manager.get_context(&trade_request()).await;
    assert_eq!(first.layers, second.layers);
    assert_eq!(first.tokens_used, second.tokens_used);
    assert_eq!(first.missing_reasons, second.missing_reasons);
}

#[tokio::test(start_paused = true)]
async fn configured_layers_are_fetched() {
    init_tracing();
    let mut cfg = config();
    cfg.budgets.price_only.layers.vector = Some(300);
    let manager = MemoryManager::in_memory(&cfg);
    seed(&manager).await;

    let ctx = manager
        .get_context(&ContextRequest::new("price of AAPL", "u1").with_run("r1"))
        .await;

    assert_eq!(ctx.intent, Intent::PriceOnly);
    assert!(ctx.layers_attempted.contains(&MemoryLayer::Vector));
    assert!(ctx.has_layer(MemoryLayer::RunCache));
    assert!(ctx.has_layer(MemoryLayer::Vector));
}

#[tokio::test(start_paused = true)]
async fn classifier_failure_fails_closed() {
    init_tracing();
    let cfg = config();
    let manager = MemoryManager::new(&cfg, MemoryStores::in_memory(&cfg), Arc::new(FailingClassifier));
    seed(&manager).await;

    let ctx = manager.get_context(&trade_request()).await;

    assert_eq!(ctx.intent, Intent::Unknown);
    assert_eq!(ctx.budget, cfg.budgets.smallest_total());
    assert_eq!(ctx.layers_attempted.iter().copied().collect::<Vec<_>>(), vec![MemoryLayer::RunCache]);
    assert!(ctx.has_layer(MemoryLayer::RunCache));
}

#[tokio::test(start_paused = true)]
async fn classifier_timeout_fails_closed() {
    init_tracing();
    let cfg = config();
    let manager = MemoryManager::new(&cfg, MemoryStores::in_memory(&cfg), Arc::new(HangingClassifier));

    let ctx = manager.get_context(&trade_request()).await;
    assert_eq!(ctx.intent, Intent::Unknown);
    assert!(!ctx.layers_attempted.contains(&MemoryLayer::Vector));
}

#[tokio::test(start_paused = true)]
async fn durable_store_outage_marks_persistent_unavailable() {
    init_tracing();
    let cfg = config();
    let stores = MemoryStores {
        documents: Arc::new(DownDocuments),
        ..MemoryStores::in_memory(&cfg)
    };
    let manager = MemoryManager::new(
        &cfg,
        stores,
        Arc::new(FixedClassifier {
            intent: Intent::UserHistory,
            calls: AtomicUsize::new(0),
        }),
    );

    let ctx = manager.get_context(&ContextRequest::new("what did i do", "u1")).await;
    assert_eq!(ctx.missing_reason(MemoryLayer::Persistent), Some(MissingReason::Unavailable));
    // Session rebuilds from the durable profile, which is also down
    assert_eq!(ctx.missing_reason(MemoryLayer::Session), Some(MissingReason::Unavailable));
    assert!(ctx.is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_layers_are_published() {
    init_tracing();
    let cfg = config();
    let manager = MemoryManager::new(
        &cfg,
        MemoryStores {
            documents: Arc::new(DownDocuments),
            ..MemoryStores::in_memory(&cfg)
        },
        Arc::new(FixedClassifier {
            intent: Intent::UserHistory,
            calls: AtomicUsize::new(0),
        }),
    );
    let mut rx = manager.events().subscribe();

    manager.get_context(&ContextRequest::new("history", "u1")).await;

    let mut missing = Vec::new();
    let mut assembled = false;
    while let Ok(event) = rx.try_recv() {
        match &*event {
            DomainEvent::LayerMissing { layer, reason, .. } => missing.push((*layer, *reason)),
            DomainEvent::ContextAssembled { tokens_used, .. } => {
                assembled = true;
                assert_eq!(*tokens_used, 0);
            }
            _ => {}
        }
    }
    assert!(assembled);
    assert!(missing.contains(&(MemoryLayer::Persistent, MissingReason::Unavailable)));
}

// ── Write path ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn decision_write_is_idempotent() {
    init_tracing();
    let manager = MemoryManager::in_memory(&config());

    let first = manager
        .record_decision("u1", "d-42", "TSLA", "sell", json!({"sentiment": -0.4}))
        .await
        .unwrap();
    let second = manager
        .record_decision("u1", "d-42", "TSLA", "buy", json!({"sentiment": 0.9}))
        .await
        .unwrap();

    assert_eq!(first, AppendOutcome::Appended { seq: 1 });
    assert_eq!(second, AppendOutcome::Duplicate { seq: 1 });
    assert_eq!(manager.persistent().recent_decisions("u1", None, 10).await.unwrap().len(), 1);

    let summary = manager
        .summaries()
        .get_summary(&SubjectKey::symbol("u1", "TSLA"))
        .await
        .unwrap()
        .unwrap();
    let SummaryPayload::Symbol(symbol) = summary.payload else {
        panic!("expected a symbol summary");
    };
    assert_eq!(symbol.total_analyses, 1);
    assert_eq!(symbol.last_action.as_deref(), Some("sell"));
}

#[tokio::test(start_paused = true)]
async fn written_decisions_are_visible_on_next_read() {
    init_tracing();
    let manager = MemoryManager::in_memory(&config());

    manager
        .record_decision("u1", "d1", "AAPL", "buy", json!({"sentiment": 0.5}))
        .await
        .unwrap();
    let ctx = manager
        .get_context(&ContextRequest::new("what did i decide on AAPL before", "u1"))
        .await;
    let persistent = ctx.layer(MemoryLayer::Persistent).unwrap();
    assert!(persistent.items.iter().any(|i| i.text.contains("1 decisions")));
    assert!(persistent.items.iter().any(|i| i.key == "user:u1:symbol:AAPL"));

    manager
        .record_decision("u1", "d2", "AAPL", "sell", json!({"sentiment": -0.1}))
        .await
        .unwrap();
    let ctx = manager
        .get_context(&ContextRequest::new("what did i decide on AAPL before", "u1"))
        .await;
    let persistent = ctx.layer(MemoryLayer::Persistent).unwrap();
    assert!(persistent.items.iter().any(|i| i.text.contains("2 decisions")));
    assert!(persistent.items.iter().any(|i| i.text.contains("last sell")));
}

#[tokio::test(start_paused = true)]
async fn profile_update_invalidates_session_snapshot() {
    init_tracing();
    let manager = MemoryManager::in_memory(&config());

    let before = manager.session().get_snapshot("u1").await.unwrap();
    assert_eq!(before.version, 0);
    assert!(!before.has_preferences());

    manager
        .on_profile_updated(
            "u1",
            ProfileUpdate {
                preferred_sectors: Some(vec!["semiconductors".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let after = manager.session().get_snapshot("u1").await.unwrap();
    assert!(after.version > before.version);
    assert_eq!(after.preferences["preferred_sectors"], json!(["semiconductors"]));
}

#[tokio::test(start_paused = true)]
async fn durable_failure_surfaces_to_caller() {
    init_tracing();
    let cfg = config();
    let manager = keyword_manager(MemoryStores {
        documents: Arc::new(DownDocuments),
        ..MemoryStores::in_memory(&cfg)
    });

    let err = manager
        .record_decision("u1", "d1", "AAPL", "buy", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::DurableWriteFailure(_)));

    let err = manager
        .on_profile_updated("u1", ProfileUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::DurableWriteFailure(_)));
}

#[tokio::test(start_paused = true)]
async fn derived_state_failures_do_not_fail_the_write() {
    init_tracing();
    let cfg = config();
    let manager = keyword_manager(MemoryStores {
        documents: Arc::new(SummaryRejectingDocuments {
            inner: InMemoryDocumentStore::new(),
        }),
        session: Arc::new(DownKv),
        ..MemoryStores::in_memory(&cfg)
    });
    let mut rx = manager.events().subscribe();

    let outcome = manager
        .record_decision("u1", "d1", "AAPL", "buy", json!({}))
        .await
        .unwrap();
    assert!(matches!(outcome, AppendOutcome::Appended { .. }));
    assert!(manager.persistent().get_decision("d1").await.unwrap().is_some());

    let mut failed_subjects = Vec::new();
    let mut recorded = false;
    while let Ok(event) = rx.try_recv() {
        match &*event {
            DomainEvent::DecisionRecorded { .. } => recorded = true,
            DomainEvent::SummaryRecomputeFailed { subject_key, .. } => failed_subjects.push(subject_key.clone()),
            _ => {}
        }
    }
    assert!(recorded);
    assert!(failed_subjects.contains(&"user:u1".to_string()));
    assert!(failed_subjects.contains(&"user:u1:symbol:AAPL".to_string()));

    let summary = manager.summaries().get_summary(&SubjectKey::user("u1")).await.unwrap();
    assert!(summary.is_none());
}

#[tokio::test(start_paused = true)]
async fn concurrent_tool_fetches_run_once() {
    init_tracing();
    let manager = Arc::new(MemoryManager::in_memory(&config()));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let manager = manager.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            manager
                .cached_or_fetch("r1", "get_ohlcv", &json!({"symbol": "AMD"}), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, StoreError>(json!({"close": 160.2}))
                })
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), json!({"close": 160.2}));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn decisions_survive_reopen_on_sqlite() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.persistent.sqlite_path = Some(dir.path().join("strata.db"));

    {
        let stores = MemoryStores::open(&cfg).await.unwrap();
        let manager = MemoryManager::new(&cfg, stores, Arc::new(KeywordClassifier::new()));
        manager
            .record_decision("u1", "d1", "MSFT", "buy", json!({"sentiment": 0.3}))
            .await
            .unwrap();
    }

    let stores = MemoryStores::open(&cfg).await.unwrap();
    let manager = MemoryManager::new(&cfg, stores, Arc::new(KeywordClassifier::new()));
    let again = manager
        .record_decision("u1", "d1", "MSFT", "buy", json!({}))
        .await
        .unwrap();
    assert!(again.is_duplicate());
    let summary = manager.summaries().get_summary(&SubjectKey::user("u1")).await.unwrap();
    assert!(summary.is_some());
}
