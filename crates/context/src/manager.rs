//! The memory orchestrator.
//!
//! Read path (`get_context`):
//! 1. Classify the query (bounded by the classifier timeout; failure is
//!    treated as `Intent::Unknown`)
//! 2. Allocate a token budget for the intent
//! 3. Fetch every required layer concurrently, each under
//!    `min(layer timeout, time left before the request deadline)`
//! 4. Enforce the budget and report which layers are missing and why
//!
//! Write path: decisions and profile updates go to the durable store
//! first; summaries are recomputed and the session snapshot invalidated
//! right after. Only the durable write can fail the call.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use strata_config::{StrataConfig, TimeoutsConfig};
use strata_core::classifier::{Classification, IntentClassifier};
use strata_core::context::{ContextItem, ContextRequest, LayerContent, MemoryContext, MissingReason, TokenBudget};
use strata_core::document::{FilterFields, SearchFilters};
use strata_core::error::{ClassifierError, LayerError, StoreError, WriteError};
use strata_core::event::{DomainEvent, EventBus};
use strata_core::layer::MemoryLayer;
use strata_core::record::{
    AppendOutcome, DecisionRecord, HistoryEntry, ProfileUpdate, SubjectKey, UserProfile,
};
use strata_core::store::{DocumentStore, Embedder, KeyValueStore, VectorIndex};
use strata_memory::{
    CacheKey, HashingEmbedder, HybridRetriever, InMemoryDocumentStore, InMemoryKvStore, InMemoryVectorIndex,
    PersistentStore, RunCache, SessionStore, SummaryIndex,
};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::assembler::ContextAssembler;
use crate::budget::TokenBudgetAllocator;
use crate::classifier::KeywordClassifier;

/// Key of the session item carrying the preference object.
pub const PREFERENCES_KEY: &str = "preferences";

/// Recent decisions listed under the persistent layer.
const RECENT_DECISIONS: usize = 5;

/// The backing stores a manager is built on.
#[derive(Clone)]
pub struct MemoryStores {
    pub run_cache: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
}

impl MemoryStores {
    /// Process-local stores for every tier.
    pub fn in_memory(config: &StrataConfig) -> Self {
        Self {
            run_cache: Arc::new(InMemoryKvStore::new()),
            session: Arc::new(InMemoryKvStore::new()),
            documents: Arc::new(InMemoryDocumentStore::new()),
            index: Arc::new(InMemoryVectorIndex::new()),
            embedder: Arc::new(HashingEmbedder::new(config.retrieval.embedding_dimensions)),
        }
    }

    /// In-memory stores, with the durable tier on the configured backend.
    pub async fn open(config: &StrataConfig) -> Result<Self, StoreError> {
        let mut stores = Self::in_memory(config);
        match config.persistent.backend.as_str() {
            "memory" => {}
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let path = config.persistent.database_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Unavailable(format!("Cannot create {}: {e}", parent.display())))?;
                }
                let docs = strata_memory::SqliteDocumentStore::new(&path.display().to_string()).await?;
                stores.documents = Arc::new(docs);
            }
            other => {
                return Err(StoreError::Unavailable(format!("Unsupported persistent backend: {other}")));
            }
        }
        Ok(stores)
    }
}

/// What a layer fetch needs to know about the request.
struct FetchRequest {
    user_id: String,
    query: String,
    run_id: Option<String>,
    symbols: Vec<String>,
}

/// The memory tiers, shared with fetch tasks.
struct Tiers {
    run_cache: RunCache,
    session: SessionStore,
    persistent: Arc<PersistentStore>,
    summaries: SummaryIndex,
    retriever: HybridRetriever,
    history_limit: usize,
}

impl Tiers {
    async fn fetch(&self, layer: MemoryLayer, req: &FetchRequest, ceiling: usize) -> Result<LayerContent, LayerError> {
        let result = match layer {
            MemoryLayer::RunCache => {
                let Some(run_id) = req.run_id.as_deref() else {
                    return Err(LayerError::Skipped {
                        layer,
                        reason: "no run id".into(),
                    });
                };
                self.fetch_run_cache(run_id).await
            }
            MemoryLayer::Persistent => self.fetch_persistent(req).await,
            MemoryLayer::Session => self.fetch_session(req).await,
            MemoryLayer::Vector => self.fetch_vector(req, ceiling).await,
        };
        result.map_err(|e| LayerError::unavailable(layer, e))
    }

    async fn fetch_run_cache(&self, run_id: &str) -> Result<LayerContent, StoreError> {
        let items = self
            .run_cache
            .entries(run_id)
            .await?
            .into_iter()
            .map(|entry| ContextItem::new(entry.key(), format!("{}: {}", entry.tool, entry.value)))
            .collect();
        Ok(LayerContent::new(items))
    }

    /// User summary (or the raw profile when no fresh summary exists),
    /// symbol summaries for the symbols in the query, then recent decisions.
    async fn fetch_persistent(&self, req: &FetchRequest) -> Result<LayerContent, StoreError> {
        let mut items = Vec::new();

        match self.summaries.get_summary(&SubjectKey::user(&req.user_id)).await? {
            Some(summary) => items.push(ContextItem::new(summary.subject_key, summary.payload.render())),
            None => {
                if let Some(profile) = self.persistent.get_profile(&req.user_id).await? {
                    items.push(ContextItem::new(
                        format!("profile:{}", req.user_id),
                        format!("Profile: {}", profile.preference_view()),
                    ));
                }
            }
        }

        for symbol in &req.symbols {
            if let Some(summary) = self.summaries.get_summary(&SubjectKey::symbol(&req.user_id, symbol)).await? {
                items.push(ContextItem::new(summary.subject_key, summary.payload.render()));
            }
        }

        for decision in self.persistent.recent_decisions(&req.user_id, None, RECENT_DECISIONS).await? {
            let mut line = format!(
                "{} {} {}",
                decision.recorded_at.format("%Y-%m-%d"),
                decision.action,
                decision.symbol
            );
            if !decision.query.is_empty() {
                line.push_str(&format!(" ({})", decision.query));
            }
            items.push(ContextItem::new(format!("decision:{}", decision.decision_id), line));
        }

        Ok(LayerContent::new(items))
    }

    /// Preferences first, then history newest first so ceiling trims drop
    /// the oldest turns.
    async fn fetch_session(&self, req: &FetchRequest) -> Result<LayerContent, StoreError> {
        let snapshot = self.session.get_snapshot(&req.user_id).await?;
        let mut items = Vec::new();
        if snapshot.has_preferences() {
            items.push(ContextItem::new(
                PREFERENCES_KEY,
                format!("Preferences: {}", snapshot.preferences),
            ));
        }
        items.extend(
            snapshot
                .history
                .iter()
                .rev()
                .take(self.history_limit)
                .map(|entry| ContextItem::new(format!("history:{}", entry.seq), format!("{}: {}", entry.role, entry.content))),
        );
        Ok(LayerContent::new(items))
    }

    async fn fetch_vector(&self, req: &FetchRequest, ceiling: usize) -> Result<LayerContent, StoreError> {
        let filters = if req.symbols.is_empty() {
            SearchFilters::none()
        } else {
            SearchFilters::none().with_symbols(req.symbols.iter().cloned())
        };
        let top_k = self.retriever.config().default_top_k;
        let result = self.retriever.query(&req.query, &filters, top_k, Some(ceiling)).await?;
        Ok(LayerContent::new(
            result
                .documents
                .into_iter()
                .map(|doc| ContextItem::new(doc.id, doc.snippet))
                .collect(),
        ))
    }
}

type LayerOutcome = Result<LayerContent, LayerError>;

pub struct MemoryManager {
    classifier: Arc<dyn IntentClassifier>,
    allocator: TokenBudgetAllocator,
    assembler: ContextAssembler,
    tiers: Arc<Tiers>,
    timeouts: TimeoutsConfig,
    events: Arc<EventBus>,
}

impl MemoryManager {
    pub fn new(config: &StrataConfig, stores: MemoryStores, classifier: Arc<dyn IntentClassifier>) -> Self {
        let persistent = Arc::new(PersistentStore::new(stores.documents.clone()));
        let tiers = Tiers {
            run_cache: RunCache::new(stores.run_cache, config.run_cache.clone()),
            session: SessionStore::new(stores.session, persistent.clone(), config.session.clone()),
            summaries: SummaryIndex::new(stores.documents, persistent.clone(), config.persistent.summary_recent),
            retriever: HybridRetriever::new(stores.index, stores.embedder, config.retrieval.clone()),
            persistent,
            history_limit: config.session.history_limit,
        };
        Self {
            classifier,
            allocator: TokenBudgetAllocator::new(config.budgets.clone()),
            assembler: ContextAssembler::new(),
            tiers: Arc::new(tiers),
            timeouts: config.timeouts.clone(),
            events: Arc::new(EventBus::default()),
        }
    }

    /// A manager on process-local stores with the keyword classifier.
    pub fn in_memory(config: &StrataConfig) -> Self {
        Self::new(config, MemoryStores::in_memory(config), Arc::new(KeywordClassifier::new()))
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn persistent(&self) -> &PersistentStore {
        &self.tiers.persistent
    }

    pub fn session(&self) -> &SessionStore {
        &self.tiers.session
    }

    pub fn summaries(&self) -> &SummaryIndex {
        &self.tiers.summaries
    }

    // ── Read path ─────────────────────────────────────────────────────────

    /// Assemble a budgeted context for `request`. Never fails: unreachable
    /// or slow layers are reported in `layers_missing`.
    pub async fn get_context(&self, request: &ContextRequest) -> MemoryContext {
        let started = Instant::now();

        let classification = self.classify(&request.query).await;
        let budget = self.allocator.allocate(classification.intent);
        let deadline = started + self.timeouts.deadline(budget.latency);

        let required: BTreeSet<MemoryLayer> = if classification.layers.is_empty() {
            budget.layers().collect()
        } else {
            budget.layers().filter(|l| classification.layers.contains(l)).collect()
        };

        let fetch = Arc::new(FetchRequest {
            user_id: request.user_id.clone(),
            query: request.query.clone(),
            run_id: request.run_id.clone(),
            symbols: classification.symbols.clone(),
        });

        // A fallback layer waits for its primary
        let deferred = budget
            .fallback
            .filter(|fb| required.contains(&fb.primary) && required.contains(&fb.fallback));
        let first_wave: Vec<MemoryLayer> = required
            .iter()
            .copied()
            .filter(|l| deferred.is_none_or(|fb| fb.fallback != *l))
            .collect();

        let mut outcomes = self.fetch_layers(&first_wave, &fetch, &budget, deadline).await;

        if let Some(fb) = deferred {
            let primary_has_preferences = matches!(
                outcomes.get(&fb.primary),
                Some(Ok(content)) if content.items.iter().any(|i| i.key == PREFERENCES_KEY)
            );
            if primary_has_preferences {
                outcomes.insert(
                    fb.fallback,
                    Err(LayerError::Skipped {
                        layer: fb.fallback,
                        reason: format!("{} had preferences", fb.primary),
                    }),
                );
            } else {
                debug!(primary = %fb.primary, fallback = %fb.fallback, "Primary layer empty, querying fallback");
                outcomes.extend(self.fetch_layers(&[fb.fallback], &fetch, &budget, deadline).await);
            }
        }

        let mut fetched = BTreeMap::new();
        let mut missing = BTreeMap::new();
        for (layer, outcome) in outcomes {
            match outcome {
                Ok(content) if content.is_empty() => {
                    missing.insert(layer, MissingReason::Empty);
                }
                Ok(content) => {
                    fetched.insert(layer, content);
                }
                Err(e) => {
                    let reason = match &e {
                        LayerError::Timeout { .. } => MissingReason::Timeout,
                        LayerError::Unavailable { .. } => MissingReason::Unavailable,
                        LayerError::Skipped { .. } => MissingReason::Skipped,
                    };
                    self.events.publish(DomainEvent::LayerMissing {
                        user_id: request.user_id.clone(),
                        layer,
                        reason,
                        detail: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    missing.insert(layer, reason);
                }
            }
        }

        let assembly = self.assembler.assemble(&budget, fetched, missing);
        let mut context = assembly.context;
        context.symbols = classification.symbols;
        context.latency_ms = started.elapsed().as_millis() as u64;

        for drop in &assembly.drops {
            debug!(
                layer = %drop.layer,
                items = drop.items_dropped,
                tokens = drop.tokens_dropped,
                reason = %drop.reason,
                "Context items dropped"
            );
        }
        info!(
            user_id = %request.user_id,
            intent = %context.intent,
            tokens = context.tokens_used,
            budget = context.budget,
            layers = ?context.layers.keys().collect::<Vec<_>>(),
            missing = ?context.missing_reasons,
            latency_ms = context.latency_ms,
            "Context ready"
        );
        self.events.publish(DomainEvent::ContextAssembled {
            user_id: request.user_id.clone(),
            intent: context.intent,
            layers: context.layers.keys().copied().collect(),
            tokens_used: context.tokens_used,
            budget: context.budget,
            latency_ms: context.latency_ms,
            timestamp: chrono::Utc::now(),
        });
        context
    }

    async fn classify(&self, query: &str) -> Classification {
        match timeout(self.timeouts.classifier(), self.classifier.classify(query)).await {
            Ok(Ok(classification)) => classification,
            Ok(Err(e)) => {
                warn!(classifier = self.classifier.name(), error = %e, "Classification failed, failing closed");
                Classification::unknown()
            }
            Err(_) => {
                let e = ClassifierError::Timeout(self.timeouts.classifier().as_millis() as u64);
                warn!(classifier = self.classifier.name(), error = %e, "Classification failed, failing closed");
                Classification::unknown()
            }
        }
    }

    /// Fetch `layers` concurrently. Every layer gets an outcome: tasks
    /// still running at `deadline` are aborted and reported as timeouts.
    async fn fetch_layers(
        &self,
        layers: &[MemoryLayer],
        req: &Arc<FetchRequest>,
        budget: &TokenBudget,
        deadline: Instant,
    ) -> BTreeMap<MemoryLayer, LayerOutcome> {
        let wave_started = Instant::now();
        let mut tasks = JoinSet::new();
        for &layer in layers {
            let tiers = self.tiers.clone();
            let req = req.clone();
            let ceiling = budget.ceiling(layer);
            let limit = self
                .timeouts
                .layer(layer)
                .min(deadline.saturating_duration_since(Instant::now()));
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = match timeout(limit, tiers.fetch(layer, &req, ceiling)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LayerError::Timeout {
                        layer,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }),
                };
                (layer, outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((layer, outcome)))) => {
                    if let Err(e) = &outcome {
                        warn!(layer = %layer, error = %e, "Layer did not contribute");
                    }
                    outcomes.insert(layer, outcome);
                }
                Ok(Some(Err(e))) => warn!(error = %e, "Layer fetch task failed"),
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    break;
                }
            }
        }

        let timed_out = Instant::now() >= deadline;
        for &layer in layers {
            outcomes.entry(layer).or_insert_with(|| {
                let elapsed_ms = wave_started.elapsed().as_millis() as u64;
                if timed_out {
                    warn!(layer = %layer, "Layer cut off by request deadline");
                    Err(LayerError::Timeout { layer, elapsed_ms })
                } else {
                    Err(LayerError::unavailable(layer, "fetch task aborted"))
                }
            });
        }
        outcomes
    }

    // ── Write path ────────────────────────────────────────────────────────

    /// Handle a decision that the caller has produced.
    ///
    /// The durable append must succeed; summary recomputation and session
    /// invalidation run afterwards and only log on failure. A repeated
    /// `decision_id` returns `Duplicate` with the original sequence.
    pub async fn on_decision_written(&self, record: DecisionRecord) -> Result<AppendOutcome, WriteError> {
        if record.decision_id.trim().is_empty() {
            return Err(WriteError::InvalidRecord("decision_id is empty".into()));
        }
        if record.user_id.trim().is_empty() {
            return Err(WriteError::InvalidRecord("user_id is empty".into()));
        }
        if record.symbol.is_empty() {
            return Err(WriteError::InvalidRecord("symbol is empty".into()));
        }

        let subjects = record.subjects();
        let (user_id, decision_id, symbol) = (record.user_id.clone(), record.decision_id.clone(), record.symbol.clone());

        let outcome = self
            .tiers
            .persistent
            .append_decision(record)
            .await
            .map_err(WriteError::DurableWriteFailure)?;

        self.events.publish(DomainEvent::DecisionRecorded {
            user_id: user_id.clone(),
            decision_id,
            symbol,
            duplicate: outcome.is_duplicate(),
            timestamp: chrono::Utc::now(),
        });

        for subject in &subjects {
            self.refresh_summary(subject).await;
        }
        self.invalidate_session(&user_id).await;
        Ok(outcome)
    }

    /// Build a decision record from a payload and write it.
    ///
    /// `payload.query` and a numeric `payload.sentiment` are lifted into
    /// the record; the whole payload is kept as-is.
    pub async fn record_decision(
        &self,
        user_id: &str,
        decision_id: &str,
        symbol: &str,
        action: &str,
        payload: Value,
    ) -> Result<AppendOutcome, WriteError> {
        let mut record = DecisionRecord::new(decision_id, user_id, symbol, action);
        if let Some(query) = payload.get("query").and_then(Value::as_str) {
            record = record.with_query(query);
        }
        if let Some(sentiment) = payload.get("sentiment").and_then(Value::as_f64) {
            record = record.with_sentiment(sentiment);
        }
        self.on_decision_written(record.with_payload(payload)).await
    }

    /// Apply a profile update, then refresh the user summary and session.
    pub async fn on_profile_updated(&self, user_id: &str, update: ProfileUpdate) -> Result<UserProfile, WriteError> {
        if user_id.trim().is_empty() {
            return Err(WriteError::InvalidRecord("user_id is empty".into()));
        }
        let profile = self
            .tiers
            .persistent
            .update_profile(user_id, update)
            .await
            .map_err(WriteError::DurableWriteFailure)?;

        self.refresh_summary(&SubjectKey::user(user_id)).await;
        self.invalidate_session(user_id).await;
        Ok(profile)
    }

    async fn refresh_summary(&self, subject: &SubjectKey) {
        if let Err(e) = self.tiers.summaries.recompute(subject).await {
            warn!(subject = %subject, error = %e, "Summary recompute failed; it stays stale until the next write");
            self.events.publish(DomainEvent::SummaryRecomputeFailed {
                subject_key: subject.to_string(),
                error_message: e.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }

    async fn invalidate_session(&self, user_id: &str) {
        if let Err(e) = self.tiers.session.invalidate(user_id).await {
            warn!(user_id, error = %e, "Session invalidation failed");
        }
    }

    /// Append a conversation turn. Best-effort.
    pub async fn append_history(&self, user_id: &str, entry: HistoryEntry) -> Option<u64> {
        self.tiers.session.append_history(user_id, entry).await
    }

    // ── Run cache ─────────────────────────────────────────────────────────

    pub async fn cache_tool_result(
        &self,
        run_id: &str,
        tool: &str,
        args: &Value,
        result: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.tiers.run_cache.put(run_id, &CacheKey::new(tool, args), result, ttl).await
    }

    pub async fn cached_tool_result(&self, run_id: &str, tool: &str, args: &Value) -> Result<Option<Value>, StoreError> {
        self.tiers.run_cache.get(run_id, &CacheKey::new(tool, args)).await
    }

    /// Return the cached result or run `fetch` once per key, even under
    /// concurrent callers in this process.
    pub async fn cached_or_fetch<F, Fut, E>(&self, run_id: &str, tool: &str, args: &Value, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, E>>,
        E: From<StoreError>,
    {
        self.tiers
            .run_cache
            .get_or_fetch(run_id, &CacheKey::new(tool, args), fetch)
            .await
    }

    /// Drop every cached result of a finished run.
    pub async fn release_run(&self, run_id: &str) -> Result<usize, StoreError> {
        let removed = self.tiers.run_cache.release(run_id).await?;
        self.events.publish(DomainEvent::RunReleased {
            run_id: run_id.to_string(),
            entries_removed: removed,
            timestamp: chrono::Utc::now(),
        });
        Ok(removed)
    }

    // ── Retrieval corpus ──────────────────────────────────────────────────

    pub async fn ingest_document(&self, text: &str, fields: FilterFields) -> Result<String, StoreError> {
        self.tiers.retriever.ingest(text, fields).await
    }
}
