//! Request, budget and assembled-context types.
//!
//! `MemoryContext` is the only thing the orchestrator hands back to callers.
//! Layers that failed or were skipped are absent from `layers` and listed in
//! `layers_missing` with a reason; they never appear as placeholder text.

use crate::layer::{Intent, LatencyClass, MemoryLayer};
use crate::token;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One incoming request for context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequest {
    pub query: String,
    pub user_id: String,
    /// The multi-step execution this request belongs to, if any
    #[serde(default)]
    pub run_id: Option<String>,
}

impl ContextRequest {
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            run_id: None,
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// A primary layer whose emptiness triggers a query of `fallback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerFallback {
    pub primary: MemoryLayer,
    pub fallback: MemoryLayer,
}

/// Per-request token allocation.
///
/// The sum of layer ceilings may exceed `total`; assembly enforces `total`
/// separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub intent: Intent,
    pub total: usize,
    pub per_layer: BTreeMap<MemoryLayer, usize>,
    #[serde(default)]
    pub fallback: Option<LayerFallback>,
    #[serde(default)]
    pub latency: LatencyClass,
}

impl TokenBudget {
    /// Layers with a ceiling, in priority order.
    pub fn layers(&self) -> impl Iterator<Item = MemoryLayer> + '_ {
        self.per_layer.keys().copied()
    }

    pub fn includes(&self, layer: MemoryLayer) -> bool {
        self.per_layer.contains_key(&layer)
    }

    /// Ceiling for `layer`, or 0 when the layer is not allocated.
    pub fn ceiling(&self, layer: MemoryLayer) -> usize {
        self.per_layer.get(&layer).copied().unwrap_or(0)
    }

    pub fn allocated(&self) -> usize {
        self.per_layer.values().sum()
    }
}

/// One unit of content contributed by a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    /// Stable identifier within the layer (cache key, doc id, subject key)
    pub key: String,
    pub text: String,
    pub tokens: usize,
}

impl ContextItem {
    /// Build an item, estimating its token cost from `text`.
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let tokens = token::estimate_tokens(&text);
        Self {
            key: key.into(),
            text,
            tokens,
        }
    }
}

/// Ordered content from one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerContent {
    pub items: Vec<ContextItem>,
}

impl LayerContent {
    pub fn new(items: Vec<ContextItem>) -> Self {
        Self { items }
    }

    pub fn tokens(&self) -> usize {
        self.items.iter().map(|i| i.tokens).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Keep the longest prefix of items that fits in `ceiling`.
    /// Returns `(items_dropped, tokens_dropped)`.
    pub fn fit_to(&mut self, ceiling: usize) -> (usize, usize) {
        let mut used = 0;
        let mut keep = 0;
        for item in &self.items {
            if used + item.tokens > ceiling {
                break;
            }
            used += item.tokens;
            keep += 1;
        }
        let dropped: Vec<ContextItem> = self.items.drain(keep..).collect();
        (dropped.len(), dropped.iter().map(|i| i.tokens).sum())
    }
}

/// Why an attempted layer contributed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// Per-layer timeout or shared deadline hit
    Timeout,
    /// Store error
    Unavailable,
    /// Fetch succeeded with nothing to contribute
    Empty,
    /// Removed during total-budget enforcement
    Trimmed,
    /// Not fetched (missing run id, fallback not needed)
    Skipped,
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Empty => "empty",
            Self::Trimmed => "trimmed",
            Self::Skipped => "skipped",
        })
    }
}

/// The assembled, token-bounded context for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub intent: Intent,
    /// Contributing layers; iteration order is merge priority
    pub layers: BTreeMap<MemoryLayer, LayerContent>,
    pub tokens_used: usize,
    pub budget: usize,
    pub layers_attempted: BTreeSet<MemoryLayer>,
    pub layers_missing: BTreeSet<MemoryLayer>,
    pub missing_reasons: BTreeMap<MemoryLayer, MissingReason>,
    /// Symbols the classifier extracted from the query
    #[serde(default)]
    pub symbols: Vec<String>,
    pub latency_ms: u64,
}

impl MemoryContext {
    /// A context with nothing in it.
    pub fn empty(intent: Intent, budget: usize) -> Self {
        Self {
            intent,
            layers: BTreeMap::new(),
            tokens_used: 0,
            budget,
            layers_attempted: BTreeSet::new(),
            layers_missing: BTreeSet::new(),
            missing_reasons: BTreeMap::new(),
            symbols: Vec::new(),
            latency_ms: 0,
        }
    }

    pub fn layer(&self, layer: MemoryLayer) -> Option<&LayerContent> {
        self.layers.get(&layer)
    }

    pub fn has_layer(&self, layer: MemoryLayer) -> bool {
        self.layers.contains_key(&layer)
    }

    pub fn missing_reason(&self, layer: MemoryLayer) -> Option<MissingReason> {
        self.missing_reasons.get(&layer).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Mark `layer` as attempted but not contributing.
    pub fn mark_missing(&mut self, layer: MemoryLayer, reason: MissingReason) {
        self.layers.remove(&layer);
        self.layers_attempted.insert(layer);
        self.layers_missing.insert(layer);
        self.missing_reasons.insert(layer, reason);
    }

    /// Recompute `tokens_used` from the layer contents.
    pub fn recount(&mut self) {
        self.tokens_used = self.layers.values().map(LayerContent::tokens).sum();
    }

    /// Render the context as a text block for prompt injection,
    /// one section per layer in priority order.
    pub fn to_prompt_context(&self) -> String {
        let mut sections = Vec::new();
        for (layer, content) in &self.layers {
            let header = match layer {
                MemoryLayer::RunCache => "[Tool Results]",
                MemoryLayer::Persistent => "[User Profile & History]",
                MemoryLayer::Session => "[Recent Conversation]",
                MemoryLayer::Vector => "[Retrieved Documents]",
            };
            let body: Vec<String> = content.items.iter().map(|i| format!("- {}", i.text)).collect();
            sections.push(format!("{header}\n{}", body.join("\n")));
        }
        sections.join("\n\n")
    }
}
