//! Memory layers, request intents and latency classes.
//!
//! `MemoryLayer` is a closed set: adding a store means adding a variant and a
//! fetch arm in the orchestrator, never registering a handler at runtime.
//! The declaration order of the variants *is* the merge priority, so a
//! `BTreeMap<MemoryLayer, _>` iterates from highest to lowest priority.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four tiers a context can be assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    /// Run-scoped tool results (highest value per token)
    RunCache,
    /// Durable profile and write-time summaries
    Persistent,
    /// Rolling conversation history and preference snapshot
    Session,
    /// Hybrid dense+sparse semantic search
    Vector,
}

impl MemoryLayer {
    /// All layers in priority order (highest first).
    pub const ALL: [MemoryLayer; 4] = [
        MemoryLayer::RunCache,
        MemoryLayer::Persistent,
        MemoryLayer::Session,
        MemoryLayer::Vector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunCache => "run_cache",
            Self::Persistent => "persistent",
            Self::Session => "session",
            Self::Vector => "vector",
        }
    }

    /// Layers in the order content is trimmed when over budget
    /// (lowest priority first).
    pub fn trim_order() -> impl Iterator<Item = MemoryLayer> {
        Self::ALL.into_iter().rev()
    }
}

impl fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "run_cache" | "cache" => Ok(Self::RunCache),
            "persistent" | "ltm" => Ok(Self::Persistent),
            "session" | "stm" => Ok(Self::Session),
            "vector" | "rag" => Ok(Self::Vector),
            other => Err(format!("unknown memory layer: {other}")),
        }
    }
}

/// Classified information need of a request. Drives layer routing and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Simple price check
    PriceOnly,
    /// Instrument information
    TickerInfo,
    /// News aggregation
    NewsSummary,
    /// Full analysis leading to a decision
    TradeDecision,
    /// "What did I say/do?"
    UserHistory,
    /// "What do I prefer?"
    UserPrefs,
    /// "Find something similar to..."
    SemanticSearch,
    /// Follow-up that needs conversational context
    Conversation,
    /// Could not be classified
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 9] = [
        Intent::PriceOnly,
        Intent::TickerInfo,
        Intent::NewsSummary,
        Intent::TradeDecision,
        Intent::UserHistory,
        Intent::UserPrefs,
        Intent::SemanticSearch,
        Intent::Conversation,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceOnly => "price_only",
            Self::TickerInfo => "ticker_info",
            Self::NewsSummary => "news_summary",
            Self::TradeDecision => "trade_decision",
            Self::UserHistory => "user_history",
            Self::UserPrefs => "user_prefs",
            Self::SemanticSearch => "semantic_search",
            Self::Conversation => "conversation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == normalized)
            .or(match normalized.as_str() {
                "user_preferences" => Some(Self::UserPrefs),
                "semantic" => Some(Self::SemanticSearch),
                _ => None,
            })
            .ok_or_else(|| format!("unknown intent: {s}"))
    }
}

/// How long a request class may wait for its layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    Fast,
    #[default]
    Standard,
    Deep,
}

impl fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::Deep => "deep",
        })
    }
}
