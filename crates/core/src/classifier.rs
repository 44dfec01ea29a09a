//! Intent classification seam.
//!
//! The orchestrator only needs an intent, the layers it implies and any
//! symbols mentioned. How that is decided (keywords, an LLM, both) is the
//! implementor's business.

use crate::error::ClassifierError;
use crate::layer::{Intent, MemoryLayer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Result of classifying one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    /// Layers the classifier believes are needed. Empty means "use the budget's layers".
    #[serde(default)]
    pub layers: BTreeSet<MemoryLayer>,
    /// Upper-cased instrument symbols found in the query
    #[serde(default)]
    pub symbols: Vec<String>,
    /// 0.0 – 1.0
    pub confidence: f32,
}

impl Classification {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self {
            intent,
            layers: BTreeSet::new(),
            symbols: Vec::new(),
            confidence,
        }
    }

    /// The fail-closed classification used when classification fails.
    pub fn unknown() -> Self {
        Self::new(Intent::Unknown, 0.0)
    }

    pub fn with_layers(mut self, layers: impl IntoIterator<Item = MemoryLayer>) -> Self {
        self.layers = layers.into_iter().collect();
        self
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, query: &str) -> Result<Classification, ClassifierError>;
}
