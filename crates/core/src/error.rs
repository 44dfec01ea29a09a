//! Error types for the Strata domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type.

use crate::layer::MemoryLayer;
use thiserror::Error;

/// Failures reported by a backing store (key/value, document, vector index).
///
/// `Unavailable` is deliberately distinct from an empty result: callers must
/// be able to tell "nothing cached" apart from "cache unreachable".
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Why a single layer did not contribute to a context.
#[derive(Debug, Clone, Error)]
pub enum LayerError {
    #[error("Layer {layer} timed out after {elapsed_ms}ms")]
    Timeout { layer: MemoryLayer, elapsed_ms: u64 },

    #[error("Layer {layer} unavailable: {reason}")]
    Unavailable { layer: MemoryLayer, reason: String },

    #[error("Layer {layer} skipped: {reason}")]
    Skipped { layer: MemoryLayer, reason: String },
}

impl LayerError {
    /// The layer this error belongs to.
    pub fn layer(&self) -> MemoryLayer {
        match self {
            Self::Timeout { layer, .. } | Self::Unavailable { layer, .. } | Self::Skipped { layer, .. } => {
                *layer
            }
        }
    }

    pub fn unavailable(layer: MemoryLayer, err: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            layer,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("Classification failed: {0}")]
    Failed(String),

    #[error("Classifier timed out after {0}ms")]
    Timeout(u64),
}

#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    #[error("Assembled context uses {used} tokens, budget is {budget}")]
    BudgetViolation { used: usize, budget: usize },
}

#[derive(Debug, Clone, Error)]
pub enum WriteError {
    #[error("Durable write failed: {0}")]
    DurableWriteFailure(StoreError),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}
