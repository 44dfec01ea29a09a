//! # Strata Core
//!
//! Domain types, store traits, and error definitions for the Strata tiered
//! memory orchestrator. This crate has **no storage dependencies**: it
//! defines the model every other crate implements against.
//!
//! ## Layout
//!
//! - `layer`: the closed set of memory layers, intents and latency classes
//! - `store`: key/value, document and vector index traits
//! - `record` / `document`: what the stores hold
//! - `context`: budgets and the assembled `MemoryContext`
//! - `classifier`: the intent classification seam
//! - `event`: broadcast bus for observers

pub mod classifier;
pub mod context;
pub mod document;
pub mod error;
pub mod event;
pub mod layer;
pub mod record;
pub mod store;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use classifier::{Classification, IntentClassifier};
pub use context::{
    ContextItem, ContextRequest, LayerContent, LayerFallback, MemoryContext, MissingReason, TokenBudget,
};
pub use document::{FilterFields, RetrievalResult, RetrievedDocument, ScoredId, SearchFilters, SparseTerms, VectorDocument};
pub use error::{AssemblyError, ClassifierError, LayerError, StoreError, WriteError};
pub use event::{DomainEvent, EventBus};
pub use layer::{Intent, LatencyClass, MemoryLayer};
pub use record::{
    AppendOutcome, DecisionDigest, DecisionRecord, HistoryEntry, ProfileUpdate, SessionSnapshot, SubjectKey,
    SummaryPayload, SummaryRecord, SymbolSummary, UserProfile, UserSummary,
};
pub use store::{DocumentStore, Embedder, InsertOutcome, KeyValueStore, Predicate, SortOrder, VectorIndex};
