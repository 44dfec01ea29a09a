//! Context orchestration for Strata.
//!
//! Turns a query into a token-bounded `MemoryContext`:
//! classify → budget → concurrent, deadline-bounded layer fetches →
//! assembly. Also owns the write-side hooks that keep summaries and
//! session snapshots in step with the durable store.

pub mod assembler;
pub mod budget;
pub mod classifier;
pub mod manager;

pub use assembler::{Assembly, ContextAssembler, DropInfo};
pub use budget::TokenBudgetAllocator;
pub use classifier::KeywordClassifier;
pub use manager::{MemoryManager, MemoryStores, PREFERENCES_KEY};
