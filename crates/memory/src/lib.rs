//! Memory tiers and store backends for Strata.
//!
//! - `RunCache`: run-scoped tool results on a key/value store
//! - `SessionStore`: rolling history and versioned preference snapshots
//! - `PersistentStore` + `SummaryIndex`: durable records and write-time summaries
//! - `HybridRetriever`: dense + sparse search fused with RRF

pub mod in_memory;
pub mod persistent;
pub mod retriever;
pub mod run_cache;
pub mod session;
pub mod summary;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::{InMemoryDocumentStore, InMemoryKvStore, InMemoryVectorIndex};
pub use persistent::PersistentStore;
pub use retriever::HybridRetriever;
pub use run_cache::{CacheKey, CachedResult, RunCache};
pub use session::SessionStore;
pub use summary::SummaryIndex;
pub use vector::{HashingEmbedder, cosine_similarity, reciprocal_rank_fusion, sparse_terms};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDocumentStore;
