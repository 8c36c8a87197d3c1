//! Generation-scoped response cache backing the offline gateway.
//!
//! This module provides the cache store boundary:
//! - Stores request -> response pairs grouped into named generations
//! - Tracks each generation's lifecycle state (installing, waiting, active)
//! - Holds the queue of mutating requests awaiting background sync
//! - Hands out explicit `CacheGeneration` handles instead of a global cache

mod generation;
mod storage;
mod traits;

pub use generation::CacheGeneration;
pub use storage::SqliteStorage;
pub use traits::{
  CacheKey, CacheStore, CachedEntry, GenerationInfo, GenerationState, PendingAction,
};
