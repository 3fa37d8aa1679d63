//! Multi-tier caching for offline-resilient reads.
//!
//! This module provides:
//! - A process-lifetime [`VolatileCache`] with lazy expiry and a size bound
//! - A [`DurableCache`] persisted through a [`KeyValueStore`]
//! - A [`PaginatedCache`] composing both tiers for paged collections
//! - A [`CacheLayer`] that reads through the caches to the network on a miss

mod durable;
mod key;
mod layer;
mod paginated;
mod storage;
mod traits;
mod volatile;

pub use durable::{DurableCache, DurableConfig};
pub use key::{namespace_key, CollectionKey};
pub use layer::CacheLayer;
pub use paginated::{PaginatedCache, PaginationConfig};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use traits::{CacheResult, CacheSource, PagedResult, TimedEntry};
pub use volatile::{CacheStats, VolatileCache, VolatileConfig};
