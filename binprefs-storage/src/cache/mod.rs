//! Process-local cache of decoded entries.
//!
//! The cache is the read path's first stop. It is authoritative for a key
//! only while the slot is fresh or tombstoned; a stale or missing slot sends
//! the reader to disk under the store lock.

mod provider;
mod stats;

pub use provider::{CacheLookup, CacheProvider, ConcurrentCacheProvider, Slot};
pub use stats::CacheStats;
