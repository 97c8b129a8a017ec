use super::stats::{CacheStats, Counters};
use binprefs_core::{ConflictPolicy, Entry, PrefKey, PrefValue, Version};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// State of one cached key.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Decoded value, safe to serve.
    Fresh(Entry),
    /// Invalidated; the next read must go to disk.
    Stale { version: Version },
    /// Known removed at `version`.
    Removed { version: Version },
}

impl Slot {
    pub fn version(&self) -> Version {
        match self {
            Slot::Fresh(entry) => entry.version,
            Slot::Stale { version } | Slot::Removed { version } => *version,
        }
    }

    fn needs_load(&self) -> bool {
        matches!(self, Slot::Stale { .. })
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Entry),
    /// The key is known not to exist.
    Absent,
    /// The cache cannot answer; read from disk.
    Miss,
}

/// Process-local `key -> decoded value` mirror.
///
/// Every method must be safe to call concurrently from reader threads and
/// the store's writer thread.
pub trait CacheProvider: Send + Sync + fmt::Debug {
    fn lookup(&self, key: &PrefKey) -> CacheLookup;

    /// Cached value, `None` when absent or unknown.
    fn get(&self, key: &PrefKey) -> Option<PrefValue> {
        match self.lookup(key) {
            CacheLookup::Hit(entry) => Some(entry.value),
            CacheLookup::Absent | CacheLookup::Miss => None,
        }
    }

    /// Record a locally committed value.
    fn put(&self, key: PrefKey, entry: Entry);

    /// Record a locally committed removal.
    fn remove(&self, key: PrefKey, version: Version);

    /// Whether a fresh value is cached for `key`.
    fn contains_key(&self, key: &PrefKey) -> bool;

    /// Drop every slot and forget warm-up.
    fn clear(&self);

    /// Force the next read of `key` to go to disk.
    fn invalidate(&self, key: &PrefKey);

    /// Populate `key` from a disk read, unless a newer slot got there first.
    /// Returns what the cache now holds for the key.
    fn fill(&self, key: PrefKey, value: Option<PrefValue>) -> Option<PrefValue>;

    /// Apply a slot received from another process. Returns whether it was
    /// applied.
    fn apply_remote(&self, key: PrefKey, incoming: Slot, policy: ConflictPolicy) -> bool;

    /// Declare that every key on disk has been loaded.
    fn mark_warm(&self);

    fn is_warm(&self) -> bool;

    /// Keys with a fresh value.
    fn keys(&self) -> Vec<PrefKey>;

    /// Every fresh value.
    fn snapshot(&self) -> BTreeMap<PrefKey, PrefValue>;

    fn version_of(&self, key: &PrefKey) -> Option<Version>;

    fn stats(&self) -> CacheStats;
}

/// [`CacheProvider`] over a sharded concurrent map.
#[derive(Debug, Default)]
pub struct ConcurrentCacheProvider {
    slots: DashMap<PrefKey, Slot>,
    warm: AtomicBool,
    counters: Counters,
}

impl ConcurrentCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn accepts(current: Option<&Slot>, incoming: &Slot, policy: ConflictPolicy) -> bool {
        match (current, policy) {
            (None, _) | (_, ConflictPolicy::ArrivalOrder) => true,
            (Some(slot), ConflictPolicy::LastWriterWins) => incoming.version() >= slot.version(),
        }
    }
}

impl CacheProvider for ConcurrentCacheProvider {
    fn lookup(&self, key: &PrefKey) -> CacheLookup {
        let result = match self.slots.get(key).as_deref() {
            Some(Slot::Fresh(entry)) => CacheLookup::Hit(entry.clone()),
            Some(Slot::Removed { .. }) => CacheLookup::Absent,
            Some(Slot::Stale { .. }) => CacheLookup::Miss,
            None if self.is_warm() => CacheLookup::Absent,
            None => CacheLookup::Miss,
        };
        match result {
            CacheLookup::Miss => self.counters.miss(),
            _ => self.counters.hit(),
        }
        result
    }

    fn put(&self, key: PrefKey, entry: Entry) {
        self.slots.insert(key, Slot::Fresh(entry));
    }

    fn remove(&self, key: PrefKey, version: Version) {
        self.slots.insert(key, Slot::Removed { version });
    }

    fn contains_key(&self, key: &PrefKey) -> bool {
        matches!(self.slots.get(key).as_deref(), Some(Slot::Fresh(_)))
    }

    fn clear(&self) {
        self.warm.store(false, Ordering::Release);
        self.slots.clear();
    }

    fn invalidate(&self, key: &PrefKey) {
        match self.slots.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let version = occupied.get().version();
                occupied.insert(Slot::Stale { version });
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Slot::Stale { version: 0 });
            }
        }
    }

    fn fill(&self, key: PrefKey, value: Option<PrefValue>) -> Option<PrefValue> {
        match self.slots.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().needs_load() {
                    let version = occupied.get().version();
                    occupied.insert(match value {
                        Some(value) => Slot::Fresh(Entry::new(value, version)),
                        None => Slot::Removed { version },
                    });
                } else {
                    trace!(key = %occupied.key(), "Disk load superseded by newer slot");
                }
                match occupied.get() {
                    Slot::Fresh(entry) => Some(entry.value.clone()),
                    Slot::Stale { .. } | Slot::Removed { .. } => None,
                }
            }
            MapEntry::Vacant(vacant) => match value {
                Some(value) => {
                    vacant.insert(Slot::Fresh(Entry::loaded(value.clone())));
                    Some(value)
                }
                None => {
                    vacant.insert(Slot::Removed { version: 0 });
                    None
                }
            },
        }
    }

    fn apply_remote(&self, key: PrefKey, incoming: Slot, policy: ConflictPolicy) -> bool {
        match self.slots.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                if !Self::accepts(Some(occupied.get()), &incoming, policy) {
                    trace!(
                        key = %occupied.key(),
                        cached = occupied.get().version(),
                        incoming = incoming.version(),
                        "Remote change older than cached slot"
                    );
                    return false;
                }
                occupied.insert(incoming);
                true
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(incoming);
                true
            }
        }
    }

    fn mark_warm(&self) {
        self.warm.store(true, Ordering::Release);
    }

    fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    fn keys(&self) -> Vec<PrefKey> {
        let mut keys: Vec<_> = self
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Fresh(_)))
            .map(|slot| slot.key().clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    fn snapshot(&self) -> BTreeMap<PrefKey, PrefValue> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Fresh(entry) => Some((slot.key().clone(), entry.value.clone())),
                Slot::Stale { .. } | Slot::Removed { .. } => None,
            })
            .collect()
    }

    fn version_of(&self, key: &PrefKey) -> Option<Version> {
        self.slots.get(key).map(|slot| slot.version())
    }

    fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            ..Default::default()
        };
        for slot in self.slots.iter() {
            match slot.value() {
                Slot::Fresh(_) => stats.entry_count += 1,
                Slot::Stale { .. } => stats.stale_count += 1,
                Slot::Removed { .. } => {}
            }
        }
        stats
    }
}
