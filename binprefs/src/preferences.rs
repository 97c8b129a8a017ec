//! The preferences facade.

use crate::editor::Editor;
use crate::PreferencesBuilder;
use binprefs_core::{
    Codec, CodecError, Entry, Persistable, PrefEvent, PrefKey, PrefType, PrefValue, PrefsResult,
    StoreConfig, StoreName, VersionClock,
};
use binprefs_events::{ChangeListener, EventBridge, ListenerId, ListenerRegistry, Subscription};
use binprefs_storage::{
    CacheLookup, CacheProvider, CacheStats, FailureHandler, FileTransaction, IgnoreFailureHandler,
    StoreExecutor, StoreId, TaskHandle, TransactionRecord,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Changes collected by an [`Editor`].
#[derive(Debug, Default)]
pub(crate) struct Batch {
    pub(crate) clear: bool,
    pub(crate) changes: Vec<(PrefKey, Option<PrefValue>)>,
}

/// State shared between a facade and the tasks it queued.
pub(crate) struct Shared {
    pub(crate) id: StoreId,
    pub(crate) config: StoreConfig,
    pub(crate) codec: Codec,
    pub(crate) transaction: Arc<dyn FileTransaction>,
    pub(crate) cache: Arc<dyn CacheProvider>,
    pub(crate) clock: Arc<VersionClock>,
    pub(crate) executor: Arc<StoreExecutor>,
    pub(crate) bridge: Arc<EventBridge>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) on_failure: Arc<dyn FailureHandler>,
}

impl Shared {
    fn store(&self) -> &StoreName {
        self.id.name()
    }

    fn origin(&self) -> Uuid {
        self.bridge.origin()
    }

    /// Load every key into the cache. Keys that fail to decode are left
    /// stale so reading them reports the failure.
    pub(crate) fn warm_up(&self) -> PrefsResult<usize> {
        let lock = Arc::clone(self.transaction.lock());
        let _guard = lock.lock()?;
        let mut loaded = 0usize;
        for (key, bytes) in self.transaction.fetch_all()? {
            match self.codec.decode(&bytes) {
                Ok(value) => {
                    self.cache.fill(key, Some(value));
                    loaded += 1;
                }
                Err(e) => {
                    warn!(store = %self.store(), key = %key, error = %e, "Skipping undecodable key during warm-up");
                    self.cache.invalidate(&key);
                }
            }
        }
        self.cache.mark_warm();
        debug!(store = %self.store(), entries = loaded, "Cache warmed");
        Ok(loaded)
    }

    /// Cache-miss path: read one key from disk under the store lock.
    fn load(&self, key: &PrefKey) -> PrefsResult<Option<PrefValue>> {
        let lock = Arc::clone(self.transaction.lock());
        let _guard = lock.lock()?;
        match self.transaction.fetch(key)? {
            None => Ok(self.cache.fill(key.clone(), None)),
            Some(bytes) => {
                let value = self.codec.decode(&bytes)?;
                Ok(self.cache.fill(key.clone(), Some(value)))
            }
        }
    }

    fn value(&self, key: &PrefKey) -> PrefsResult<Option<PrefValue>> {
        match self.cache.lookup(key) {
            CacheLookup::Hit(entry) => Ok(Some(entry.value)),
            CacheLookup::Absent => Ok(None),
            CacheLookup::Miss => self.load(key),
        }
    }

    /// Body of a commit/apply task. Runs on the store's executor.
    fn commit(&self, batch: Batch) -> PrefsResult<()> {
        let lock = Arc::clone(self.transaction.lock());
        let guard = lock.lock()?;

        let changes = self.expand(batch)?;
        let mut record = TransactionRecord::new();
        let mut encoded = Vec::with_capacity(changes.len());
        for (key, value) in &changes {
            match value {
                Some(value) => {
                    let bytes = self.codec.encode(value)?;
                    record.put(key.clone(), bytes.clone());
                    encoded.push(Some(bytes));
                }
                None => {
                    record.remove(key.clone());
                    encoded.push(None);
                }
            }
        }

        if let Err(e) = self.transaction.commit(&record) {
            // Some keys may have landed; make every touched key re-read disk.
            let touched: Vec<PrefKey> = changes.into_iter().map(|(key, _)| key).collect();
            for key in &touched {
                self.cache.invalidate(key);
            }
            drop(guard);
            self.bridge.invalidate_peers(&touched);
            return Err(e);
        }

        let mut events = Vec::with_capacity(changes.len());
        for ((key, value), bytes) in changes.iter().zip(encoded) {
            let version = self.clock.next();
            match (value, bytes) {
                (Some(value), Some(bytes)) => {
                    self.cache
                        .put(key.clone(), Entry::new(value.clone(), version));
                    events.push(PrefEvent::updated(
                        self.store().clone(),
                        key.clone(),
                        bytes,
                        version,
                        self.origin(),
                    ));
                }
                _ => {
                    self.cache.remove(key.clone(), version);
                    events.push(PrefEvent::removed(
                        self.store().clone(),
                        key.clone(),
                        version,
                        self.origin(),
                    ));
                }
            }
        }
        drop(guard);

        debug!(store = %self.store(), changes = changes.len(), "Batch committed");
        if !events.is_empty() {
            self.bridge.share_with_peers(&events);
            self.bridge
                .publish(events, &self.executor, Arc::clone(&self.on_failure));
        }
        for (key, _) in &changes {
            self.listeners.notify(key);
        }
        Ok(())
    }

    /// Resolve `clear` into explicit removals ahead of the batch's own
    /// changes.
    fn expand(&self, batch: Batch) -> PrefsResult<Vec<(PrefKey, Option<PrefValue>)>> {
        if !batch.clear {
            return Ok(batch.changes);
        }
        let touched: HashSet<&PrefKey> = batch.changes.iter().map(|(key, _)| key).collect();
        let mut existing: BTreeSet<PrefKey> = self.transaction.keys()?.into_iter().collect();
        existing.extend(self.cache.keys());

        let mut changes: Vec<_> = existing
            .into_iter()
            .filter(|key| !touched.contains(key))
            .map(|key| (key, None))
            .collect();
        changes.extend(batch.changes);
        Ok(changes)
    }
}

/// A named, file-per-key preferences store.
///
/// Reads are served from the process-local cache and fall back to disk
/// under the store lock. Writes go through an [`Editor`] and run on the
/// store's single background worker, shared with every other
/// `Preferences` opened on the same store in this process.
///
/// ```no_run
/// use binprefs::Preferences;
///
/// let prefs = Preferences::builder()
///     .name("settings")
///     .directory("/var/lib/myapp/prefs/settings")
///     .open()?;
/// prefs.edit().put_i32("retries", 3).commit();
/// assert_eq!(prefs.get_i32("retries", 0)?, 3);
/// # Ok::<(), binprefs::PrefsError>(())
/// ```
pub struct Preferences {
    shared: Arc<Shared>,
    _subscription: Subscription,
}

impl fmt::Debug for Preferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preferences")
            .field("store", self.shared.store())
            .field("directory", &self.shared.id.directory())
            .field("origin", &self.shared.origin())
            .finish()
    }
}

impl Preferences {
    pub fn builder() -> PreferencesBuilder {
        PreferencesBuilder::new()
    }

    pub(crate) fn from_parts(shared: Arc<Shared>, subscription: Subscription) -> Self {
        Self {
            shared,
            _subscription: subscription,
        }
    }

    pub fn name(&self) -> &StoreName {
        self.shared.store()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Identity of this instance in published events.
    pub fn origin(&self) -> Uuid {
        self.shared.origin()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Decoded value of `key`, `None` if absent.
    ///
    /// Corrupted bytes yield a decode failure, never `None`.
    pub fn get_value(&self, key: &str) -> PrefsResult<Option<PrefValue>> {
        let key = PrefKey::new(key)?;
        self.shared.value(&key)
    }

    /// Typed value of `key`. A value of another type is a type mismatch.
    pub fn get<T: PrefType>(&self, key: &str) -> PrefsResult<Option<T>> {
        match self.get_value(key)? {
            None => Ok(None),
            Some(value) => T::from_value(&value).map(Some).ok_or_else(|| {
                CodecError::TypeMismatch {
                    key: key.to_string(),
                    expected: T::TOKEN.to_string(),
                    found: value.token().to_string(),
                }
                .into()
            }),
        }
    }

    pub fn get_or<T: PrefType>(&self, key: &str, default: T) -> PrefsResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> PrefsResult<bool> {
        self.get_or(key, default)
    }

    pub fn get_i32(&self, key: &str, default: i32) -> PrefsResult<i32> {
        self.get_or(key, default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> PrefsResult<i64> {
        self.get_or(key, default)
    }

    pub fn get_f32(&self, key: &str, default: f32) -> PrefsResult<f32> {
        self.get_or(key, default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> PrefsResult<f64> {
        self.get_or(key, default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> PrefsResult<String> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn get_string_set(&self, key: &str) -> PrefsResult<BTreeSet<String>> {
        Ok(self.get(key)?.unwrap_or_default())
    }

    pub fn get_bytes(&self, key: &str) -> PrefsResult<Option<Vec<u8>>> {
        self.get(key)
    }

    /// A registered custom type stored under `key`.
    pub fn get_persistable<T: Persistable + Clone>(&self, key: &str) -> PrefsResult<Option<T>> {
        let Some(value) = self.get_value(key)? else {
            return Ok(None);
        };
        value
            .as_custom()
            .and_then(|custom| custom.downcast_ref::<T>())
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                CodecError::TypeMismatch {
                    key: key.to_string(),
                    expected: T::TOKEN.to_string(),
                    found: value.token().to_string(),
                }
                .into()
            })
    }

    /// Whether `key` holds a value. Corrupted bytes still count as present.
    pub fn contains(&self, key: &str) -> PrefsResult<bool> {
        match self.get_value(key) {
            Ok(value) => Ok(value.is_some()),
            Err(e) if e.is_decode_failure() => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Every key stored on disk.
    pub fn keys(&self) -> PrefsResult<Vec<String>> {
        Ok(self
            .shared
            .transaction
            .keys()?
            .into_iter()
            .map(|key| key.as_str().to_string())
            .collect())
    }

    /// Every key with its decoded value.
    pub fn all(&self) -> PrefsResult<BTreeMap<String, PrefValue>> {
        let mut all = BTreeMap::new();
        for key in self.shared.transaction.keys()? {
            if let Some(value) = self.shared.value(&key)? {
                all.insert(key.as_str().to_string(), value);
            }
        }
        Ok(all)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub fn edit(&self) -> Editor<'_> {
        Editor::new(self)
    }

    pub(crate) fn submit_batch(&self, task: &str, batch: PrefsResult<Batch>) -> TaskHandle {
        let shared = Arc::clone(&self.shared);
        self.shared.executor.submit(
            task,
            Arc::clone(&self.shared.on_failure),
            move || shared.commit(batch?),
        )
    }

    /// Run `batch` and wait for it.
    pub(crate) fn commit_batch(&self, batch: PrefsResult<Batch>) -> PrefsResult<()> {
        if !self.shared.executor.is_worker_thread() {
            return self.submit_batch("commit", batch).wait();
        }
        // Inside one of this store's tasks: everything queued before it has
        // run and the store lock is reentrant.
        let result = batch.and_then(|batch| self.shared.commit(batch));
        if let Err(e) = &result {
            self.shared
                .on_failure
                .on_failure(self.shared.store(), "commit", e);
        }
        result
    }

    /// Block until every task submitted so far has finished.
    pub fn flush(&self) -> PrefsResult<()> {
        self.shared
            .executor
            .submit("flush", Arc::new(IgnoreFailureHandler), || Ok(()))
            .wait()
    }

    /// Drop the cache and load it again from disk.
    pub fn reload(&self) -> PrefsResult<()> {
        self.shared.cache.clear();
        if self.shared.config.warm_up {
            self.shared.warm_up()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Call `listener` with every changed key, local or remote.
    pub fn register_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.shared.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.unregister(id)
    }
}
