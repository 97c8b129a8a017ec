//! Process-scoped store state.
//!
//! One lock handle, one executor and one peer set exist per store per
//! process, shared by every facade opened on that store. Each is created on
//! first open and torn down when the last facade holding it is dropped. The
//! registry itself only keeps weak references.

use crate::lock::{LockFactory, LockHandle};
use crate::peers::PeerSet;
use crate::task::StoreExecutor;
use binprefs_core::{PrefsResult, StoreConfig, StoreName};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Identity of a store: its name and the directory holding its files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreId {
    name: StoreName,
    directory: PathBuf,
}

impl StoreId {
    pub fn new(name: StoreName, directory: impl Into<PathBuf>) -> Self {
        Self {
            name,
            directory: directory.into(),
        }
    }

    pub fn name(&self) -> &StoreName {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Weakly held executors, one per store.
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: Mutex<HashMap<StoreId, Weak<StoreExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing executor for `id`, or a freshly spawned one.
    pub fn get_or_spawn(&self, id: &StoreId, config: &StoreConfig) -> PrefsResult<Arc<StoreExecutor>> {
        let mut executors = self.executors.lock();
        executors.retain(|_, weak| weak.strong_count() > 0);
        if let Some(executor) = executors.get(id).and_then(Weak::upgrade) {
            return Ok(executor);
        }
        let executor = Arc::new(StoreExecutor::spawn(id.name().clone(), config.shutdown_policy)?);
        executors.insert(id.clone(), Arc::downgrade(&executor));
        Ok(executor)
    }

    pub fn live_executors(&self) -> usize {
        self.executors
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

static PROCESS: Lazy<Arc<StoreRegistry>> = Lazy::new(|| Arc::new(StoreRegistry::new()));

/// Lock factory, executor registry and peer sets for one process.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    locks: LockFactory,
    executors: ExecutorRegistry,
    peers: Mutex<HashMap<StoreId, Weak<PeerSet>>>,
}

impl StoreRegistry {
    /// A registry independent of the process one. Two of these over the same
    /// directory behave like two processes sharing a store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every store opened in this process.
    pub fn process() -> Arc<StoreRegistry> {
        Arc::clone(&PROCESS)
    }

    pub fn lock(&self, id: &StoreId, lock_path: PathBuf, config: &StoreConfig) -> Arc<LockHandle> {
        self.locks.acquire(id, lock_path, config)
    }

    pub fn executor(&self, id: &StoreId, config: &StoreConfig) -> PrefsResult<Arc<StoreExecutor>> {
        let executor = self.executors.get_or_spawn(id, config)?;
        debug!(store = %id.name(), dir = %id.directory().display(), "Executor attached");
        Ok(executor)
    }

    /// The set every facade of `id` in this process joins.
    pub fn peers(&self, id: &StoreId) -> Arc<PeerSet> {
        let mut peers = self.peers.lock();
        peers.retain(|_, weak| weak.strong_count() > 0);
        if let Some(set) = peers.get(id).and_then(Weak::upgrade) {
            return set;
        }
        let set = Arc::new(PeerSet::new());
        peers.insert(id.clone(), Arc::downgrade(&set));
        set
    }

    pub fn locks(&self) -> &LockFactory {
        &self.locks
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }
}
