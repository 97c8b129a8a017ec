//! Atomic, ordered commit of a batch of key mutations.
//!
//! # Commit Protocol
//!
//! ```text
//! lock ─► stage every Put (temp file, fsync) ─► promote/remove in order ─► unlock
//!              │                                     │
//!              └─ any failure: discard all staged,   └─ failure: keys already
//!                 nothing becomes visible               promoted stay committed,
//!                                                       remaining temps discarded
//! ```
//!
//! Readers never observe a partially written file: a key file only ever
//! changes by rename. Atomicity across keys is per key.

use crate::file::adapter::{FileAdapter, StagedFile};
use crate::lock::LockHandle;
use binprefs_core::{PrefKey, PrefsResult, RawValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Pending change to one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put(RawValue),
    Remove,
}

/// Ordered batch of mutations. Recording a key twice keeps its first
/// position in the order but replaces the mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRecord {
    entries: Vec<(PrefKey, Mutation)>,
    positions: HashMap<PrefKey, usize>,
}

impl TransactionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: PrefKey, bytes: RawValue) -> &mut Self {
        self.record(key, Mutation::Put(bytes))
    }

    pub fn remove(&mut self, key: PrefKey) -> &mut Self {
        self.record(key, Mutation::Remove)
    }

    pub fn record(&mut self, key: PrefKey, mutation: Mutation) -> &mut Self {
        match self.positions.get(&key) {
            Some(&index) => self.entries[index].1 = mutation,
            None => {
                self.positions.insert(key.clone(), self.entries.len());
                self.entries.push((key, mutation));
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PrefKey, &Mutation)> {
        self.entries.iter().map(|(k, m)| (k, m))
    }

    pub fn get(&self, key: &PrefKey) -> Option<&Mutation> {
        self.positions.get(key).map(|&i| &self.entries[i].1)
    }
}

impl IntoIterator for TransactionRecord {
    type Item = (PrefKey, Mutation);
    type IntoIter = std::vec::IntoIter<(PrefKey, Mutation)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Durable, mutually-exclusive access to a store's committed bytes.
pub trait FileTransaction: Send + Sync {
    /// Apply `record` under the store lock.
    fn commit(&self, record: &TransactionRecord) -> PrefsResult<()>;

    /// Committed bytes of one key.
    fn fetch(&self, key: &PrefKey) -> PrefsResult<Option<RawValue>>;

    /// Every committed key with its bytes.
    fn fetch_all(&self) -> PrefsResult<BTreeMap<PrefKey, RawValue>>;

    /// Every committed key.
    fn keys(&self) -> PrefsResult<Vec<PrefKey>>;

    /// Delete temp files left by crashed writers.
    fn sweep_orphans(&self) -> PrefsResult<usize>;

    fn lock(&self) -> &Arc<LockHandle>;
}

/// [`FileTransaction`] safe across threads and processes sharing a directory.
#[derive(Debug, Clone)]
pub struct MultiProcessTransaction {
    adapter: Arc<dyn FileAdapter>,
    lock: Arc<LockHandle>,
}

impl MultiProcessTransaction {
    pub fn new(adapter: Arc<dyn FileAdapter>, lock: Arc<LockHandle>) -> Self {
        Self { adapter, lock }
    }

    pub fn adapter(&self) -> &Arc<dyn FileAdapter> {
        &self.adapter
    }

    fn stage_all(&self, record: &TransactionRecord) -> PrefsResult<Vec<Option<StagedFile>>> {
        let mut staged = Vec::with_capacity(record.len());
        for (key, mutation) in record.iter() {
            match mutation {
                Mutation::Put(bytes) => match self.adapter.stage(&key.file_name(), bytes) {
                    Ok(file) => staged.push(Some(file)),
                    Err(e) => {
                        self.discard_all(staged);
                        return Err(e);
                    }
                },
                Mutation::Remove => staged.push(None),
            }
        }
        Ok(staged)
    }

    fn discard_all(&self, staged: impl IntoIterator<Item = Option<StagedFile>>) {
        for file in staged.into_iter().flatten() {
            self.adapter.discard(file);
        }
    }
}

impl FileTransaction for MultiProcessTransaction {
    fn commit(&self, record: &TransactionRecord) -> PrefsResult<()> {
        if record.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock()?;

        let staged = self.stage_all(record)?;
        let mut pending = record.iter().zip(staged);
        let mut applied = 0usize;

        while let Some(((key, _), file)) = pending.next() {
            let result = match file {
                Some(file) => self.adapter.promote(file),
                None => self.adapter.remove(&key.file_name()).map(|_| ()),
            };
            if let Err(e) = result {
                warn!(
                    store = %self.lock.store(),
                    key = %key,
                    applied,
                    remaining = record.len() - applied - 1,
                    error = %e,
                    "Commit stopped partway; earlier keys stay committed"
                );
                self.discard_all(pending.map(|(_, file)| file));
                return Err(e);
            }
            trace!(store = %self.lock.store(), key = %key, "Mutation applied");
            applied += 1;
        }

        debug!(store = %self.lock.store(), mutations = applied, "Transaction committed");
        Ok(())
    }

    fn fetch(&self, key: &PrefKey) -> PrefsResult<Option<RawValue>> {
        let _guard = self.lock.lock()?;
        self.adapter.read(&key.file_name())
    }

    fn fetch_all(&self) -> PrefsResult<BTreeMap<PrefKey, RawValue>> {
        let _guard = self.lock.lock()?;
        let mut all = BTreeMap::new();
        for name in self.adapter.names()? {
            let Some(key) = PrefKey::from_file_name(&name) else {
                continue;
            };
            // A concurrent remover cannot interleave while we hold the lock,
            // but a foreign process without it could.
            if let Some(bytes) = self.adapter.read(&name)? {
                all.insert(key, bytes);
            }
        }
        Ok(all)
    }

    fn keys(&self) -> PrefsResult<Vec<PrefKey>> {
        let _guard = self.lock.lock()?;
        Ok(self
            .adapter
            .names()?
            .iter()
            .filter_map(|name| PrefKey::from_file_name(name))
            .collect())
    }

    fn sweep_orphans(&self) -> PrefsResult<usize> {
        let _guard = self.lock.lock()?;
        self.adapter.sweep_temp()
    }

    fn lock(&self) -> &Arc<LockHandle> {
        &self.lock
    }
}
