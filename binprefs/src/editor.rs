//! Batched writes.

use crate::preferences::{Batch, Preferences};
use binprefs_core::{CustomValue, Persistable, PrefKey, PrefValue, PrefsError, PrefsResult};
use binprefs_storage::TaskHandle;
use std::collections::{BTreeSet, HashMap};

/// Collects changes and hands them to the store's executor as one batch.
///
/// A later change to a key replaces an earlier one. `clear` wipes every
/// key before the editor's own changes apply, wherever it was called.
/// Invalid keys or values are remembered and fail the commit.
#[derive(Debug)]
pub struct Editor<'a> {
    prefs: &'a Preferences,
    clear: bool,
    changes: Vec<(PrefKey, Option<PrefValue>)>,
    positions: HashMap<PrefKey, usize>,
    error: Option<PrefsError>,
}

impl<'a> Editor<'a> {
    pub(crate) fn new(prefs: &'a Preferences) -> Self {
        Self {
            prefs,
            clear: false,
            changes: Vec::new(),
            positions: HashMap::new(),
            error: None,
        }
    }

    /// Set `key` to `value`.
    pub fn put(&mut self, key: &str, value: impl Into<PrefValue>) -> &mut Self {
        self.record(key, Some(value.into()))
    }

    pub fn put_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_i32(&mut self, key: &str, value: i32) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_i64(&mut self, key: &str, value: i64) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_f32(&mut self, key: &str, value: f32) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_f64(&mut self, key: &str, value: f64) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_string(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.put(key, value.into())
    }

    pub fn put_string_set<I, S>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        self.put(key, set)
    }

    pub fn put_bytes(&mut self, key: &str, value: impl Into<Vec<u8>>) -> &mut Self {
        self.put(key, value.into())
    }

    /// Store a registered custom type.
    pub fn put_persistable<T: Persistable>(&mut self, key: &str, value: T) -> &mut Self {
        match CustomValue::new(value) {
            Ok(custom) => self.put(key, custom),
            Err(e) => {
                self.fail(e.into());
                self
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> &mut Self {
        self.record(key, None)
    }

    /// Remove every key currently in the store.
    pub fn clear(&mut self) -> &mut Self {
        self.clear = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.clear && self.changes.is_empty()
    }

    /// Write the batch and wait for it. Returns `false` on any failure,
    /// which is also routed to the store's failure handler.
    pub fn commit(&mut self) -> bool {
        self.try_commit().is_ok()
    }

    /// Write the batch and wait for it, returning the failure if any.
    ///
    /// Called from a change listener, the batch runs right there on the
    /// store's worker instead of queueing behind the listener.
    pub fn try_commit(&mut self) -> PrefsResult<()> {
        let batch = self.take();
        self.prefs.commit_batch(batch)
    }

    /// Queue the batch and return immediately. Failures never surface here;
    /// they reach the failure handler and the returned handle.
    pub fn apply(&mut self) -> TaskHandle {
        let batch = self.take();
        self.prefs.submit_batch("apply", batch)
    }

    fn take(&mut self) -> PrefsResult<Batch> {
        let batch = match self.error.take() {
            Some(err) => Err(err),
            None => Ok(Batch {
                clear: std::mem::take(&mut self.clear),
                changes: std::mem::take(&mut self.changes),
            }),
        };
        self.clear = false;
        self.changes.clear();
        self.positions.clear();
        batch
    }

    fn record(&mut self, key: &str, change: Option<PrefValue>) -> &mut Self {
        let key = match PrefKey::new(key) {
            Ok(key) => key,
            Err(e) => {
                self.fail(e.into());
                return self;
            }
        };
        match self.positions.get(&key) {
            Some(&index) => self.changes[index].1 = change,
            None => {
                self.positions.insert(key.clone(), self.changes.len());
                self.changes.push((key, change));
            }
        }
        self
    }

    fn fail(&mut self, err: PrefsError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
