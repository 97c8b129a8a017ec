//! Cross-process, reentrant store locks.
//!
//! A [`LockHandle`] combines two layers:
//!
//! ```text
//! thread A ──┐                         ┌── process 2
//!            ├─ ReentrantMutex ── flock(.binprefs.lock) ──┤
//! thread B ──┘   (in-process)          └── process 3
//! ```
//!
//! The in-process layer is a timed reentrant mutex, so a thread that already
//! holds the lock can take it again. The OS file lock is taken only on the
//! outermost acquisition and released when the nesting depth returns to
//! zero. Both layers share one deadline; running out of time yields
//! [`StorageError::LockTimeout`] instead of blocking forever.
//!
//! `flock(2)` locks belong to the open file description, so exactly one
//! handle per store may exist in a process. [`LockFactory`] enforces that.

use crate::registry::StoreId;
use binprefs_core::{FileOp, PrefsResult, StorageError, StoreConfig, StoreName};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct HeldState {
    depth: usize,
    file: Option<File>,
}

/// Named, reentrant mutual-exclusion object for one store.
#[derive(Debug)]
pub struct LockHandle {
    store: StoreName,
    lock_path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    state: ReentrantMutex<RefCell<HeldState>>,
}

impl LockHandle {
    fn new(store: StoreName, lock_path: PathBuf, config: &StoreConfig) -> Self {
        Self {
            store,
            lock_path,
            timeout: config.lock_timeout,
            poll_interval: config.lock_poll_interval,
            state: ReentrantMutex::new(RefCell::new(HeldState::default())),
        }
    }

    pub fn store(&self) -> &StoreName {
        &self.store
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lock, waiting at most the configured timeout.
    ///
    /// The returned guard releases one level of nesting when dropped.
    pub fn lock(&self) -> PrefsResult<LockGuard<'_>> {
        let started = Instant::now();
        let guard = self
            .state
            .try_lock_for(self.timeout)
            .ok_or_else(|| self.timed_out(started))?;

        {
            let mut held = guard.borrow_mut();
            if held.depth == 0 {
                let remaining = self.timeout.saturating_sub(started.elapsed());
                held.file = Some(self.lock_file(started, remaining)?);
            }
            held.depth += 1;
        }

        Ok(LockGuard { guard })
    }

    /// Nesting depth held by the current thread (zero if it holds nothing).
    pub fn depth(&self) -> usize {
        self.state
            .try_lock()
            .map(|guard| guard.borrow().depth)
            .unwrap_or(0)
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.depth() > 0
    }

    fn lock_file(&self, started: Instant, remaining: Duration) -> PrefsResult<File> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(FileOp::CreateDir, parent, &e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| StorageError::io(FileOp::Lock, &self.lock_path, &e))?;

        let deadline = Instant::now() + remaining;
        let mut contended = false;
        loop {
            match os_lock::try_lock(&file) {
                Ok(true) => {
                    if contended {
                        debug!(
                            store = %self.store,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "Acquired contended store lock"
                        );
                    }
                    return Ok(file);
                }
                Ok(false) => contended = true,
                Err(e) => return Err(StorageError::io(FileOp::Lock, &self.lock_path, &e).into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(started).into());
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn timed_out(&self, started: Instant) -> StorageError {
        let waited = started.elapsed();
        warn!(
            store = %self.store,
            waited_ms = waited.as_millis() as u64,
            "Timed out acquiring store lock"
        );
        StorageError::LockTimeout {
            store: self.store.to_string(),
            waited,
        }
    }
}

/// Scoped acquisition of a [`LockHandle`]; released on every exit path.
pub struct LockGuard<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<HeldState>>,
}

impl LockGuard<'_> {
    pub fn depth(&self) -> usize {
        self.guard.borrow().depth
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.guard.borrow_mut();
        held.depth = held.depth.saturating_sub(1);
        if held.depth == 0 {
            if let Some(file) = held.file.take() {
                os_lock::unlock(&file);
            }
        }
    }
}

// ============================================================================
// LOCK FACTORY
// ============================================================================

/// Hands out one shared [`LockHandle`] per store.
///
/// Handles are tracked weakly: when the last user drops its handle the entry
/// becomes dead and the next acquisition creates a fresh one.
#[derive(Debug, Default)]
pub struct LockFactory {
    handles: Mutex<HashMap<StoreId, Weak<LockHandle>>>,
}

impl LockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle for `id`, creating it on first use.
    pub fn acquire(&self, id: &StoreId, lock_path: PathBuf, config: &StoreConfig) -> Arc<LockHandle> {
        let mut handles = self.handles.lock();
        handles.retain(|_, weak| weak.strong_count() > 0);
        if let Some(handle) = handles.get(id).and_then(Weak::upgrade) {
            return handle;
        }
        let handle = Arc::new(LockHandle::new(id.name().clone(), lock_path, config));
        handles.insert(id.clone(), Arc::downgrade(&handle));
        handle
    }

    /// Number of live handles.
    pub fn live_handles(&self) -> usize {
        self.handles
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

// ============================================================================
// OS FILE LOCK
// ============================================================================

#[cfg(unix)]
mod os_lock {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    /// Non-blocking exclusive `flock`. `Ok(false)` means another open file
    /// description holds it.
    pub(super) fn try_lock(file: &File) -> io::Result<bool> {
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
            _ => Err(err),
        }
    }

    pub(super) fn unlock(file: &File) {
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(not(unix))]
mod os_lock {
    use std::fs::{File, TryLockError};
    use std::io;

    /// Non-blocking exclusive lock through the platform's native file
    /// locking (`LockFileEx` on Windows).
    pub(super) fn try_lock(file: &File) -> io::Result<bool> {
        match file.try_lock() {
            Ok(()) => Ok(true),
            Err(TryLockError::WouldBlock) => Ok(false),
            Err(TryLockError::Error(err)) => Err(err),
        }
    }

    pub(super) fn unlock(file: &File) {
        let _ = file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn store_id(dir: &TempDir) -> StoreId {
        StoreId::new(StoreName::new("settings").unwrap(), dir.path())
    }

    fn fast_config() -> StoreConfig {
        StoreConfig::new()
            .with_lock_timeout(Duration::from_millis(200))
            .with_lock_poll_interval(Duration::from_millis(2))
    }

    #[test]
    fn test_reentrant_acquisition() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new();
        let handle = factory.acquire(&store_id(&dir), dir.path().join(".binprefs.lock"), &fast_config());

        let outer = handle.lock().unwrap();
        {
            let inner = handle.lock().unwrap();
            assert_eq!(inner.depth(), 2);
        }
        assert_eq!(outer.depth(), 1);
        drop(outer);
        assert_eq!(handle.depth(), 0);
        assert!(!handle.is_held_by_current_thread());
    }

    #[test]
    fn test_factory_shares_handle_per_store() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new();
        let id = store_id(&dir);
        let a = factory.acquire(&id, dir.path().join(".binprefs.lock"), &fast_config());
        let b = factory.acquire(&id, dir.path().join(".binprefs.lock"), &fast_config());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.live_handles(), 1);

        drop(a);
        drop(b);
        assert_eq!(factory.live_handles(), 0);
    }

    #[test]
    fn test_other_thread_times_out() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new();
        let handle = factory.acquire(&store_id(&dir), dir.path().join(".binprefs.lock"), &fast_config());

        let _held = handle.lock().unwrap();
        let contender = Arc::clone(&handle);
        let result = thread::spawn(move || contender.lock().map(|_| ()))
            .join()
            .unwrap();

        let err = result.unwrap_err();
        assert_eq!(err.kind(), binprefs_core::ErrorKind::LockTimeout);
    }

    #[test]
    fn test_lock_serializes_threads() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new();
        let config = StoreConfig::new().with_lock_timeout(Duration::from_secs(5));
        let handle = factory.acquire(&store_id(&dir), dir.path().join(".binprefs.lock"), &config);
        let inside = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let _guard = handle.lock().unwrap();
                        assert!(!inside.swap(true, Ordering::SeqCst));
                        thread::yield_now();
                        inside.store(false, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_separate_factories_exclude_each_other() {
        // Two factories stand in for two processes: each opens its own file
        // description, so only the OS file lock keeps them apart.
        let dir = TempDir::new().unwrap();
        let id = store_id(&dir);
        let path = dir.path().join(".binprefs.lock");
        let first = LockFactory::new().acquire(&id, path.clone(), &fast_config());
        let second = LockFactory::new().acquire(&id, path, &fast_config());

        let held = first.lock().unwrap();
        let err = second.lock().map(|_| ()).unwrap_err();
        assert_eq!(err.kind(), binprefs_core::ErrorKind::LockTimeout);

        drop(held);
        assert!(second.lock().is_ok());
    }
}
