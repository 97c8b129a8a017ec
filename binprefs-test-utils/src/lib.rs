//! binprefs Test Utilities
//!
//! Shared test infrastructure for the binprefs workspace:
//! - Proptest generators for keys and values
//! - Mock encryption, file adapters and transports
//! - Temp-directory fixtures and simulated processes
//! - Tracing setup for test output

pub use binprefs_core::{
    ByteEncryption, CodecError, FileOp, PrefKey, PrefValue, PrefsError, PrefsResult,
    StorageError, StoreConfig, StoreName,
};
pub use binprefs_events::{BroadcastTransport, EventTransport, PayloadSink, Subscription, TransportError};
pub use binprefs_storage::{
    DirectoryProvider, FileAdapter, FixedDirectoryProvider, FsFileAdapter, StagedFile, StoreId,
    StoreRegistry, LOCK_FILE_NAME,
};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness, filtered by `RUST_LOG`
/// (default `warn`). Safe to call from every test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// MOCK ENCRYPTION
// ============================================================================

/// Repeating-key XOR. Not encryption, but changes every byte and needs the
/// same key to reverse.
#[derive(Debug, Clone)]
pub struct XorEncryption {
    key: Vec<u8>,
}

impl XorEncryption {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        Self {
            key: if key.is_empty() { vec![0x5a] } else { key },
        }
    }

    fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        bytes
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

impl ByteEncryption for XorEncryption {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(self.apply(plain))
    }

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(self.apply(cipher))
    }
}

// ============================================================================
// MOCK FILE ADAPTER
// ============================================================================

/// Wraps a real adapter and fails chosen operations on chosen keys.
///
/// Failures look like disk errors (`StorageError::Io`), so they travel the
/// same path a full disk or a permission error would.
#[derive(Debug)]
pub struct FaultInjectingAdapter {
    inner: Arc<dyn FileAdapter>,
    fail_stage: Mutex<HashSet<String>>,
    fail_promote: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
    promotes: AtomicUsize,
}

impl FaultInjectingAdapter {
    pub fn new(inner: Arc<dyn FileAdapter>) -> Self {
        Self {
            inner,
            fail_stage: Mutex::new(HashSet::new()),
            fail_promote: Mutex::new(HashSet::new()),
            fail_reads: AtomicBool::new(false),
            promotes: AtomicUsize::new(0),
        }
    }

    /// Wrap a filesystem adapter rooted at `dir`.
    pub fn on_directory(dir: impl Into<PathBuf>) -> PrefsResult<Self> {
        let provider = FixedDirectoryProvider::new(dir);
        Ok(Self::new(Arc::new(FsFileAdapter::open(&provider, true)?)))
    }

    /// Fail writing the temp file for `key`.
    pub fn fail_stage_for(&self, key: &str) -> &Self {
        self.fail_stage.lock().insert(file_name(key));
        self
    }

    /// Fail the rename that commits `key`.
    pub fn fail_promote_for(&self, key: &str) -> &Self {
        self.fail_promote.lock().insert(file_name(key));
        self
    }

    pub fn fail_reads(&self, enabled: bool) -> &Self {
        self.fail_reads.store(enabled, Ordering::SeqCst);
        self
    }

    /// Stop injecting faults.
    pub fn heal(&self) {
        self.fail_stage.lock().clear();
        self.fail_promote.lock().clear();
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    /// Successful promotes so far.
    pub fn promotes(&self) -> usize {
        self.promotes.load(Ordering::SeqCst)
    }

    fn injected(&self, op: FileOp, name: &str) -> PrefsError {
        let err = io::Error::new(io::ErrorKind::Other, "injected fault");
        StorageError::io(op, self.inner.directory().join(name), &err).into()
    }
}

fn file_name(key: &str) -> String {
    match PrefKey::new(key) {
        Ok(key) => key.file_name(),
        Err(_) => key.to_string(),
    }
}

impl FileAdapter for FaultInjectingAdapter {
    fn directory(&self) -> &Path {
        self.inner.directory()
    }

    fn names(&self) -> PrefsResult<Vec<String>> {
        self.inner.names()
    }

    fn read(&self, name: &str) -> PrefsResult<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(self.injected(FileOp::Read, name));
        }
        self.inner.read(name)
    }

    fn stage(&self, name: &str, bytes: &[u8]) -> PrefsResult<StagedFile> {
        if self.fail_stage.lock().contains(name) {
            return Err(self.injected(FileOp::Write, name));
        }
        self.inner.stage(name, bytes)
    }

    fn promote(&self, staged: StagedFile) -> PrefsResult<()> {
        if self.fail_promote.lock().contains(staged.target()) {
            let err = self.injected(FileOp::Rename, staged.target());
            self.inner.discard(staged);
            return Err(err);
        }
        self.inner.promote(staged)?;
        self.promotes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn discard(&self, staged: StagedFile) {
        self.inner.discard(staged)
    }

    fn remove(&self, name: &str) -> PrefsResult<bool> {
        self.inner.remove(name)
    }

    fn sweep_temp(&self) -> PrefsResult<usize> {
        self.inner.sweep_temp()
    }
}

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// Transport that records every payload sent through it.
///
/// Optionally forwards to an inner transport so stores still see each
/// other, and can be switched to fail sends.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    inner: Option<Arc<dyn EventTransport>>,
    sent: Mutex<Vec<Vec<u8>>>,
    failure: Mutex<Option<TransportError>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarding(inner: Arc<dyn EventTransport>) -> Self {
        Self {
            inner: Some(inner),
            ..Self::default()
        }
    }

    /// Make every later send fail with `err`, or succeed again with `None`.
    pub fn fail_with(&self, err: Option<TransportError>) {
        *self.failure.lock() = err;
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl EventTransport for RecordingTransport {
    fn send(&self, payload: &[u8]) -> Result<usize, TransportError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        self.sent.lock().push(payload.to_vec());
        match &self.inner {
            Some(inner) => inner.send(payload),
            None => Ok(0),
        }
    }

    fn subscribe(&self, sink: PayloadSink) -> Result<Subscription, TransportError> {
        match &self.inner {
            Some(inner) => inner.subscribe(sink),
            None => Ok(Subscription::detached()),
        }
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::collection::{btree_set, vec};
    use proptest::prelude::*;

    /// Valid keys, including ones that are awkward as file names.
    pub fn key_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z][a-z0-9_.]{0,24}",
            "[A-Za-z0-9 /:*?\"<>|.-]{1,32}",
            "\\PC{1,16}",
        ]
        .prop_filter("key must be valid", |key| PrefKey::new(key.as_str()).is_ok())
    }

    /// Built-in values. Floats are finite so equality holds after a round trip.
    pub fn value_strategy() -> impl Strategy<Value = PrefValue> {
        prop_oneof![
            any::<bool>().prop_map(PrefValue::Bool),
            any::<i8>().prop_map(PrefValue::Byte),
            any::<i16>().prop_map(PrefValue::Short),
            any::<i32>().prop_map(PrefValue::Int),
            any::<i64>().prop_map(PrefValue::Long),
            (-1.0e6f32..1.0e6f32).prop_map(PrefValue::Float),
            (-1.0e12f64..1.0e12f64).prop_map(PrefValue::Double),
            any::<char>().prop_map(PrefValue::Char),
            "\\PC{0,48}".prop_map(PrefValue::String),
            btree_set("[a-z]{0,8}", 0..6).prop_map(PrefValue::StringSet),
            vec(any::<u8>(), 0..64).prop_map(PrefValue::Bytes),
        ]
    }

    /// A batch of puts over a small key space, so keys repeat.
    pub fn batch_strategy(max: usize) -> impl Strategy<Value = Vec<(String, PrefValue)>> {
        vec(("k[0-4]", value_strategy()), 1..=max.max(1))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Temp directory holding one or more stores, deleted on drop.
    #[derive(Debug)]
    pub struct TempStore {
        dir: TempDir,
    }

    impl TempStore {
        pub fn new() -> Self {
            init_test_tracing();
            Self {
                dir: TempDir::new().expect("create temp dir"),
            }
        }

        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        /// Directory for the store called `name`.
        pub fn dir_for(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        /// Committed key files for `name`, excluding lock and temp files.
        pub fn key_files(&self, name: &str) -> Vec<String> {
            let mut files: Vec<String> = std::fs::read_dir(self.dir_for(name))
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .filter_map(|e| e.file_name().to_str().map(str::to_string))
                        .filter(|n| PrefKey::from_file_name(n).is_some())
                        .collect()
                })
                .unwrap_or_default();
            files.sort();
            files
        }

        /// Temp files left in `name`'s directory.
        pub fn temp_files(&self, name: &str) -> Vec<String> {
            std::fs::read_dir(self.dir_for(name))
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .filter_map(|e| e.file_name().to_str().map(str::to_string))
                        .filter(|n| n.starts_with('.') && n.ends_with(".tmp"))
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    impl Default for TempStore {
        fn default() -> Self {
            Self::new()
        }
    }

    /// A fresh registry standing in for a separate process: its own locks,
    /// its own executors.
    pub fn new_process() -> Arc<StoreRegistry> {
        Arc::new(StoreRegistry::new())
    }

    /// Short timeouts so contention tests fail fast.
    pub fn test_config() -> StoreConfig {
        StoreConfig::new()
            .with_lock_timeout(Duration::from_secs(10))
            .with_lock_poll_interval(Duration::from_millis(2))
            .with_sync_directory(false)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that `err` is an I/O failure.
    pub fn assert_io_failure(err: &PrefsError) {
        assert!(
            matches!(err, PrefsError::Storage(StorageError::Io { .. })),
            "expected an I/O failure, got {err:?}"
        );
    }

    /// Assert that `err` is a decode failure.
    pub fn assert_decode_failure(err: &PrefsError) {
        assert!(err.is_decode_failure(), "expected a decode failure, got {err:?}");
    }
}
