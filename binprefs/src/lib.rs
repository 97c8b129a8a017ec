//! binprefs - Multi-Process Preferences Store
//!
//! A persistent key-value store for application settings that keeps one
//! file per key and stays consistent when several processes of the same
//! application read and write it at once.
//!
//! - Writes are batched in an [`Editor`] and applied by one background
//!   worker per store, either synchronously ([`Editor::commit`]) or
//!   fire-and-forget ([`Editor::apply`]).
//! - Every key file is replaced by atomic rename under a cross-process
//!   lock, so readers never see a partial value.
//! - Reads come from a process-local cache that other processes keep
//!   current through change events.
//!
//! ```no_run
//! use binprefs::{BroadcastTransport, Preferences};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(BroadcastTransport::default());
//! let prefs = Preferences::builder()
//!     .name("settings")
//!     .directory("/tmp/myapp/settings")
//!     .transport(transport)
//!     .open()?;
//!
//! prefs.edit().put_bool("onboarded", true).put_i32("retries", 3).apply();
//! let retries = prefs.get_i32("retries", 0)?;
//! # Ok::<(), binprefs::PrefsError>(())
//! ```

mod builder;
mod editor;
mod preferences;

pub use builder::PreferencesBuilder;
pub use editor::Editor;
pub use preferences::Preferences;

pub use binprefs_core::{
    ByteEncryption, CodecError, ConflictPolicy, CustomValue, ErrorKind, NoOpEncryption,
    Persistable, PrefKey, PrefType, PrefValue, PrefsError, PrefsResult, ShutdownPolicy,
    StoreConfig, StoreName,
};
pub use binprefs_events::{
    BroadcastTransport, ChangeListener, EventTransport, ListenerId, NoopTransport,
};
pub use binprefs_storage::{
    CacheStats, DirectoryProvider, FailureHandler, FixedDirectoryProvider, IgnoreFailureHandler,
    LoggingFailureHandler, StoreRegistry, TaskHandle,
};
