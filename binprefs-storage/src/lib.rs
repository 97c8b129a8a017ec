//! binprefs Storage - Durable, Multi-Process Store Engine
//!
//! Everything below the facade that touches disk or coordinates writers:
//!
//! - [`directory`]: where a store lives
//! - [`file`]: byte-level adapter and the atomic commit protocol
//! - [`lock`]: reentrant cross-process store locks
//! - [`cache`]: process-local mirror of decoded entries
//! - [`task`]: one serialized background worker per store
//! - [`peers`]: in-process fan-out between facades of one store
//! - [`registry`]: process-scoped ownership of locks and workers

pub mod cache;
pub mod directory;
pub mod file;
pub mod lock;
pub mod peers;
pub mod registry;
pub mod task;

pub use cache::{CacheLookup, CacheProvider, CacheStats, ConcurrentCacheProvider, Slot};
pub use directory::{DirectoryProvider, FixedDirectoryProvider, LOCK_FILE_NAME};
pub use file::{
    FileAdapter, FileTransaction, FsFileAdapter, MultiProcessTransaction, Mutation, StagedFile,
    TransactionRecord,
};
pub use lock::{LockFactory, LockGuard, LockHandle};
pub use peers::{PeerSet, PeerSink};
pub use registry::{ExecutorRegistry, StoreId, StoreRegistry};
pub use task::{FailureHandler, IgnoreFailureHandler, LoggingFailureHandler, StoreExecutor, TaskHandle};
