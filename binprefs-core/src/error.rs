//! Error types for binprefs operations

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Filesystem operation that produced an I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOp {
    CreateDir,
    List,
    Read,
    Write,
    Sync,
    Rename,
    Remove,
    Lock,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileOp::CreateDir => "create_dir",
            FileOp::List => "list",
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::Sync => "sync",
            FileOp::Rename => "rename",
            FileOp::Remove => "remove",
            FileOp::Lock => "lock",
        };
        f.write_str(s)
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O failure during {op} on {path}: {reason}")]
    Io {
        op: FileOp,
        path: String,
        kind: std::io::ErrorKind,
        reason: String,
    },

    #[error("Lock for store '{store}' not acquired within {waited:?}")]
    LockTimeout { store: String, waited: Duration },

    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid store name '{name}': {reason}")]
    InvalidStoreName { name: String, reason: String },
}

impl StorageError {
    /// Capture an `std::io::Error` against the path and operation that raised it.
    pub fn io(op: FileOp, path: impl AsRef<std::path::Path>, err: &std::io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.as_ref().display().to_string(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

/// Serialization and encryption errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown type token '{token}'")]
    UnknownToken { token: String },

    #[error("Corrupted payload for token '{token}': {reason}")]
    Corrupted { token: String, reason: String },

    #[error("Encoded value truncated: needed {needed} bytes, found {found}")]
    Truncated { needed: usize, found: usize },

    #[error("Encryption transform failed: {reason}")]
    Encryption { reason: String },

    #[error("Serialization of '{token}' failed: {reason}")]
    Serialization { token: String, reason: String },

    #[error("Type mismatch for key '{key}': expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Type token '{token}' is already registered")]
    TokenConflict { token: String },
}

/// Background task errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task '{task}' failed: {reason}")]
    Failed { task: String, reason: String },

    #[error("Task '{task}' panicked: {reason}")]
    Panicked { task: String, reason: String },

    #[error("Task '{task}' was cancelled before it started")]
    Cancelled { task: String },

    #[error("Task '{task}' was discarded by executor shutdown")]
    Discarded { task: String },

    #[error("Executor for store '{store}' is shut down")]
    ExecutorShutDown { store: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Coarse classification of failures, matching the documented taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Disk write/rename/delete rejected by the OS.
    IoFailure,
    /// Mutual exclusion not acquired within bound.
    LockTimeout,
    /// Corrupted or unrecognized encoded bytes.
    DecodeFailure,
    /// Failure inside a queued mutation.
    TaskFailure,
    /// Caller supplied an invalid key, name, type or configuration.
    InvalidInput,
}

/// Master error type for all binprefs errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrefsError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl PrefsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrefsError::Storage(StorageError::Io { .. }) => ErrorKind::IoFailure,
            PrefsError::Storage(StorageError::LockTimeout { .. }) => ErrorKind::LockTimeout,
            PrefsError::Storage(_) => ErrorKind::InvalidInput,
            PrefsError::Codec(CodecError::TypeMismatch { .. })
            | PrefsError::Codec(CodecError::TokenConflict { .. }) => ErrorKind::InvalidInput,
            PrefsError::Codec(_) => ErrorKind::DecodeFailure,
            PrefsError::Task(_) => ErrorKind::TaskFailure,
            PrefsError::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// True when stored bytes could not be turned back into a value.
    ///
    /// Lets callers tell corrupted data apart from an absent key.
    pub fn is_decode_failure(&self) -> bool {
        self.kind() == ErrorKind::DecodeFailure
    }
}

/// Result type alias for binprefs operations.
pub type PrefsResult<T> = Result<T, PrefsError>;

// =============================================================================
// TESTS
// =============================================================================
