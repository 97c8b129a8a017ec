//! Store directory resolution.
//!
//! Resolving a platform-specific location is the caller's job; the storage
//! layer only needs a stable, writable absolute path per store.

use binprefs_core::StoreName;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the per-store lock file inside the store directory.
pub const LOCK_FILE_NAME: &str = ".binprefs.lock";

/// Supplies the base directory of one store.
///
/// The path must stay the same for the lifetime of the store and be
/// writable by the current process.
pub trait DirectoryProvider: Send + Sync + fmt::Debug {
    fn base_directory(&self) -> &Path;

    /// Dedicated lock file for the store.
    fn lock_file(&self) -> PathBuf {
        self.base_directory().join(LOCK_FILE_NAME)
    }
}

/// A provider backed by a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDirectoryProvider {
    base: PathBuf,
}

impl FixedDirectoryProvider {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `<root>/<store name>`, one subdirectory per store under a shared root.
    pub fn for_store(root: impl AsRef<Path>, name: &StoreName) -> Self {
        Self::new(root.as_ref().join(name.as_str()))
    }
}

impl DirectoryProvider for FixedDirectoryProvider {
    fn base_directory(&self) -> &Path {
        &self.base
    }
}
