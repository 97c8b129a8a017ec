//! Raw byte-level primitives against the store directory.

use crate::directory::DirectoryProvider;
use binprefs_core::{FileOp, PrefsResult, StorageError};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const TEMP_SUFFIX: &str = ".tmp";

/// A fully written and synced temp file waiting to be renamed over `target`.
#[derive(Debug)]
pub struct StagedFile {
    target: String,
    temp_path: PathBuf,
}

impl StagedFile {
    pub fn new(target: impl Into<String>, temp_path: PathBuf) -> Self {
        Self {
            target: target.into(),
            temp_path,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

/// Byte-level file operations. Names are bare file names inside the store
/// directory, never paths.
pub trait FileAdapter: Send + Sync + fmt::Debug {
    fn directory(&self) -> &Path;

    /// File names currently in the directory.
    fn names(&self) -> PrefsResult<Vec<String>>;

    /// Contents of `name`, or `None` if it does not exist.
    fn read(&self, name: &str) -> PrefsResult<Option<Vec<u8>>>;

    /// Write `bytes` to a fresh temp file next to `name` and sync it.
    fn stage(&self, name: &str, bytes: &[u8]) -> PrefsResult<StagedFile>;

    /// Atomically rename a staged file over its target.
    fn promote(&self, staged: StagedFile) -> PrefsResult<()>;

    /// Delete a staged file that will not be promoted. Best effort.
    fn discard(&self, staged: StagedFile);

    /// Delete `name`. Returns whether it existed.
    fn remove(&self, name: &str) -> PrefsResult<bool>;

    /// Delete temp files left behind by crashed writers. Must only be
    /// called while holding the store's exclusive lock.
    fn sweep_temp(&self) -> PrefsResult<usize>;
}

/// [`FileAdapter`] over the local filesystem.
#[derive(Debug, Clone)]
pub struct FsFileAdapter {
    dir: PathBuf,
    sync_directory: bool,
}

impl FsFileAdapter {
    /// Open the adapter, creating the directory if needed.
    pub fn open(provider: &dyn DirectoryProvider, sync_directory: bool) -> PrefsResult<Self> {
        let dir = provider.base_directory().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(FileOp::CreateDir, &dir, &e))?;
        Ok(Self {
            dir,
            sync_directory,
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn temp_name(name: &str) -> String {
        format!(".{}.{}{}", name, Uuid::new_v4().simple(), TEMP_SUFFIX)
    }

    fn is_temp_name(name: &str) -> bool {
        name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
    }

    /// Persist the directory entry itself after a rename or unlink.
    fn sync_dir(&self) -> PrefsResult<()> {
        if !self.sync_directory {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let dir = fs::File::open(&self.dir)
                .map_err(|e| StorageError::io(FileOp::Sync, &self.dir, &e))?;
            dir.sync_all()
                .map_err(|e| StorageError::io(FileOp::Sync, &self.dir, &e))?;
        }
        Ok(())
    }
}

impl FileAdapter for FsFileAdapter {
    fn directory(&self) -> &Path {
        &self.dir
    }

    fn names(&self) -> PrefsResult<Vec<String>> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| StorageError::io(FileOp::List, &self.dir, &e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(FileOp::List, &self.dir, &e))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    fn read(&self, name: &str) -> PrefsResult<Option<Vec<u8>>> {
        let path = self.path(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(FileOp::Read, &path, &e).into()),
        }
    }

    fn stage(&self, name: &str, bytes: &[u8]) -> PrefsResult<StagedFile> {
        let temp_path = self.path(&Self::temp_name(name));
        let staged = StagedFile::new(name, temp_path);

        let result = (|| -> io::Result<()> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(staged.temp_path())?;
            file.write_all(bytes)?;
            file.sync_all()
        })();

        match result {
            Ok(()) => Ok(staged),
            Err(e) => {
                let err = StorageError::io(FileOp::Write, staged.temp_path(), &e);
                self.discard(staged);
                Err(err.into())
            }
        }
    }

    fn promote(&self, staged: StagedFile) -> PrefsResult<()> {
        let target = self.path(staged.target());
        if let Err(e) = fs::rename(staged.temp_path(), &target) {
            let err = StorageError::io(FileOp::Rename, &target, &e);
            self.discard(staged);
            return Err(err.into());
        }
        self.sync_dir()
    }

    fn discard(&self, staged: StagedFile) {
        match fs::remove_file(staged.temp_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %staged.temp_path().display(),
                error = %e,
                "Failed to discard staged file"
            ),
        }
    }

    fn remove(&self, name: &str) -> PrefsResult<bool> {
        let path = self.path(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.sync_dir()?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(FileOp::Remove, &path, &e).into()),
        }
    }

    fn sweep_temp(&self) -> PrefsResult<usize> {
        let mut swept = 0;
        for name in self.names()? {
            if !Self::is_temp_name(&name) {
                continue;
            }
            let path = self.path(&name);
            match fs::remove_file(&path) {
                Ok(()) => swept += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(FileOp::Remove, &path, &e).into()),
            }
        }
        if swept > 0 {
            debug!(dir = %self.dir.display(), swept, "Swept orphaned temp files");
        }
        Ok(swept)
    }
}
