// Advisory file locks shared by the mailbox store and the abuse guard

use crate::error::{MailError, Result};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// How a lock is held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders at once, excludes exclusive holders
    Shared,
    /// Single holder, excludes everyone else
    Exclusive,
}

/// An acquired `flock`-style lock on a lock file
///
/// The lock is visible to every process opening the same path. It is released
/// when the guard is dropped, including on early returns and panics.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Block until the lock on `path` is granted in `mode`
    ///
    /// The lock file and its parent directory are created if missing.
    pub fn acquire(path: &Path, mode: LockMode) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MailError::lock(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| MailError::lock(path, e))?;

        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|e| MailError::lock(path, e))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock anyway.
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!("Failed to unlock {:?}: {}", self.path, e);
        }
    }
}
