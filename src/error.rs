//! Error types for the mail spool
//!
//! Storage and guard operations report failures through [`MailError`]. The
//! command handlers never forward these to clients; every variant collapses
//! into a bare `ERR` reply after being logged.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for spool operations
pub type Result<T> = std::result::Result<T, MailError>;

/// Failure modes of the mailbox store and abuse guard
#[derive(Error, Debug)]
pub enum MailError {
    /// I/O failure on a specific spool path
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not acquire an advisory lock
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Owner name cannot be used as a mailbox directory
    #[error("invalid mailbox owner: {0:?}")]
    InvalidOwner(String),

    /// Every message ID in the mailbox is already taken
    #[error("no message IDs left in {0}")]
    IdsExhausted(PathBuf),
}

impl MailError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a lock acquisition error with the lock file path
    pub fn lock(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Lock {
            path: path.into(),
            source,
        }
    }
}
