// File-backed mailbox store
//
// One directory per owner under the spool root, one `<id>.txt` file per
// message. Every operation runs under the owner's advisory lock so that
// concurrent handlers, in this process or another, never race on ID
// allocation or observe a half-written message.

use crate::error::{MailError, Result};
use crate::mailserver::lock::{LockGuard, LockMode};
use crate::mailserver::message::{subject_of, Message, MessageId, MessageSummary};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Directory under the spool root holding per-mailbox lock files
const LOCK_DIR: &str = ".locks";

/// Longest accepted owner name
const MAX_OWNER_LEN: usize = 255;

/// Mailbox storage rooted at a spool directory
#[derive(Debug, Clone)]
pub struct MailboxStore {
    root: PathBuf,
}

impl MailboxStore {
    /// Open (and create if needed) a spool directory
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| MailError::io(root, e))?;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Directory of `owner`'s mailbox
    pub fn mailbox_dir(&self, owner: &str) -> Result<PathBuf> {
        validate_owner(owner)?;
        Ok(self.root.join(owner))
    }

    fn lock_path(&self, owner: &str) -> PathBuf {
        self.root.join(LOCK_DIR).join(format!("{}.lock", owner))
    }

    /// Run `f` on `owner`'s mailbox directory while holding its lock
    ///
    /// Blocks until the lock is granted; there is no timeout. The directory
    /// passed to `f` may not exist yet.
    pub fn with_mailbox_lock<T, F>(&self, owner: &str, mode: LockMode, f: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let dir = self.mailbox_dir(owner)?;
        let _guard = LockGuard::acquire(&self.lock_path(owner), mode)?;
        f(&dir)
    }

    /// Store a message in the recipient's mailbox and return its new ID
    pub fn deliver(&self, message: &Message) -> Result<MessageId> {
        self.with_mailbox_lock(&message.to, LockMode::Exclusive, |dir| {
            fs::create_dir_all(dir).map_err(|e| MailError::io(dir, e))?;

            let id = next_message_id(dir)?;
            write_message(dir, id, &message.render())?;

            tracing::debug!("Stored message {} for {}", id, message.to);
            Ok(id)
        })
    }

    /// List `owner`'s messages in ascending ID order
    ///
    /// A mailbox that was never created lists as empty.
    pub fn list(&self, owner: &str) -> Result<Vec<MessageSummary>> {
        self.with_mailbox_lock(owner, LockMode::Shared, |dir| {
            let mut summaries = Vec::new();

            for (id, name) in numeric_entries(dir)? {
                if name != id.file_name() {
                    continue;
                }
                let path = dir.join(&name);
                let text = fs::read_to_string(&path).map_err(|e| MailError::io(&path, e))?;
                summaries.push(MessageSummary {
                    id,
                    subject: subject_of(&text).to_string(),
                });
            }

            summaries.sort_by_key(|s| s.id);
            Ok(summaries)
        })
    }

    /// Raw stored text of a message, `None` if it does not exist
    pub fn read(&self, owner: &str, id: MessageId) -> Result<Option<String>> {
        self.with_mailbox_lock(owner, LockMode::Shared, |dir| {
            let path = dir.join(id.file_name());
            match fs::read_to_string(&path) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(MailError::io(&path, e)),
            }
        })
    }

    /// Remove a message; `false` if it did not exist
    pub fn delete(&self, owner: &str, id: MessageId) -> Result<bool> {
        self.with_mailbox_lock(owner, LockMode::Exclusive, |dir| {
            let path = dir.join(id.file_name());
            match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(MailError::io(&path, e)),
            }
        })
    }
}

/// Next free ID in a mailbox directory: highest numeric stem plus one
///
/// Gaps left by deletions are not reused. Only sound under the mailbox's
/// exclusive lock.
pub fn next_message_id(dir: &Path) -> Result<MessageId> {
    match numeric_entries(dir)?.into_iter().map(|(id, _)| id).max() {
        None => Ok(MessageId::FIRST),
        Some(highest) => highest
            .next()
            .ok_or_else(|| MailError::IdsExhausted(dir.to_path_buf())),
    }
}

/// Regular files in `dir` whose name has a numeric stem
fn numeric_entries(dir: &Path) -> Result<Vec<(MessageId, String)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MailError::io(dir, e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MailError::io(dir, e))?;
        let is_file = entry
            .file_type()
            .map_err(|e| MailError::io(entry.path(), e))?
            .is_file();
        if !is_file {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = MessageId::from_file_name(&name) {
            found.push((id, name));
        }
    }

    Ok(found)
}

/// Write message text durably under its final name
fn write_message(dir: &Path, id: MessageId, text: &str) -> Result<()> {
    let tmp_path = dir.join(format!(".{}.tmp", id));
    let final_path = dir.join(id.file_name());

    let written = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(text.as_bytes())?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, &final_path));

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(MailError::io(&final_path, e));
    }

    Ok(())
}

/// Reject owner names that are not a single plain path component
fn validate_owner(owner: &str) -> Result<()> {
    let valid = !owner.is_empty()
        && owner.len() <= MAX_OWNER_LEN
        && !owner.starts_with('.')
        && !owner
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());

    if valid {
        Ok(())
    } else {
        Err(MailError::InvalidOwner(owner.to_string()))
    }
}
