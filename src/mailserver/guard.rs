// Login abuse guard: failed-attempt counters and temporary IP blocks
//
// State lives only on disk, in two line-oriented files next to a lock file:
//
//   <state>            ip blockedUntilEpoch
//   <state>.attempts   ip:identity count lastAttemptEpoch
//   <state>.lock       exclusive flock held for every read-modify-write
//
// Connection handlers share nothing in memory, so the files are the only
// synchronization point between them, whether they run as tasks, threads or
// separate processes.

use crate::error::{MailError, Result};
use crate::mailserver::lock::{LockGuard, LockMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Blacklisting policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardPolicy {
    /// Failures for one (IP, identity) pair that trigger a block
    pub max_attempts: u32,
    /// Block length, also the window after which idle attempt records expire
    pub block_duration_secs: u64,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            block_duration_secs: 60,
        }
    }
}

/// Source of wall-clock time in whole epoch seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Consecutive failed logins of one identity from one address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptRecord {
    pub count: u32,
    pub last_attempt: u64,
}

/// Temporary block of a source address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub blocked_until: u64,
}

#[derive(Debug, Default)]
struct GuardState {
    blacklist: BTreeMap<String, BlacklistEntry>,
    attempts: BTreeMap<String, AttemptRecord>,
}

impl GuardState {
    /// Drop expired blocks and attempt records idle for a whole block window
    fn purge_expired(&mut self, now: u64, policy: &GuardPolicy) {
        self.blacklist.retain(|_, entry| now < entry.blocked_until);

        let cutoff = now.saturating_sub(policy.block_duration_secs);
        self.attempts.retain(|_, record| record.last_attempt >= cutoff);
    }
}

/// Persistent, cross-process login abuse guard
///
/// Constructed once at startup and handed to the command dispatcher.
#[derive(Clone)]
pub struct AbuseGuard {
    blacklist_path: PathBuf,
    attempts_path: PathBuf,
    lock_path: PathBuf,
    policy: GuardPolicy,
    clock: Arc<dyn Clock>,
}

impl AbuseGuard {
    /// Guard persisting to `state_file` and its `.attempts` / `.lock` siblings
    pub fn new(state_file: &Path, policy: GuardPolicy) -> Result<Self> {
        Self::with_clock(state_file, policy, Arc::new(SystemClock))
    }

    /// Guard with an explicit time source
    pub fn with_clock(state_file: &Path, policy: GuardPolicy, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = state_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| MailError::io(parent, e))?;
            }
        }

        Ok(Self {
            blacklist_path: state_file.to_path_buf(),
            attempts_path: sibling(state_file, "attempts"),
            lock_path: sibling(state_file, "lock"),
            policy,
            clock,
        })
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Whether logins from `ip` are currently refused
    ///
    /// Fails open: if the state cannot be locked or read the address is
    /// treated as not blacklisted, so starving the lock cannot block every
    /// login.
    pub fn is_blacklisted(&self, ip: &str) -> bool {
        let result = self.with_state(|state, now| {
            state
                .blacklist
                .get(ip)
                .is_some_and(|entry| now < entry.blocked_until)
        });

        match result {
            Ok(blocked) => blocked,
            Err(e) => {
                tracing::warn!("Blacklist check for {} failed open: {}", ip, e);
                false
            }
        }
    }

    /// Count a failed login; returns `true` if this attempt blacklisted `ip`
    pub fn record_failure(&self, ip: &str, identity: &str) -> Result<bool> {
        let policy = self.policy;
        let key = attempt_key(ip, identity);

        self.with_state(|state, now| {
            let record = state.attempts.entry(key.clone()).or_default();
            record.count += 1;
            record.last_attempt = now;

            if record.count < policy.max_attempts {
                return false;
            }

            state.attempts.remove(&key);
            state.blacklist.insert(
                ip.to_string(),
                BlacklistEntry {
                    blocked_until: now + policy.block_duration_secs,
                },
            );
            true
        })
    }

    /// Clear the failure counter after a successful login
    pub fn record_success(&self, ip: &str, identity: &str) -> Result<()> {
        let key = attempt_key(ip, identity);
        self.with_state(|state, _| {
            state.attempts.remove(&key);
        })
    }

    /// Current failure count for an (IP, identity) pair
    pub fn attempt_count(&self, ip: &str, identity: &str) -> Result<u32> {
        let key = attempt_key(ip, identity);
        self.with_state(|state, _| state.attempts.get(&key).map_or(0, |r| r.count))
    }

    /// Load, purge, apply `f`, save; all under the exclusive state lock
    fn with_state<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut GuardState, u64) -> T,
    {
        let _guard = LockGuard::acquire(&self.lock_path, LockMode::Exclusive)?;
        let now = self.clock.now();

        let mut state = GuardState {
            blacklist: load_blacklist(&self.blacklist_path)?,
            attempts: load_attempts(&self.attempts_path)?,
        };
        state.purge_expired(now, &self.policy);

        let result = f(&mut state, now);

        save(&self.blacklist_path, render_blacklist(&state.blacklist))?;
        save(&self.attempts_path, render_attempts(&state.attempts))?;

        Ok(result)
    }
}

fn attempt_key(ip: &str, identity: &str) -> String {
    format!("{}:{}", ip, identity)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn read_optional(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(MailError::io(path, e)),
    }
}

fn load_blacklist(path: &Path) -> Result<BTreeMap<String, BlacklistEntry>> {
    let mut blacklist = BTreeMap::new();

    for line in read_optional(path)?.lines() {
        let mut fields = line.split_whitespace();
        let parsed = match (fields.next(), fields.next(), fields.next()) {
            (Some(ip), Some(until), None) => until.parse().ok().map(|t| (ip, t)),
            _ => None,
        };

        match parsed {
            Some((ip, blocked_until)) => {
                blacklist.insert(ip.to_string(), BlacklistEntry { blocked_until });
            }
            None if line.trim().is_empty() => {}
            None => tracing::debug!("Skipping malformed blacklist line {:?}", line),
        }
    }

    Ok(blacklist)
}

fn load_attempts(path: &Path) -> Result<BTreeMap<String, AttemptRecord>> {
    let mut attempts = BTreeMap::new();

    for line in read_optional(path)?.lines() {
        // Parse from the right: the key embeds the identity
        let mut fields = line.rsplitn(3, ' ');
        let parsed = match (fields.next(), fields.next(), fields.next()) {
            (Some(last), Some(count), Some(key)) if !key.is_empty() => {
                match (count.parse(), last.parse()) {
                    (Ok(count), Ok(last_attempt)) => Some((key, AttemptRecord { count, last_attempt })),
                    _ => None,
                }
            }
            _ => None,
        };

        match parsed {
            Some((key, record)) => {
                attempts.insert(key.to_string(), record);
            }
            None if line.trim().is_empty() => {}
            None => tracing::debug!("Skipping malformed attempts line {:?}", line),
        }
    }

    Ok(attempts)
}

fn render_blacklist(blacklist: &BTreeMap<String, BlacklistEntry>) -> String {
    blacklist
        .iter()
        .map(|(ip, entry)| format!("{} {}\n", ip, entry.blocked_until))
        .collect()
}

fn render_attempts(attempts: &BTreeMap<String, AttemptRecord>) -> String {
    attempts
        .iter()
        .map(|(key, record)| format!("{} {} {}\n", key, record.count, record.last_attempt))
        .collect()
}

/// Replace a state file via a temporary sibling and rename
fn save(path: &Path, contents: String) -> Result<()> {
    let tmp = sibling(path, "tmp");

    let written = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(contents.as_bytes())?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));

    written.map_err(|e| {
        let _ = fs::remove_file(&tmp);
        MailError::io(path, e)
    })
}
