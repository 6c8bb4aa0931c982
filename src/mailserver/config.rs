// Server configuration: defaults, JSON file, CLI overrides

use crate::mailserver::cli::ServeArgs;
use crate::mailserver::frame::MAX_FRAME_LEN;
use crate::mailserver::guard::GuardPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8025;

/// Everything needed to start a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Root of the per-identity mailbox directories
    pub spool_dir: PathBuf,
    /// Abuse guard blacklist file; defaults to `<spool>/.guard/blacklist`
    pub guard_state_file: Option<PathBuf>,
    /// Credentials file for the built-in directory
    pub credentials_file: Option<PathBuf>,
    /// Idle read timeout per connection
    pub idle_timeout_secs: Option<u64>,
    /// Request size cap in bytes
    pub max_frame_len: u32,
    pub policy: GuardPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            spool_dir: PathBuf::from("spool"),
            guard_state_file: None,
            credentials_file: None,
            idle_timeout_secs: None,
            max_frame_len: MAX_FRAME_LEN,
            policy: GuardPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON configuration file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        serde_json::from_str(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Resolve `serve` arguments: defaults, then `--config`, then flags
    pub fn from_args(args: &ServeArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(port) = args.port {
            config.listen_addr.set_port(port);
        }
        if let Some(ip) = args.bind {
            config.listen_addr.set_ip(ip);
        }
        if let Some(spool_dir) = &args.spool_dir {
            config.spool_dir = spool_dir.clone();
        }
        if let Some(credentials) = &args.credentials {
            config.credentials_file = Some(credentials.clone());
        }
        if let Some(guard_state) = &args.guard_state {
            config.guard_state_file = Some(guard_state.clone());
        }
        if let Some(max_attempts) = args.max_attempts {
            config.policy.max_attempts = max_attempts;
        }
        if let Some(block_secs) = args.block_secs {
            config.policy.block_duration_secs = block_secs;
        }
        if let Some(idle) = args.idle_timeout {
            config.idle_timeout_secs = Some(idle);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_len == 0 {
            anyhow::bail!("max_frame_len must be positive");
        }
        if self.policy.max_attempts == 0 {
            anyhow::bail!("policy.max_attempts must be at least 1");
        }
        if self.idle_timeout_secs == Some(0) {
            anyhow::bail!("idle timeout must be at least one second");
        }
        Ok(())
    }

    /// Blacklist state file actually used
    pub fn guard_state_path(&self) -> PathBuf {
        self.guard_state_file
            .clone()
            .unwrap_or_else(|| self.spool_dir.join(".guard").join("blacklist"))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}
