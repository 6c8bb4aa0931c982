// Identity directory used by LOGIN

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// External authority deciding whether a credential pair is valid
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, identity: &str, secret: &str) -> bool;
}

/// Hex-encoded SHA-256 digest of a secret, as stored in credentials files
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Directory backed by a credentials file of `identity sha256hex` lines
///
/// Blank lines and lines starting with `#` are ignored.
#[derive(Debug, Clone, Default)]
pub struct CredentialDirectory {
    digests: HashMap<String, String>,
}

impl CredentialDirectory {
    /// Empty directory that rejects everyone
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a credentials file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {:?}", path))?;

        Self::parse(&text).with_context(|| format!("Invalid credentials file {:?}", path))
    }

    /// Parse credentials file contents
    pub fn parse(text: &str) -> Result<Self> {
        let mut directory = Self::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(identity), Some(digest), None)
                    if digest.len() == 64 && hex::decode(digest).is_ok() =>
                {
                    directory
                        .digests
                        .insert(identity.to_string(), digest.to_ascii_lowercase());
                }
                _ => bail!("line {}: expected `identity sha256hex`", index + 1),
            }
        }

        Ok(directory)
    }

    /// Add an identity with a plaintext secret
    pub fn insert(&mut self, identity: impl Into<String>, secret: &str) {
        self.digests.insert(identity.into(), hash_secret(secret));
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with_user(mut self, identity: impl Into<String>, secret: &str) -> Self {
        self.insert(identity, secret);
        self
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl Authenticator for CredentialDirectory {
    fn authenticate(&self, identity: &str, secret: &str) -> bool {
        // Clients may leave stray whitespace or \r around either field
        let identity = identity.trim();
        let secret = secret.trim();
        if identity.is_empty() || secret.is_empty() {
            return false;
        }

        self.digests
            .get(identity)
            .is_some_and(|expected| *expected == hash_secret(secret))
    }
}
