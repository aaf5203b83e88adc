//! Credential store handed to session handshakes.
//!
//! The connection manager never looks inside the store; it passes the same
//! store to every session it creates. Persistence belongs to whoever
//! implements the trait. [`MemoryCredentialStore`] keeps keys for the life of
//! the process only.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Private key material used to answer authentication challenges.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Vec<u8>);

impl Credential {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Short public fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.fingerprint()).finish()
    }
}

/// Source of keys for session authentication.
pub trait CredentialStore: Send + Sync {
    /// Keys currently available, in preference order.
    fn keys(&self) -> Result<Vec<Credential>>;

    /// Create and remember a new key.
    fn generate(&self) -> Result<Credential>;
}

/// Process-lifetime credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    keys: Mutex<Vec<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with existing keys.
    pub fn with_keys(keys: Vec<Credential>) -> Self {
        Self {
            keys: Mutex::new(keys),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn keys(&self) -> Result<Vec<Credential>> {
        Ok(self.keys.lock().clone())
    }

    fn generate(&self) -> Result<Credential> {
        let mut keys = self.keys.lock();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Credential(format!("system clock before epoch: {e}")))?
            .as_nanos();

        let mut hasher = Sha256::new();
        hasher.update(nanos.to_le_bytes());
        hasher.update((keys.len() as u64).to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        let key = Credential::new(hasher.finalize().to_vec());

        debug!(fingerprint = %key.fingerprint(), "Generated credential");
        keys.push(key.clone());
        Ok(key)
    }
}
