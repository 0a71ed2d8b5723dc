use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by preference store backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying storage failure (I/O, permissions, corruption, cipher).
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Contract for the encrypted-at-rest key/value backend behind [`crate::CryptoPrefs`].
///
/// Values are canonical text; encryption is entirely the backend's concern and callers
/// never see ciphertext.
#[async_trait]
pub trait PrefsStore: Send + Sync {
    /// Retrieve the value for a key, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Persist a value under a key, overwriting any existing entry.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Persist every entry in order as a single atomic unit.
    ///
    /// Readers observe either none or all of the entries. When a key appears more than
    /// once the last occurrence wins.
    async fn put_all(&self, entries: &[(String, String)]) -> Result<(), StoreError>;

    /// Remove a key and its value (idempotent).
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every entry.
    async fn erase(&self) -> Result<(), StoreError>;

    /// Point-in-time snapshot of every entry, ordered by key.
    async fn entries(&self) -> Result<Vec<(String, String)>, StoreError>;
}

/// In-memory store that masks values for tests and smoke runs.
/// This is not cryptographically secure; real deployments use the AES-GCM file store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPrefsStore {
    inner: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryPrefsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StoreError> {
        self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl PrefsStore for InMemoryPrefsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let map = self.lock()?;
        map.get(key).map(|masked| unmask(masked)).transpose()
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        // XOR is a placeholder to avoid storing plaintext in tests.
        map.insert(key.to_string(), mask(value.as_bytes()));
        Ok(())
    }

    async fn put_all(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        // One guard for the whole batch keeps it atomic for other readers.
        let mut map = self.lock()?;
        for (key, value) in entries {
            map.insert(key.clone(), mask(value.as_bytes()));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        map.remove(key);
        Ok(())
    }

    async fn erase(&self) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        map.clear();
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
        let map = self.lock()?;
        map.iter()
            .map(|(key, masked)| Ok((key.clone(), unmask(masked)?)))
            .collect()
    }
}

const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}

fn unmask(input: &[u8]) -> Result<String, StoreError> {
    // XOR twice restores original.
    String::from_utf8(mask(input)).map_err(|err| StoreError::Storage {
        reason: format!("corrupt entry: {err}"),
    })
}
