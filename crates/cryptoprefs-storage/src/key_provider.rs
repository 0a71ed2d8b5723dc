use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;

const KEY_LEN: usize = 32;

/// Key material sealing every value of one preferences file.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier for logging/rotation (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; KEY_LEN],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Supplies the data key (OS keychain in production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

#[async_trait]
impl KeyProvider for Box<dyn KeyProvider> {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        self.as_ref().get_or_create().await
    }
}

/// OS keyring-backed provider; one keyring entry per preferences file.
///
/// The key is resolved once and cached, so one provider always hands out one key even
/// if the keyring backend forgets entries.
pub struct KeyringProvider {
    service: String,
    account: String,
    cached: Mutex<Option<KeyMaterial>>,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            cached: Mutex::new(None),
        }
    }

    fn load_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;

        match entry.get_password() {
            Ok(secret) => decode_key(&self.account, &secret),
            Err(keyring::Error::NoEntry) => {
                debug!(account = %self.account, "no data key in keyring; generating one");
                let material = generate_key(&self.account);
                entry
                    .set_password(&encode_key(&material))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                Ok(material)
            }
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        // Keyring calls are synchronous and quick; the guard spans them so two callers
        // never both generate a key.
        let mut guard = self
            .cached
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let material = self.load_or_create()?;
        *guard = Some(material.clone());
        Ok(material)
    }
}

/// Provider over a caller-supplied base64 key, for deployments that manage keys
/// themselves.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    material: KeyMaterial,
}

impl StaticKeyProvider {
    pub fn from_base64(id: impl Into<String>, encoded: &str) -> Result<Self, KeyError> {
        Ok(Self {
            material: decode_key(&id.into(), encoded)?,
        })
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        Ok(self.material.clone())
    }
}

/// In-memory key provider for tests and ephemeral stores.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        Ok(guard.get_or_insert_with(|| generate_key("memory")).clone())
    }
}

fn generate_key(id: &str) -> KeyMaterial {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: id.to_string(),
        bytes,
    }
}

/// Base64 form of a freshly generated key, suitable for [`StaticKeyProvider`].
pub fn generate_encoded_key() -> String {
    encode_key(&generate_key("generated"))
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(id: &str, secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret.trim())
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|raw: Vec<u8>| {
        KeyError::Decode(format!("expected {KEY_LEN} bytes, got {}", raw.len()))
    })?;

    Ok(KeyMaterial {
        id: id.to_string(),
        bytes,
    })
}
