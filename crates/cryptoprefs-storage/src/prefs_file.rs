use std::{
    collections::BTreeMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cryptoprefs_core::store::{PrefsStore, StoreError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::key_provider::{KeyMaterial, KeyProvider};

const DOCUMENT_VERSION: u32 = 1;
const FILE_EXTENSION: &str = "prefs.json";

/// Whether new values are sealed before they reach disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    #[default]
    Enabled,
    Disabled,
}

/// One preferences file holding every entry of a named store.
///
/// Each value is sealed on its own with AES-256-GCM, bound to its key as associated
/// data. The whole document is rewritten through a temp file and renamed into place,
/// so a batch either lands completely or not at all.
pub struct EncryptedPrefsFile<P: KeyProvider> {
    path: PathBuf,
    key_provider: P,
    encryption: Encryption,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl<P: KeyProvider> EncryptedPrefsFile<P> {
    pub fn new(root: impl AsRef<Path>, file_name: &str, key_provider: P) -> Self {
        Self {
            path: root.as_ref().join(file_name_for(file_name)),
            key_provider,
            encryption: Encryption::Enabled,
            guard: Mutex::new(()),
        }
    }

    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn cipher(&self) -> Result<Aes256Gcm, StoreError> {
        let key_material =
            self.key_provider
                .get_or_create()
                .await
                .map_err(|e| StoreError::Storage {
                    reason: format!("key provider: {e}"),
                })?;
        build_cipher(&key_material)
    }

    /// Seal every entry with a single key lookup.
    async fn seal_all(
        &self,
        entries: &[(String, String)],
    ) -> Result<Vec<(String, StoredValue)>, StoreError> {
        let cipher = match self.encryption {
            Encryption::Enabled => Some(self.cipher().await?),
            Encryption::Disabled => None,
        };
        entries
            .iter()
            .map(|(key, value)| -> Result<(String, StoredValue), StoreError> {
                let stored = match &cipher {
                    Some(cipher) => seal_with(cipher, key, value)?,
                    None => StoredValue::Plain {
                        plain: value.clone(),
                    },
                };
                Ok((key.clone(), stored))
            })
            .collect()
    }

    /// Open every entry, looking the key up at most once.
    async fn open_all(
        &self,
        entries: impl IntoIterator<Item = (String, StoredValue)>,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let mut cipher = None;
        let mut out = Vec::new();
        for (key, stored) in entries {
            let value = match stored {
                StoredValue::Plain { plain } => plain,
                sealed @ StoredValue::Sealed { .. } => {
                    let active = match cipher.take() {
                        Some(active) => active,
                        None => self.cipher().await?,
                    };
                    let value = open_with(&active, &key, sealed)?;
                    cipher = Some(active);
                    value
                }
            };
            out.push((key, value));
        }
        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.guard.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }

    fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, StoredValue>) -> bool,
    {
        let _guard = self.lock()?;
        let mut document = read_document(&self.path)?;
        if mutate(&mut document.entries) {
            write_document(&self.path, &document)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PrefsDocument {
    version: u32,
    entries: BTreeMap<String, StoredValue>,
}

impl Default for PrefsDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Sealed { nonce: String, ciphertext: String },
    Plain { plain: String },
}

#[async_trait]
impl<P: KeyProvider> PrefsStore for EncryptedPrefsFile<P> {
    #[instrument(skip_all, fields(key))]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let stored = {
            let _guard = self.lock()?;
            read_document(&self.path)?.entries.remove(key)
        };
        match stored {
            Some(stored) => Ok(self
                .open_all([(key.to_string(), stored)])
                .await?
                .pop()
                .map(|(_, value)| value)),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(key))]
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let sealed = self.seal_all(&[(key.to_string(), value.to_string())]).await?;
        self.update(|entries| {
            entries.extend(sealed);
            true
        })
    }

    #[instrument(skip_all, fields(count = entries.len()))]
    async fn put_all(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        let sealed = self.seal_all(entries).await?;
        self.update(|stored| {
            stored.extend(sealed);
            true
        })?;
        debug!("batch persisted");
        Ok(())
    }

    #[instrument(skip_all, fields(key))]
    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| entries.remove(key).is_some())
    }

    #[instrument(skip_all)]
    async fn erase(&self) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_err(err)),
        }
    }

    #[instrument(skip_all)]
    async fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
        let document = {
            let _guard = self.lock()?;
            read_document(&self.path)?
        };
        self.open_all(document.entries).await
    }
}

fn seal_with(cipher: &Aes256Gcm, key: &str, value: &str) -> Result<StoredValue, StoreError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: value.as_bytes(),
                aad: key.as_bytes(),
            },
        )
        .map_err(|e| StoreError::Storage {
            reason: format!("encrypt failed: {e}"),
        })?;

    Ok(StoredValue::Sealed {
        nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
    })
}

fn open_with(cipher: &Aes256Gcm, key: &str, stored: StoredValue) -> Result<String, StoreError> {
    let StoredValue::Sealed { nonce, ciphertext } = stored else {
        return Err(StoreError::Storage {
            reason: "entry is not sealed".to_string(),
        });
    };

    let nonce_bytes = URL_SAFE_NO_PAD
        .decode(nonce)
        .map_err(|e| StoreError::Storage {
            reason: format!("nonce decode failed: {e}"),
        })?;
    if nonce_bytes.len() != 12 {
        return Err(StoreError::Storage {
            reason: format!("nonce has {} bytes, expected 12", nonce_bytes.len()),
        });
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = URL_SAFE_NO_PAD
        .decode(ciphertext)
        .map_err(|e| StoreError::Storage {
            reason: format!("ciphertext decode failed: {e}"),
        })?;

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: key.as_bytes(),
            },
        )
        .map_err(|e| StoreError::Storage {
            reason: format!("decrypt failed: {e}"),
        })?;

    String::from_utf8(plaintext).map_err(storage_err)
}

fn write_document(path: &Path, document: &PrefsDocument) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec_pretty(document).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_document(path: &Path) -> Result<PrefsDocument, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PrefsDocument::default()),
        Err(err) => return Err(storage_err(err)),
    };

    let document: PrefsDocument = serde_json::from_slice(&bytes).map_err(storage_err)?;
    if document.version != DOCUMENT_VERSION {
        return Err(StoreError::Storage {
            reason: format!("unsupported document version {}", document.version),
        });
    }
    Ok(document)
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, StoreError> {
    Aes256Gcm::new_from_slice(&material.bytes).map_err(|e| StoreError::Storage {
        reason: format!("cipher init failed: {e}"),
    })
}

fn file_name_for(name: &str) -> String {
    format!("{}.{FILE_EXTENSION}", URL_SAFE_NO_PAD.encode(name))
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Storage {
        reason: err.to_string(),
    }
}
