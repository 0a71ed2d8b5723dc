use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use cryptoprefs_core::CryptoPrefs;
use cryptoprefs_storage::{
    key_provider::{KeyProvider, KeyringProvider, StaticKeyProvider},
    EncryptedPrefsFile,
};
use dirs::data_dir;
use tracing::debug;

pub type CliStore = EncryptedPrefsFile<Box<dyn KeyProvider>>;

/// Resolve the default data directory.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("cryptoprefs"))
}

/// Build the preferences facade for `file_name`, honoring config overrides.
pub fn prefs_from_config(config: &Config, file_name: &str) -> Result<CryptoPrefs<CliStore>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, file_name, "opening preferences file");

    let keys: Box<dyn KeyProvider> = match &config.key {
        Some(encoded) => Box::new(
            StaticKeyProvider::from_base64(file_name, encoded)
                .map_err(|e| color_eyre::eyre::eyre!("config key: {e}"))?,
        ),
        None => Box::new(KeyringProvider::new(config.keyring_service(), file_name)),
    };

    let store = EncryptedPrefsFile::new(root, file_name, keys).with_encryption(config.encryption());
    Ok(CryptoPrefs::new(store))
}

/// Helper for tests to open a file under a temp dir with a fixed key.
#[cfg(test)]
pub fn test_prefs(root: impl Into<PathBuf>) -> CryptoPrefs<CliStore> {
    let config = Config {
        data_dir: Some(root.into()),
        key: Some(cryptoprefs_storage::key_provider::generate_encoded_key()),
        ..Config::default()
    };
    prefs_from_config(&config, "test").expect("test prefs")
}
