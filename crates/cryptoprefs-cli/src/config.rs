use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use cryptoprefs_core::ScalarKind;
use cryptoprefs_storage::Encryption;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FILE_NAME: &str = "prefs";

/// User-level configuration loaded from `~/.config/cryptoprefs/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the directory holding preference files.
    pub data_dir: Option<PathBuf>,
    /// Preferences file used when `--file` is not given.
    pub file_name: Option<String>,
    /// `enabled` (default) or `disabled` for plaintext values.
    pub encryption: Option<Encryption>,
    /// Kind assumed when `--kind` is omitted; text by default.
    pub default_kind: Option<ScalarKind>,
    /// Base64 data key; when absent the OS keyring holds one per file.
    pub key: Option<String>,
    /// Keyring service name override.
    pub keyring_service: Option<String>,
}

impl Config {
    pub fn file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or(DEFAULT_FILE_NAME)
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption.unwrap_or_default()
    }

    pub fn default_kind(&self) -> ScalarKind {
        self.default_kind.unwrap_or(ScalarKind::Text)
    }

    pub fn keyring_service(&self) -> &str {
        self.keyring_service.as_deref().unwrap_or("cryptoprefs")
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("cryptoprefs").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_if_missing(config, &default_path()?)
}

/// Existing files are left alone to avoid clobbering user edits.
pub fn write_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
