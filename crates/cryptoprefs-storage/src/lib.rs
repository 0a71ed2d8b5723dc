//! Concrete preference storage with encryption at rest.
//! Uses AES-GCM with keys sourced from the OS keyring (or test doubles).

pub mod key_provider;
pub mod prefs_file;

pub use prefs_file::{EncryptedPrefsFile, Encryption};
