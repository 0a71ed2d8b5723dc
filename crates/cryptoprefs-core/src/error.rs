use thiserror::Error;

use crate::{codec::CodecError, store::StoreError};

/// Errors surfaced by [`crate::CryptoPrefs`].
#[derive(Debug, Error)]
pub enum PrefsError {
    /// The stored text under `key` does not fit the requested type.
    #[error("preference [{key}]: {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },
    /// Backend failure; never retried here.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A background apply task panicked or was cancelled.
    #[error("background apply failed: {reason}")]
    Background { reason: String },
}

impl PrefsError {
    /// The codec failure behind this error, if any.
    pub fn codec(&self) -> Option<&CodecError> {
        match self {
            PrefsError::Codec { source, .. } => Some(source),
            _ => None,
        }
    }
}
