use std::collections::BTreeMap;

use crate::codec::{CodecError, Preference, Scalar, ScalarKind};

/// Detached copy of every entry in a store, taken in a single pass.
///
/// Later writes to the store are not reflected; take a new bundle to observe them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefsBundle {
    entries: BTreeMap<String, String>,
}

impl PrefsBundle {
    pub(crate) fn from_entries(entries: Vec<(String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Typed read of `key`; `None` when the key was absent at snapshot time.
    pub fn get<T: Preference>(&self, key: &str) -> Option<Result<T, CodecError>> {
        self.entries.get(key).map(|text| T::decode(text))
    }

    pub fn get_scalar(&self, key: &str, kind: ScalarKind) -> Option<Result<Scalar, CodecError>> {
        self.entries.get(key).map(|text| Scalar::decode(text, kind))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.entries
    }
}
