//! Core of the encrypted preference store: scalar codec, pending-write queue, the typed
//! facade and the storage contract backends implement.
//! Concrete encryption lives in `cryptoprefs-storage`; this crate never sees ciphertext.

pub mod bundle;
pub mod codec;
pub mod error;
pub mod prefs;
pub mod queue;
pub mod store;

pub use bundle::PrefsBundle;
pub use codec::{CodecError, Preference, Scalar, ScalarKind};
pub use error::PrefsError;
pub use prefs::{ApplyHandle, CryptoPrefs};
pub use queue::{PendingWrite, PendingWrites};
pub use store::{InMemoryPrefsStore, PrefsStore, StoreError};
