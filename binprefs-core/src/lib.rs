//! binprefs Core - Data Model and Codec Boundary
//!
//! Pure data structures shared by every other crate: validated keys and
//! store names, decoded values, version stamps, change events, store
//! configuration and the error taxonomy. The codec boundary (serializer,
//! encryption transform and persistable registry) lives here as well since
//! both the storage path and the event path decode with it.

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod key;
pub mod value;
pub mod version;

pub use codec::{
    ByteEncryption, Codec, NoOpEncryption, Persistable, PersistableRegistry, BUILTIN_TOKENS,
};
pub use config::{ConflictPolicy, ShutdownPolicy, StoreConfig};
pub use error::{
    CodecError, ConfigError, ErrorKind, FileOp, PrefsError, PrefsResult, StorageError, TaskError,
};
pub use event::{ChangeKind, PrefEvent};
pub use key::{PrefKey, StoreName, KEY_FILE_EXTENSION, MAX_KEY_LEN, MAX_STORE_NAME_LEN};
pub use value::{CustomValue, PrefType, PrefValue};
pub use version::{Version, VersionClock};

/// Raw encoded bytes as stored in a key file.
pub type RawValue = Vec<u8>;

// ============================================================================
// ENTRY
// ============================================================================

/// A decoded value together with the version that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: PrefValue,
    pub version: Version,
}

impl Entry {
    pub fn new(value: PrefValue, version: Version) -> Self {
        Self { value, version }
    }

    /// An entry read from disk, whose producing version is unknown.
    pub fn loaded(value: PrefValue) -> Self {
        Self { value, version: 0 }
    }
}
