//! Validated key and store-name types.
//!
//! A [`PrefKey`] maps deterministically and collision-free onto a file name
//! inside the store directory. A [`StoreName`] is safe to use as a single
//! path component and as a thread name suffix.

use crate::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum key length in bytes. Hex encoding doubles it, which keeps file
/// names under the common 255-byte limit.
pub const MAX_KEY_LEN: usize = 120;

/// Maximum store name length in bytes.
pub const MAX_STORE_NAME_LEN: usize = 64;

/// Extension of committed key files.
pub const KEY_FILE_EXTENSION: &str = "pref";

/// Key of one preference entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrefKey(String);

impl PrefKey {
    pub fn new(key: impl Into<String>) -> Result<Self, StorageError> {
        let key = key.into();
        if key.is_empty() {
            return Err(StorageError::InvalidKey {
                key,
                reason: "key must not be empty".to_string(),
            });
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StorageError::InvalidKey {
                reason: format!("key is {} bytes, limit is {}", key.len(), MAX_KEY_LEN),
                key,
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name holding this key's committed bytes.
    pub fn file_name(&self) -> String {
        format!("{}.{}", hex::encode(self.0.as_bytes()), KEY_FILE_EXTENSION)
    }

    /// Inverse of [`PrefKey::file_name`]. Returns `None` for anything that is
    /// not a committed key file (lock file, temp files, foreign files).
    ///
    /// Only the canonical lowercase spelling is accepted, so each key maps
    /// to exactly one file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(KEY_FILE_EXTENSION)?.strip_suffix('.')?;
        if stem.is_empty() || stem.starts_with('.') {
            return None;
        }
        let bytes = hex::decode(stem).ok()?;
        if hex::encode(&bytes) != stem {
            return None;
        }
        let key = String::from_utf8(bytes).ok()?;
        Self::new(key).ok()
    }
}

impl fmt::Display for PrefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PrefKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PrefKey {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for PrefKey {
    type Error = StorageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PrefKey> for String {
    fn from(key: PrefKey) -> Self {
        key.0
    }
}

impl FromStr for PrefKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Name of a store; one lock namespace and one background worker each.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreName(String);

impl StoreName {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Result<Self, StorageError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name must not be empty".to_string())
        } else if name.len() > MAX_STORE_NAME_LEN {
            Some(format!(
                "name is {} bytes, limit is {}",
                name.len(),
                MAX_STORE_NAME_LEN
            ))
        } else if name == "." || name == ".." {
            Some("name must not be a relative path component".to_string())
        } else if name.contains(['/', '\\', '\0']) {
            Some("name must not contain path separators".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StorageError::InvalidStoreName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoreName {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StoreName {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StoreName> for String {
    fn from(name: StoreName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_roundtrip() {
        let key = PrefKey::new("user/theme color").unwrap();
        let name = key.file_name();
        assert!(name.ends_with(".pref"));
        assert!(!name.contains('/'));
        assert_eq!(PrefKey::from_file_name(&name), Some(key));
    }

    #[test]
    fn test_file_name_ignores_foreign_files() {
        assert_eq!(PrefKey::from_file_name(".binprefs.lock"), None);
        assert_eq!(PrefKey::from_file_name(".6162.pref.0192.tmp"), None);
        assert_eq!(PrefKey::from_file_name("zz.pref"), None);
        assert_eq!(PrefKey::from_file_name("notes.txt"), None);
        assert_eq!(PrefKey::from_file_name(".pref"), None);
    }

    #[test]
    fn test_file_name_rejects_uppercase_hex() {
        assert_eq!(PrefKey::from_file_name("4A.pref"), None);
        assert_eq!(PrefKey::from_file_name("4a.pref"), Some(PrefKey::new("J").unwrap()));
    }

    #[test]
    fn test_key_limits() {
        assert!(PrefKey::new("").is_err());
        assert!(PrefKey::new("k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(PrefKey::new("k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_distinct_keys_distinct_files() {
        let a = PrefKey::new("ab").unwrap();
        let b = PrefKey::new("a b").unwrap();
        assert_ne!(a.file_name(), b.file_name());
    }

    #[test]
    fn test_store_name_validation() {
        assert!(StoreName::new("settings").is_ok());
        assert!(StoreName::new("").is_err());
        assert!(StoreName::new("..").is_err());
        assert!(StoreName::new("a/b").is_err());
        assert!(StoreName::new("a\\b").is_err());
        assert!(StoreName::new("x".repeat(MAX_STORE_NAME_LEN + 1)).is_err());
        assert_eq!(StoreName::default().as_str(), "default");
    }
}
