//! Change events broadcast to other processes after a commit.

use crate::{CodecError, PrefKey, StoreName, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Updated,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Updated => f.write_str("updated"),
            ChangeKind::Removed => f.write_str("removed"),
        }
    }
}

/// A committed change to one key.
///
/// `value` carries the encoded (encrypted) bytes for `Updated` and is `None`
/// for `Removed`. `origin` identifies the publishing store instance so it can
/// skip its own events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefEvent {
    pub store: StoreName,
    pub key: PrefKey,
    pub kind: ChangeKind,
    #[serde(with = "hex_bytes", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    pub version: Version,
    pub origin: Uuid,
}

impl PrefEvent {
    pub fn updated(store: StoreName, key: PrefKey, value: Vec<u8>, version: Version, origin: Uuid) -> Self {
        Self {
            store,
            key,
            kind: ChangeKind::Updated,
            value: Some(value),
            version,
            origin,
        }
    }

    pub fn removed(store: StoreName, key: PrefKey, version: Version, origin: Uuid) -> Self {
        Self {
            store,
            key,
            kind: ChangeKind::Removed,
            value: None,
            version,
            origin,
        }
    }

    /// Opaque payload handed to the notification transport.
    pub fn to_payload(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Serialization {
            token: "event".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, CodecError> {
        let event: PrefEvent =
            serde_json::from_slice(payload).map_err(|e| CodecError::Corrupted {
                token: "event".to_string(),
                reason: e.to_string(),
            })?;
        match (event.kind, &event.value) {
            (ChangeKind::Updated, None) => Err(CodecError::Corrupted {
                token: "event".to_string(),
                reason: "updated event without a value".to_string(),
            }),
            _ => Ok(event),
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
