//! Codec boundary: typed values to stored bytes and back.
//!
//! # Encoded Layout
//!
//! ```text
//! +-----------+------------------+------------------------------+
//! | token len | token (UTF-8)    | encrypt(serialized payload)  |
//! | u8        | token len bytes  | remaining bytes              |
//! +-----------+------------------+------------------------------+
//! ```
//!
//! The token is never encrypted so [`Codec::decode`] can dispatch without
//! external type hints. Built-in tokens are listed in
//! [`serializer::BUILTIN_TOKENS`]; everything else is looked up in the
//! [`PersistableRegistry`].

pub mod encryption;
pub mod registry;
pub mod serializer;

pub use encryption::{ByteEncryption, NoOpEncryption};
pub use registry::{Persistable, PersistableRegistry, MAX_TOKEN_LEN};
pub use serializer::{is_builtin_token, BUILTIN_TOKENS};

use crate::{CodecError, PrefValue};
use serializer::Cursor;
use std::sync::Arc;

/// Paired serialize+encrypt / decrypt+deserialize transform.
#[derive(Debug, Clone)]
pub struct Codec {
    registry: Arc<PersistableRegistry>,
    encryption: Arc<dyn ByteEncryption>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(PersistableRegistry::new(), Arc::new(NoOpEncryption))
    }
}

impl Codec {
    pub fn new(registry: PersistableRegistry, encryption: Arc<dyn ByteEncryption>) -> Self {
        Self {
            registry: Arc::new(registry),
            encryption,
        }
    }

    pub fn registry(&self) -> &PersistableRegistry {
        &self.registry
    }

    /// `encrypt(serialize(value))`, framed with the value's token.
    pub fn encode(&self, value: &PrefValue) -> Result<Vec<u8>, CodecError> {
        let token = value.token();
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(CodecError::Serialization {
                token: token.to_string(),
                reason: format!("token length must be 1..={MAX_TOKEN_LEN}"),
            });
        }
        if let PrefValue::Custom(_) = value {
            if !self.registry.contains(token) {
                return Err(CodecError::UnknownToken {
                    token: token.to_string(),
                });
            }
        }

        let payload = serializer::serialize_payload(value);
        let cipher = self.encryption.encrypt(&payload)?;

        let mut out = Vec::with_capacity(1 + token.len() + cipher.len());
        out.push(token.len() as u8);
        out.extend_from_slice(token.as_bytes());
        out.extend_from_slice(&cipher);
        Ok(out)
    }

    /// `deserialize(decrypt(bytes))`, dispatching on the embedded token.
    pub fn decode(&self, bytes: &[u8]) -> Result<PrefValue, CodecError> {
        let token = Self::peek_token(bytes)?;
        let mut cursor = Cursor::new(bytes);
        cursor.take(1 + token.len())?;
        let plain = self.encryption.decrypt(cursor.rest())?;
        serializer::deserialize_payload(token, &plain, &self.registry)
    }

    /// Read the type token without decrypting the payload.
    pub fn peek_token(bytes: &[u8]) -> Result<&str, CodecError> {
        let mut cursor = Cursor::new(bytes);
        let len = cursor.read_u8()? as usize;
        if len == 0 {
            return Err(CodecError::Corrupted {
                token: String::new(),
                reason: "empty type token".to_string(),
            });
        }
        let raw = cursor.take(len)?;
        std::str::from_utf8(raw).map_err(|e| CodecError::Corrupted {
            token: String::from_utf8_lossy(raw).into_owned(),
            reason: e.to_string(),
        })
    }
}
