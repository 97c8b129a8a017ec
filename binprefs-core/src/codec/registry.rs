//! Registration table for caller-defined structured types.

use crate::codec::serializer::is_builtin_token;
use crate::{CodecError, CustomValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Maximum token length; the token length is framed in a single byte.
pub const MAX_TOKEN_LEN: usize = u8::MAX as usize;

/// A structured type that can be stored under a string token.
///
/// The payload is the type's JSON form, so adding optional fields keeps old
/// files readable.
pub trait Persistable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Token embedded in the encoded form. Must be unique within a registry
    /// and must not collide with a built-in token.
    const TOKEN: &'static str;
}

trait PersistableDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Arc<dyn Any + Send + Sync>, CodecError>;
}

struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T: Persistable> PersistableDecoder for JsonDecoder<T> {
    fn decode(&self, payload: &[u8]) -> Result<Arc<dyn Any + Send + Sync>, CodecError> {
        let value: T = serde_json::from_slice(payload).map_err(|e| CodecError::Corrupted {
            token: T::TOKEN.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(value))
    }
}

/// Token -> decoder table consulted when decoding custom values.
#[derive(Clone, Default)]
pub struct PersistableRegistry {
    decoders: HashMap<String, Arc<dyn PersistableDecoder>>,
}

impl PersistableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `T::TOKEN`.
    pub fn register<T: Persistable>(&mut self) -> Result<(), CodecError> {
        let token = T::TOKEN;
        if token.is_empty() || token.len() > MAX_TOKEN_LEN || is_builtin_token(token) {
            return Err(CodecError::TokenConflict {
                token: token.to_string(),
            });
        }
        if self.decoders.contains_key(token) {
            return Err(CodecError::TokenConflict {
                token: token.to_string(),
            });
        }
        self.decoders
            .insert(token.to_string(), Arc::new(JsonDecoder::<T>(PhantomData)));
        Ok(())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.decoders.contains_key(token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }

    /// Decode a custom payload by dispatching on its token.
    pub fn decode(&self, token: &str, payload: &[u8]) -> Result<CustomValue, CodecError> {
        let decoder = self
            .decoders
            .get(token)
            .ok_or_else(|| CodecError::UnknownToken {
                token: token.to_string(),
            })?;
        let object = decoder.decode(payload)?;
        Ok(CustomValue::from_parts(
            token.to_string(),
            payload.to_vec(),
            object,
        ))
    }
}

impl fmt::Debug for PersistableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<&str> = self.tokens().collect();
        tokens.sort_unstable();
        f.debug_struct("PersistableRegistry")
            .field("tokens", &tokens)
            .finish()
    }
}
