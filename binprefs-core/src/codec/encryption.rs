//! Byte-level encryption transform applied around serialized payloads.

use crate::CodecError;
use std::fmt;

/// Symmetric transform applied to every serialized payload.
///
/// `decrypt(encrypt(b)) == b` must hold for every input. Implementations
/// report undecryptable input as [`CodecError::Encryption`].
pub trait ByteEncryption: Send + Sync + fmt::Debug {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Identity transform; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEncryption;

impl ByteEncryption for NoOpEncryption {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(plain.to_vec())
    }

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(cipher.to_vec())
    }
}
