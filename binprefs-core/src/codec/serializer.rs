//! Payload serialization for built-in value types.
//!
//! Fixed-width numbers are big-endian. Strings are UTF-8. A string set is a
//! `u32` count followed by `u32` length-prefixed strings. Byte arrays are
//! stored raw.

use super::registry::PersistableRegistry;
use crate::{CodecError, PrefValue};
use std::collections::BTreeSet;

/// Tokens reserved for built-in types.
pub const BUILTIN_TOKENS: [&str; 11] = [
    "bool",
    "byte",
    "short",
    "int",
    "long",
    "float",
    "double",
    "char",
    "string",
    "stringset",
    "bytes",
];

pub fn is_builtin_token(token: &str) -> bool {
    BUILTIN_TOKENS.contains(&token)
}

/// Serialize a value's payload (without token framing).
pub fn serialize_payload(value: &PrefValue) -> Vec<u8> {
    match value {
        PrefValue::Bool(v) => vec![u8::from(*v)],
        PrefValue::Byte(v) => v.to_be_bytes().to_vec(),
        PrefValue::Short(v) => v.to_be_bytes().to_vec(),
        PrefValue::Int(v) => v.to_be_bytes().to_vec(),
        PrefValue::Long(v) => v.to_be_bytes().to_vec(),
        PrefValue::Float(v) => v.to_bits().to_be_bytes().to_vec(),
        PrefValue::Double(v) => v.to_bits().to_be_bytes().to_vec(),
        PrefValue::Char(v) => u32::from(*v).to_be_bytes().to_vec(),
        PrefValue::String(v) => v.as_bytes().to_vec(),
        PrefValue::StringSet(set) => {
            let mut out = Vec::with_capacity(4 + set.iter().map(|s| 4 + s.len()).sum::<usize>());
            out.extend_from_slice(&(set.len() as u32).to_be_bytes());
            for item in set {
                out.extend_from_slice(&(item.len() as u32).to_be_bytes());
                out.extend_from_slice(item.as_bytes());
            }
            out
        }
        PrefValue::Bytes(v) => v.clone(),
        PrefValue::Custom(custom) => custom.payload().to_vec(),
    }
}

/// Deserialize a payload according to its token.
pub fn deserialize_payload(
    token: &str,
    payload: &[u8],
    registry: &PersistableRegistry,
) -> Result<PrefValue, CodecError> {
    let value = match token {
        "bool" => match fixed::<1>(token, payload)? {
            [0] => PrefValue::Bool(false),
            [1] => PrefValue::Bool(true),
            [other] => {
                return Err(corrupted(token, format!("invalid boolean byte {other}")));
            }
        },
        "byte" => PrefValue::Byte(i8::from_be_bytes(fixed(token, payload)?)),
        "short" => PrefValue::Short(i16::from_be_bytes(fixed(token, payload)?)),
        "int" => PrefValue::Int(i32::from_be_bytes(fixed(token, payload)?)),
        "long" => PrefValue::Long(i64::from_be_bytes(fixed(token, payload)?)),
        "float" => PrefValue::Float(f32::from_bits(u32::from_be_bytes(fixed(token, payload)?))),
        "double" => PrefValue::Double(f64::from_bits(u64::from_be_bytes(fixed(token, payload)?))),
        "char" => {
            let code = u32::from_be_bytes(fixed(token, payload)?);
            let c = char::from_u32(code)
                .ok_or_else(|| corrupted(token, format!("invalid code point {code:#x}")))?;
            PrefValue::Char(c)
        }
        "string" => PrefValue::String(utf8(token, payload)?),
        "stringset" => PrefValue::StringSet(string_set(token, payload)?),
        "bytes" => PrefValue::Bytes(payload.to_vec()),
        custom => PrefValue::Custom(registry.decode(custom, payload)?),
    };
    Ok(value)
}

fn fixed<const N: usize>(token: &str, payload: &[u8]) -> Result<[u8; N], CodecError> {
    payload
        .try_into()
        .map_err(|_| corrupted(token, format!("expected {N} bytes, found {}", payload.len())))
}

fn utf8(token: &str, bytes: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| corrupted(token, e.to_string()))
}

fn string_set(token: &str, payload: &[u8]) -> Result<BTreeSet<String>, CodecError> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_u32()?;
    let mut set = BTreeSet::new();
    for _ in 0..count {
        let len = cursor.read_u32()? as usize;
        let bytes = cursor.take(len)?;
        set.insert(utf8(token, bytes)?);
    }
    if !cursor.is_empty() {
        return Err(corrupted(token, "trailing bytes after string set".to_string()));
    }
    Ok(set)
}

fn corrupted(token: &str, reason: String) -> CodecError {
    CodecError::Corrupted {
        token: token.to_string(),
        reason,
    }
}

/// Bounds-checked reader over an encoded buffer.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.bytes.len() - self.pos;
        if len > remaining {
            return Err(CodecError::Truncated {
                needed: len,
                found: remaining,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
