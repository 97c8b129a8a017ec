//! Decoded preference values.

use crate::codec::Persistable;
use crate::CodecError;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A decoded preference value.
#[derive(Debug, Clone, PartialEq)]
pub enum PrefValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    String(String),
    StringSet(BTreeSet<String>),
    Bytes(Vec<u8>),
    Custom(CustomValue),
}

impl PrefValue {
    /// Type token identifying the codec for this value.
    pub fn token(&self) -> &str {
        match self {
            PrefValue::Bool(_) => "bool",
            PrefValue::Byte(_) => "byte",
            PrefValue::Short(_) => "short",
            PrefValue::Int(_) => "int",
            PrefValue::Long(_) => "long",
            PrefValue::Float(_) => "float",
            PrefValue::Double(_) => "double",
            PrefValue::Char(_) => "char",
            PrefValue::String(_) => "string",
            PrefValue::StringSet(_) => "stringset",
            PrefValue::Bytes(_) => "bytes",
            PrefValue::Custom(custom) => custom.token(),
        }
    }

    pub fn as_custom(&self) -> Option<&CustomValue> {
        match self {
            PrefValue::Custom(custom) => Some(custom),
            _ => None,
        }
    }
}

/// A registered structured type together with its serialized payload.
///
/// The decoded object is kept type-erased so reads can hand out the concrete
/// type without decoding twice; equality is defined on token and payload.
#[derive(Clone)]
pub struct CustomValue {
    token: String,
    payload: Vec<u8>,
    object: Arc<dyn Any + Send + Sync>,
}

impl CustomValue {
    /// Wrap a persistable object, serializing it eagerly.
    pub fn new<T: Persistable>(value: T) -> Result<Self, CodecError> {
        let payload = serde_json::to_vec(&value).map_err(|e| CodecError::Serialization {
            token: T::TOKEN.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            token: T::TOKEN.to_string(),
            payload,
            object: Arc::new(value),
        })
    }

    /// Assemble from parts produced by a registered decoder.
    pub(crate) fn from_parts(
        token: String,
        payload: Vec<u8>,
        object: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            token,
            payload,
            object,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn downcast_ref<T: Persistable>(&self) -> Option<&T> {
        if self.token != T::TOKEN {
            return None;
        }
        self.object.downcast_ref::<T>()
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token && self.payload == other.payload
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValue")
            .field("token", &self.token)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

// ============================================================================
// TYPED ACCESS
// ============================================================================

/// Plain Rust types that map one-to-one onto a built-in [`PrefValue`] variant.
pub trait PrefType: Sized {
    /// Token of the variant this type maps to.
    const TOKEN: &'static str;

    fn into_value(self) -> PrefValue;

    fn from_value(value: &PrefValue) -> Option<Self>;
}

macro_rules! pref_type {
    ($ty:ty, $variant:ident, $token:literal) => {
        impl PrefType for $ty {
            const TOKEN: &'static str = $token;

            fn into_value(self) -> PrefValue {
                PrefValue::$variant(self)
            }

            fn from_value(value: &PrefValue) -> Option<Self> {
                match value {
                    PrefValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for PrefValue {
            fn from(value: $ty) -> Self {
                PrefValue::$variant(value)
            }
        }
    };
}

pref_type!(bool, Bool, "bool");
pref_type!(i8, Byte, "byte");
pref_type!(i16, Short, "short");
pref_type!(i32, Int, "int");
pref_type!(i64, Long, "long");
pref_type!(f32, Float, "float");
pref_type!(f64, Double, "double");
pref_type!(char, Char, "char");
pref_type!(String, String, "string");
pref_type!(BTreeSet<String>, StringSet, "stringset");
pref_type!(Vec<u8>, Bytes, "bytes");

impl From<&str> for PrefValue {
    fn from(value: &str) -> Self {
        PrefValue::String(value.to_string())
    }
}

impl From<CustomValue> for PrefValue {
    fn from(value: CustomValue) -> Self {
        PrefValue::Custom(value)
    }
}
