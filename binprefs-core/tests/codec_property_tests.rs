//! Property-Based Tests for the Codec Boundary
//!
//! **Property: decode(encode(v)) == v for every built-in value**, and
//! **decoding arbitrary or truncated bytes never panics** - it either yields
//! a value or a decode failure.

use binprefs_core::{ByteEncryption, Codec, CodecError, PersistableRegistry, PrefValue};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug)]
struct XorEncryption(u8);

impl ByteEncryption for XorEncryption {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(plain.iter().map(|b| b ^ self.0).collect())
    }

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.encrypt(cipher)
    }
}

fn value_strategy() -> impl Strategy<Value = PrefValue> {
    prop_oneof![
        any::<bool>().prop_map(PrefValue::Bool),
        any::<i8>().prop_map(PrefValue::Byte),
        any::<i16>().prop_map(PrefValue::Short),
        any::<i32>().prop_map(PrefValue::Int),
        any::<i64>().prop_map(PrefValue::Long),
        any::<char>().prop_map(PrefValue::Char),
        (-1.0e6f64..1.0e6).prop_map(PrefValue::Double),
        (-1.0e6f32..1.0e6).prop_map(PrefValue::Float),
        ".{0,40}".prop_map(PrefValue::String),
        prop::collection::btree_set(".{0,8}", 0..6)
            .prop_map(|s: BTreeSet<String>| PrefValue::StringSet(s)),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(PrefValue::Bytes),
    ]
}

proptest! {
    #[test]
    fn prop_roundtrip_under_any_encryption(value in value_strategy(), key in any::<u8>()) {
        let codec = Codec::new(PersistableRegistry::new(), Arc::new(XorEncryption(key)));
        let bytes = codec.encode(&value).unwrap();
        prop_assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn prop_token_is_readable_without_decrypting(value in value_strategy(), key in 1u8..) {
        let codec = Codec::new(PersistableRegistry::new(), Arc::new(XorEncryption(key)));
        let bytes = codec.encode(&value).unwrap();
        prop_assert_eq!(Codec::peek_token(&bytes).unwrap(), value.token());
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let codec = Codec::default();
        let _ = codec.decode(&bytes);
    }

    #[test]
    fn prop_truncation_is_detected_for_fixed_width(value in any::<i64>(), cut in 1usize..8) {
        let codec = Codec::default();
        let mut bytes = codec.encode(&PrefValue::Long(value)).unwrap();
        let new_len = bytes.len() - cut;
        bytes.truncate(new_len);
        let result = codec.decode(&bytes);
        prop_assert!(result.is_err());
    }
}
