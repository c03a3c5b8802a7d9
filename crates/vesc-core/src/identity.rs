//! # Identity Newtypes
//!
//! Fixed-width identifiers used throughout the escrow engine. Each is a
//! distinct 32-byte type, so you cannot pass an [`AccountId`] where a
//! [`RequestId`] is expected.
//!
//! ## Text Form
//!
//! All three render as `0x` followed by 64 lowercase hex digits and parse
//! from 1–64 hex digits with an optional `0x` prefix. Short inputs are
//! left-padded with zeros, so `0xAA` and `0x00…00aa` name the same request.
//! Serde uses the text form, which also makes the ids usable as JSON map
//! keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Width in bytes of every identifier.
pub const ID_LEN: usize = 32;

/// Parse a hex identifier into a left-padded 32-byte array.
fn parse_hex_id(kind: &'static str, input: &str) -> Result<[u8; ID_LEN], ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidIdentifier {
        kind,
        value: input.to_string(),
        reason: reason.to_string(),
    };

    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    if digits.is_empty() {
        return Err(invalid("no hex digits"));
    }
    if digits.len() > ID_LEN * 2 {
        return Err(invalid("more than 64 hex digits"));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("non-hex character"));
    }

    // Left-pad to an even number of digits, then decode right-aligned.
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let mut out = [0u8; ID_LEN];
    let offset = ID_LEN - padded.len() / 2;
    for (i, chunk) in padded.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk).map_err(|_| invalid("non-hex character"))?;
        out[offset + i] = u8::from_str_radix(pair, 16).map_err(|_| invalid("non-hex character"))?;
    }
    Ok(out)
}

fn to_hex(bytes: &[u8; ID_LEN]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

macro_rules! fixed_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            /// Wrap raw bytes.
            pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            /// Access the raw bytes.
            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            /// Parse from hex text, left-padding short inputs with zeros.
            ///
            /// # Errors
            ///
            /// Returns [`ValidationError::InvalidIdentifier`] for empty,
            /// over-long, or non-hex input.
            pub fn parse(input: &str) -> Result<Self, ValidationError> {
                parse_hex_id($kind, input).map(Self)
            }

            /// Render as `0x` + 64 lowercase hex digits.
            pub fn to_hex(&self) -> String {
                format!("0x{}", to_hex(&self.0))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_id!(
    /// Opaque, globally unique identifier of one escrow entry.
    RequestId,
    "request id"
);

fixed_id!(
    /// Identity reference for a user, verifier, oracle, resolver, or the
    /// platform fee recipient.
    AccountId,
    "account id"
);

fixed_id!(
    /// Content reference to an opaque verification payload (SHA-256 of the
    /// payload bytes). The payload itself never enters the ledger.
    DataRef,
    "data ref"
);

impl AccountId {
    /// Derive a stable account id from a human label (SHA-256 of the label).
    ///
    /// Used by operator tooling and configuration files that name accounts
    /// instead of spelling out 64 hex digits.
    pub fn derive(label: &str) -> Self {
        Self(sha256(label.as_bytes()))
    }
}

impl DataRef {
    /// Reference a payload by its SHA-256 digest.
    pub fn of(payload: &[u8]) -> Self {
        Self(sha256(payload))
    }
}

fn sha256(data: &[u8]) -> [u8; ID_LEN] {
    let hash = Sha256::digest(data);
    let mut bytes = [0u8; ID_LEN];
    bytes.copy_from_slice(&hash);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hex_is_left_padded() {
        let id = RequestId::parse("0xAA").unwrap();
        let mut expected = [0u8; ID_LEN];
        expected[31] = 0xaa;
        assert_eq!(id.as_bytes(), &expected);
    }

    #[test]
    fn odd_length_hex_is_accepted() {
        let id = RequestId::parse("abc").unwrap();
        assert_eq!(id.as_bytes()[30], 0x0a);
        assert_eq!(id.as_bytes()[31], 0xbc);
    }

    #[test]
    fn prefix_is_optional() {
        assert_eq!(RequestId::parse("aa").unwrap(), RequestId::parse("0xaa").unwrap());
        assert_eq!(RequestId::parse("0XAA").unwrap(), RequestId::parse("0xaa").unwrap());
    }

    #[test]
    fn display_is_full_width_lowercase() {
        let id = RequestId::parse("0xAA").unwrap();
        let text = id.to_string();
        assert_eq!(text.len(), 66);
        assert!(text.starts_with("0x000000"));
        assert!(text.ends_with("aa"));
        assert_eq!(RequestId::parse(&text).unwrap(), id);
    }

    #[test]
    fn empty_rejected() {
        assert!(RequestId::parse("").is_err());
        assert!(RequestId::parse("0x").is_err());
    }

    #[test]
    fn too_long_rejected() {
        let long = "1".repeat(65);
        assert!(AccountId::parse(&long).is_err());
    }

    #[test]
    fn non_hex_rejected() {
        let err = AccountId::parse("0xzz").unwrap_err();
        assert!(format!("{err}").contains("account id"));
    }

    #[test]
    fn derive_is_stable_and_distinct() {
        assert_eq!(AccountId::derive("alice"), AccountId::derive("alice"));
        assert_ne!(AccountId::derive("alice"), AccountId::derive("bob"));
    }

    #[test]
    fn data_ref_hashes_payload() {
        assert_eq!(DataRef::of(b"data"), DataRef::of(b"data"));
        assert_ne!(DataRef::of(b"data"), DataRef::of(b"other"));
    }

    #[test]
    fn serde_uses_hex_text() {
        let id = AccountId::derive("verifier");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_work_as_json_map_keys() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(RequestId::parse("0x01").unwrap(), 7u64);
        let json = serde_json::to_string(&map).unwrap();
        let back: std::collections::BTreeMap<RequestId, u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    proptest::proptest! {
        #[test]
        fn short_hex_is_left_padded_prop(digits in "[0-9a-fA-F]{1,64}") {
            let id = RequestId::parse(&digits).unwrap();
            let text = id.to_hex();
            proptest::prop_assert!(text.ends_with(&digits.to_ascii_lowercase()));
            proptest::prop_assert_eq!(RequestId::parse(&text).unwrap(), id);
        }
    }
}
