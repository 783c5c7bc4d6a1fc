//! Serde helpers for `u128` balances.
//!
//! Balances are written as decimal strings so they survive serde's
//! buffered (tagged / untagged) enum decoding, which has no 128-bit
//! integer support. Plain JSON numbers and `0x` hex strings are accepted
//! on input, matching what nodes emit.

use std::fmt;

use serde::{Deserializer, Serializer, de};

/// Use as `#[serde(with = "crate::amount")]`.
pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// See [`serialize`].
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    deserializer.deserialize_any(AmountVisitor)
}

struct AmountVisitor;

impl de::Visitor<'_> for AmountVisitor {
    type Value = u128;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer, decimal string or 0x hex string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
        Ok(u128::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
        u128::try_from(v).map_err(|_| E::custom(format!("negative amount {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
        let parsed = match v.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16),
            None => v.parse::<u128>(),
        };
        parsed.map_err(|e| E::custom(format!("invalid amount {v:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "crate::amount")]
        value: u128,
    }

    #[test]
    fn writes_decimal_string() {
        let w = Wrapper {
            value: 1_000_000_000_000_000_000_000,
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"value":"1000000000000000000000"}"#);
        assert_eq!(serde_json::from_str::<Wrapper>(&json).unwrap(), w);
    }

    #[test]
    fn accepts_number_and_hex() {
        let a: Wrapper = serde_json::from_str(r#"{"value":100}"#).unwrap();
        let b: Wrapper = serde_json::from_str(r#"{"value":"0x64"}"#).unwrap();
        assert_eq!(a.value, 100);
        assert_eq!(b.value, 100);
        assert!(serde_json::from_str::<Wrapper>(r#"{"value":-1}"#).is_err());
    }
}
