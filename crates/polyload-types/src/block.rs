//! Block headers and bodies as returned by `chain_getBlock`.

use parity_scale_codec::{Compact, Decode};
use serde::{Deserialize, Serialize};

use crate::{BlockHash, ExtrinsicHash, extrinsic};

/// A block header. Only the fields polyload reads are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub parent_hash: BlockHash,
    #[serde(with = "hex_number")]
    pub number: u64,
    #[serde(default = "zero_hash")]
    pub state_root: BlockHash,
    #[serde(default = "zero_hash")]
    pub extrinsics_root: BlockHash,
}

fn zero_hash() -> BlockHash {
    BlockHash([0; 32])
}

/// A block body: header plus hex-encoded extrinsics in block order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub extrinsics: Vec<String>,
}

impl Block {
    #[must_use]
    pub fn number(&self) -> u64 {
        self.header.number
    }

    #[must_use]
    pub fn extrinsic_count(&self) -> usize {
        self.extrinsics.len()
    }

    /// Milliseconds timestamp from the `timestamp.set` inherent, if present.
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        self.extrinsics.iter().find_map(|xt| extrinsic::timestamp_of(xt))
    }

    /// Extrinsics whose version byte has the signed bit set. Works on any
    /// v4 encoding, including calls this crate cannot decode.
    #[must_use]
    pub fn signed_extrinsic_count(&self) -> usize {
        self.extrinsics
            .iter()
            .filter(|xt| is_signed_encoding(xt))
            .count()
    }

    /// Index of the extrinsic with `hash` within this block.
    #[must_use]
    pub fn position_of(&self, hash: &ExtrinsicHash) -> Option<u32> {
        self.extrinsics
            .iter()
            .position(|xt| {
                hex::decode(xt.strip_prefix("0x").unwrap_or(xt))
                    .is_ok_and(|bytes| extrinsic::hash_encoded(&bytes) == *hash)
            })
            .and_then(|i| u32::try_from(i).ok())
    }
}

fn is_signed_encoding(hex_xt: &str) -> bool {
    let Ok(bytes) = hex::decode(hex_xt.strip_prefix("0x").unwrap_or(hex_xt)) else {
        return false;
    };
    let mut input = &bytes[..];
    if Compact::<u32>::decode(&mut input).is_err() {
        return false;
    }
    input.first().is_some_and(|version| version & 0x80 != 0)
}

/// `chain_getBlock` response wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
}

/// Block numbers travel as `0x`-prefixed hex strings.
mod hex_number {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(n: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{n:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u64),
            Str(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(n),
            Repr::Str(s) => {
                let digits = s.strip_prefix("0x").unwrap_or(&s);
                u64::from_str_radix(digits, 16).map_err(de::Error::custom)
            }
        }
    }
}
