//! Identifiers used throughout polyload.
//!
//! Chain-side identifiers (accounts, identities, hashes) are fixed-size byte
//! arrays rendered as `0x`-prefixed hex on the wire. Counters assigned by the
//! chain (venues, instructions) are plain `u64` newtypes. Only [`TxId`] is
//! local: a UUIDv7 used to correlate log lines for one submission.

use std::{fmt, str::FromStr};

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use uuid::Uuid;

use crate::{PolyloadError, constants::TICKER_LEN};

/// Parse `0x`-prefixed (or bare) hex into a fixed-size array.
pub fn parse_hex_array<const N: usize>(s: &str) -> crate::Result<[u8; N]> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let mut out = [0u8; N];
    hex::decode_to_slice(stripped, &mut out)
        .map_err(|e| PolyloadError::Serialization(format!("invalid {N}-byte hex '{s}': {e}")))?;
    Ok(out)
}

/// Declares a 32-byte identifier with hex display and hex-string serde.
macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Encode, Decode)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            #[must_use]
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// First four bytes in hex, for compact log fields.
            #[must_use]
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }

            #[must_use]
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), hex::encode(&self.0[..8]))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = PolyloadError;

            fn from_str(s: &str) -> crate::Result<Self> {
                parse_hex_array::<32>(s).map(Self)
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
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

hex_id!(
    /// Public-key-derived account address (the raw ed25519 public key).
    AccountId,
    "acct"
);

hex_id!(
    /// On-chain decentralised identifier (DID). Opaque to this crate.
    IdentityId,
    "did"
);

hex_id!(
    /// Hash of a block header.
    BlockHash,
    "block"
);

hex_id!(
    /// Hash of an encoded extrinsic.
    ExtrinsicHash,
    "xt"
);

// ---------------------------------------------------------------------------
// Portfolios
// ---------------------------------------------------------------------------

/// Which bucket of an identity's balances a portfolio refers to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Encode, Decode,
)]
pub enum PortfolioKind {
    /// The identity's default portfolio.
    Default,
    /// A numbered user-created portfolio.
    User(u64),
}

/// A named bucket of asset balances belonging to an identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Encode, Decode,
)]
pub struct PortfolioId {
    pub did: IdentityId,
    pub kind: PortfolioKind,
}

impl PortfolioId {
    /// The default portfolio of `did`.
    #[must_use]
    pub fn default_of(did: IdentityId) -> Self {
        Self {
            did,
            kind: PortfolioKind::Default,
        }
    }

    /// User portfolio number `n` of `did`.
    #[must_use]
    pub fn user(did: IdentityId, n: u64) -> Self {
        Self {
            did,
            kind: PortfolioKind::User(n),
        }
    }
}

impl fmt::Display for PortfolioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PortfolioKind::Default => write!(f, "{}/default", self.did),
            PortfolioKind::User(n) => write!(f, "{}/user:{n}", self.did),
        }
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Asset symbol: up to 12 upper-case bytes, NUL padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Encode, Decode)]
pub struct Ticker(pub [u8; TICKER_LEN]);

impl Ticker {
    /// Build a ticker from a symbol, upper-casing it and padding with NULs.
    ///
    /// # Errors
    /// Returns `InvalidTicker` if the symbol is empty, too long or not ASCII.
    pub fn new(symbol: &str) -> crate::Result<Self> {
        if symbol.is_empty() || symbol.len() > TICKER_LEN || !symbol.is_ascii() {
            return Err(PolyloadError::InvalidTicker(symbol.to_string()));
        }
        let mut bytes = [0u8; TICKER_LEN];
        for (slot, b) in bytes.iter_mut().zip(symbol.to_ascii_uppercase().bytes()) {
            *slot = b;
        }
        Ok(Self(bytes))
    }

    /// The symbol without trailing NUL padding.
    #[must_use]
    pub fn symbol(&self) -> String {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(TICKER_LEN);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol())
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticker({})", self.symbol())
    }
}

impl FromStr for Ticker {
    type Err = PolyloadError;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl Serialize for Ticker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.symbol())
    }
}

impl<'de> Deserialize<'de> for Ticker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(s.trim_end_matches('\0')).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Chain-assigned counters
// ---------------------------------------------------------------------------

/// Identifier of a settlement venue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Encode, Decode,
)]
pub struct VenueId(pub u64);

impl VenueId {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "venue:{}", self.0)
    }
}

/// Identifier of a settlement instruction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Encode, Decode,
)]
pub struct InstructionId(pub u64);

impl InstructionId {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instruction:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TxId
// ---------------------------------------------------------------------------

/// Local correlation id for one submission. Uses UUIDv7 for time ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TxId(pub Uuid);

impl TxId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}
