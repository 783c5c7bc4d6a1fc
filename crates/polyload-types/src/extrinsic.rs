//! Extrinsic envelope: signed transactions and unsigned inherents.
//!
//! Wire layout (SCALE, v4 style):
//!
//! ```text
//!   compact(len) ++ 0x84 ++ signer(32) ++ signature(64) ++ compact(nonce) ++ compact(tip) ++ call
//!   compact(len) ++ 0x04 ++ call
//! ```
//!
//! The signing payload is `call ++ compact(nonce) ++ compact(tip)`, replaced
//! by its SHA-256 digest when longer than 256 bytes. The extrinsic hash is
//! the SHA-256 of the full encoding.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use parity_scale_codec::{Compact, Decode, Encode};
use sha2::{Digest, Sha256};

use crate::constants::{SIGNED_EXTRINSIC_VERSION, UNSIGNED_EXTRINSIC_VERSION};
use crate::{AccountId, Call, ExtrinsicHash, PolyloadError};

/// Payloads longer than this are hashed before signing.
const MAX_RAW_PAYLOAD: usize = 256;

/// A signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedExtrinsic {
    pub signer: AccountId,
    pub signature: [u8; 64],
    pub nonce: u64,
    pub tip: u128,
    pub call: Call,
}

impl SignedExtrinsic {
    /// Bytes covered by the signature.
    #[must_use]
    pub fn signing_payload(call: &Call, nonce: u64, tip: u128) -> Vec<u8> {
        let raw = (call, Compact(nonce), Compact(tip)).encode();
        if raw.len() > MAX_RAW_PAYLOAD {
            Sha256::digest(&raw).to_vec()
        } else {
            raw
        }
    }

    /// Sign `call` at `nonce` with `key`.
    #[must_use]
    pub fn sign(key: &SigningKey, call: Call, nonce: u64, tip: u128) -> Self {
        let payload = Self::signing_payload(&call, nonce, tip);
        let signature = key.sign(&payload);
        Self {
            signer: AccountId(key.verifying_key().to_bytes()),
            signature: signature.to_bytes(),
            nonce,
            tip,
            call,
        }
    }

    /// Check the signature against the signer's public key.
    #[must_use]
    pub fn verify(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.signer.0) else {
            return false;
        };
        let payload = Self::signing_payload(&self.call, self.nonce, self.tip);
        key.verify(&payload, &Signature::from_bytes(&self.signature))
            .is_ok()
    }
}

/// Any extrinsic that can appear in a block body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extrinsic {
    Signed(SignedExtrinsic),
    /// Unsigned call inserted by the block author (timestamp).
    Inherent(Call),
}

impl Extrinsic {
    /// Length-prefixed SCALE encoding.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(128);
        match self {
            Self::Signed(xt) => {
                body.push(SIGNED_EXTRINSIC_VERSION);
                xt.signer.encode_to(&mut body);
                body.extend_from_slice(&xt.signature);
                Compact(xt.nonce).encode_to(&mut body);
                Compact(xt.tip).encode_to(&mut body);
                xt.call.encode_to(&mut body);
            }
            Self::Inherent(call) => {
                body.push(UNSIGNED_EXTRINSIC_VERSION);
                call.encode_to(&mut body);
            }
        }
        body.encode()
    }

    /// Decode a length-prefixed extrinsic.
    ///
    /// # Errors
    /// Returns `InvalidExtrinsic` on malformed input, unknown version byte
    /// or trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let mut input = bytes;
        let body = Vec::<u8>::decode(&mut input)?;
        if !input.is_empty() {
            return Err(PolyloadError::InvalidExtrinsic {
                reason: format!("{} trailing bytes after extrinsic", input.len()),
            });
        }
        let Some((&version, mut rest)) = body.split_first() else {
            return Err(PolyloadError::InvalidExtrinsic {
                reason: "empty extrinsic".into(),
            });
        };
        let xt = match version {
            SIGNED_EXTRINSIC_VERSION => {
                let signer = AccountId::decode(&mut rest)?;
                let signature = <[u8; 64]>::decode(&mut rest)?;
                let nonce = Compact::<u64>::decode(&mut rest)?.0;
                let tip = Compact::<u128>::decode(&mut rest)?.0;
                let call = Call::decode(&mut rest)?;
                Self::Signed(SignedExtrinsic {
                    signer,
                    signature,
                    nonce,
                    tip,
                    call,
                })
            }
            UNSIGNED_EXTRINSIC_VERSION => Self::Inherent(Call::decode(&mut rest)?),
            other => {
                return Err(PolyloadError::InvalidExtrinsic {
                    reason: format!("unknown version byte {other:#04x}"),
                });
            }
        };
        if !rest.is_empty() {
            return Err(PolyloadError::InvalidExtrinsic {
                reason: format!("{} trailing bytes after call", rest.len()),
            });
        }
        Ok(xt)
    }

    /// `0x`-prefixed hex of [`Extrinsic::to_bytes`], as sent over RPC.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Parse the hex form returned by `chain_getBlock`.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| PolyloadError::InvalidExtrinsic {
                reason: format!("bad hex: {e}"),
            })?;
        Self::from_bytes(&bytes)
    }

    #[must_use]
    pub fn hash(&self) -> ExtrinsicHash {
        hash_encoded(&self.to_bytes())
    }

    #[must_use]
    pub fn call(&self) -> &Call {
        match self {
            Self::Signed(xt) => &xt.call,
            Self::Inherent(call) => call,
        }
    }

    #[must_use]
    pub fn signer(&self) -> Option<AccountId> {
        match self {
            Self::Signed(xt) => Some(xt.signer),
            Self::Inherent(_) => None,
        }
    }
}

/// Hash of already-encoded extrinsic bytes.
#[must_use]
pub fn hash_encoded(bytes: &[u8]) -> ExtrinsicHash {
    ExtrinsicHash(Sha256::digest(bytes).into())
}

/// Extract the timestamp from an encoded extrinsic if it is the
/// `timestamp.set` inherent.
#[must_use]
pub fn timestamp_of(hex_xt: &str) -> Option<u64> {
    match Extrinsic::from_hex(hex_xt).ok()? {
        Extrinsic::Inherent(Call::Timestamp(crate::TimestampCall::Set { now })) => Some(now),
        _ => None,
    }
}
