//! Signing keys.
//!
//! Development keys are derived from a URI such as `//Alice`: the ed25519
//! seed is `SHA-256(uri)`. The same URI always yields the same account, so
//! scenario runs are reproducible.

use std::fmt;

use ed25519_dalek::SigningKey;
use polyload_types::{AccountId, Call, SignedExtrinsic};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// An account that can sign extrinsics.
#[derive(Clone)]
pub struct Signer {
    name: String,
    key: SigningKey,
}

impl Signer {
    /// Deterministic development key for `uri` (`//Alice`, `//user_3`).
    #[must_use]
    pub fn dev(uri: &str) -> Self {
        let seed: [u8; 32] = Sha256::digest(uri.as_bytes()).into();
        Self {
            name: uri.trim_start_matches('/').to_string(),
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// `count` development keys named `//{prefix}_{i}`.
    #[must_use]
    pub fn dev_batch(prefix: &str, count: usize) -> Vec<Self> {
        (0..count)
            .map(|i| Self::dev(&format!("//{prefix}_{i}")))
            .collect()
    }

    /// A fresh random key.
    #[must_use]
    pub fn random(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: SigningKey::generate(&mut OsRng),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn account(&self) -> AccountId {
        AccountId(self.key.verifying_key().to_bytes())
    }

    /// Sign `call` at `nonce` with no tip.
    #[must_use]
    pub fn sign(&self, call: Call, nonce: u64) -> SignedExtrinsic {
        SignedExtrinsic::sign(&self.key, call, nonce, 0)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("name", &self.name)
            .field("account", &self.account())
            .finish_non_exhaustive()
    }
}
