//! Token key file formats (spec.md §6): a private signing key file and a
//! public keyset used by verifiers.

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{TokenError, TokenResult};

/// Private file: `{"kid", "privkey_b64u"}` — a 32-byte Ed25519 seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateKeyFile {
    pub kid: String,
    pub privkey_b64u: String,
}

impl PrivateKeyFile {
    pub fn to_signing_key(&self) -> TokenResult<SigningKey> {
        let seed = flowersec_util::b64u::decode(&self.privkey_b64u)?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| TokenError::MalformedKey("privkey_b64u must decode to 32 bytes".into()))?;
        Ok(SigningKey::from_bytes(&seed))
    }
}

/// One entry in the public keyset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyEntry {
    pub kid: String,
    pub pubkey_b64u: String,
}

/// Public keyset file: `{"keys":[{"kid","pubkey_b64u"}, ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeysetFile {
    pub keys: Vec<PublicKeyEntry>,
}

/// A resolved, ready-to-verify keyset: `kid -> VerifyingKey`. Held behind
/// `flowersec_util`-style atomic-swap by callers that implement `ReloadKeys`
/// (spec.md §4.3).
#[derive(Debug, Clone, Default)]
pub struct Keyset {
    keys: HashMap<String, VerifyingKey>,
}

impl Keyset {
    pub fn from_file(file: &KeysetFile) -> TokenResult<Self> {
        let mut keys = HashMap::with_capacity(file.keys.len());
        for entry in &file.keys {
            let bytes = flowersec_util::b64u::decode(&entry.pubkey_b64u)?;
            let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
                TokenError::MalformedKey("pubkey_b64u must decode to 32 bytes".into())
            })?;
            let vk = VerifyingKey::from_bytes(&bytes)
                .map_err(|e| TokenError::MalformedKey(e.to_string()))?;
            keys.insert(entry.kid.clone(), vk);
        }
        Ok(Self { keys })
    }

    pub fn resolve(&self, kid: &str) -> TokenResult<&VerifyingKey> {
        self.keys.get(kid).ok_or_else(|| TokenError::UnknownKid(kid.to_string()))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
