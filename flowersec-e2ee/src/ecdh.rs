//! Per-suite ephemeral ECDH keypair generation and shared-secret computation
//! (spec.md §4.4 step 1 and step 6).

use p256::ecdh::EphemeralSecret as P256EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret as X25519EphemeralSecret, PublicKey as X25519PublicKey};

use crate::error::{E2eeError, E2eeResult};
use crate::suite::Suite;

/// An ephemeral keypair generated for one handshake flight. Holds the
/// private half until `shared_secret` consumes it.
pub enum EphemeralKeypair {
    X25519 { secret: X25519EphemeralSecret, public: [u8; 32] },
    P256 { secret: P256EphemeralSecret, public: [u8; 65] },
}

impl EphemeralKeypair {
    pub fn generate(suite: Suite) -> Self {
        match suite {
            Suite::X25519 => {
                let secret = X25519EphemeralSecret::random_from_rng(OsRng);
                let public = X25519PublicKey::from(&secret);
                Self::X25519 { secret, public: *public.as_bytes() }
            }
            Suite::P256 => {
                let secret = P256EphemeralSecret::random(&mut OsRng);
                let encoded = secret.public_key().to_encoded_point(false);
                let mut public = [0u8; 65];
                public.copy_from_slice(encoded.as_bytes());
                Self::P256 { secret, public }
            }
        }
    }

    /// This keypair's public key, in the wire encoding spec.md §4.4 expects
    /// (X25519: 32-byte raw; P-256: 65-byte uncompressed SEC1 point).
    pub fn public_bytes(&self) -> &[u8] {
        match self {
            EphemeralKeypair::X25519 { public, .. } => public,
            EphemeralKeypair::P256 { public, .. } => public,
        }
    }

    /// Consume this keypair against the peer's public key, producing the
    /// raw ECDH output: X25519's 32-byte shared point, or P-256's 32-byte
    /// x-coordinate (spec.md §4.4 step 6).
    pub fn shared_secret(self, peer_public: &[u8]) -> E2eeResult<[u8; 32]> {
        match self {
            EphemeralKeypair::X25519 { secret, .. } => {
                let bytes: [u8; 32] =
                    peer_public.try_into().map_err(|_| E2eeError::InvalidPublicKey)?;
                let peer = X25519PublicKey::from(bytes);
                Ok(*secret.diffie_hellman(&peer).as_bytes())
            }
            EphemeralKeypair::P256 { secret, .. } => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| E2eeError::InvalidPublicKey)?;
                let shared = secret.diffie_hellman(&peer);
                let mut out = [0u8; 32];
                out.copy_from_slice(shared.raw_secret_bytes().as_slice());
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_shared_secrets_agree() {
        let a = EphemeralKeypair::generate(Suite::X25519);
        let b = EphemeralKeypair::generate(Suite::X25519);
        let a_pub = a.public_bytes().to_vec();
        let b_pub = b.public_bytes().to_vec();
        let a_secret = a.shared_secret(&b_pub).unwrap();
        let b_secret = b.shared_secret(&a_pub).unwrap();
        assert_eq!(a_secret, b_secret);
    }

    #[test]
    fn p256_shared_secrets_agree() {
        let a = EphemeralKeypair::generate(Suite::P256);
        let b = EphemeralKeypair::generate(Suite::P256);
        let a_pub = a.public_bytes().to_vec();
        let b_pub = b.public_bytes().to_vec();
        assert_eq!(a_pub.len(), 65);
        let a_secret = a.shared_secret(&b_pub).unwrap();
        let b_secret = b.shared_secret(&a_pub).unwrap();
        assert_eq!(a_secret, b_secret);
    }

    #[test]
    fn rejects_malformed_peer_public_key() {
        let a = EphemeralKeypair::generate(Suite::X25519);
        assert!(a.shared_secret(&[1, 2, 3]).is_err());
    }
}
