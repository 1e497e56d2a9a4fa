//! Key schedule derived from the ECDH shared secret and transcript hash
//! (spec.md §4.4 steps 7-8).

use flowersec_util::Prk;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::E2eeResult;

type HmacSha256 = Hmac<Sha256>;

/// The five transcript-bound secrets produced by the handshake key schedule.
#[derive(Clone)]
pub struct HandshakeKeys {
    pub c2s_key: [u8; 32],
    pub s2c_key: [u8; 32],
    pub rekey_base: [u8; 32],
    pub c2s_nonce_prefix: [u8; 4],
    pub s2c_nonce_prefix: [u8; 4],
}

impl std::fmt::Debug for HandshakeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeKeys").finish_non_exhaustive()
    }
}

/// `PRK = HKDF-Extract(salt=psk, ikm=shared||transcript)`, then expand with
/// distinct `info` labels into the five secrets.
pub fn derive_handshake_keys(psk: &[u8; 32], shared: &[u8; 32], transcript: &[u8; 32]) -> E2eeResult<HandshakeKeys> {
    let mut ikm = Vec::with_capacity(64);
    ikm.extend_from_slice(shared);
    ikm.extend_from_slice(transcript);

    let prk = Prk::extract(psk, &ikm);

    let c2s_key: [u8; 32] = prk.expand(b"flowersec-e2ee-c2s-key", 32)?.try_into().expect("len 32");
    let s2c_key: [u8; 32] = prk.expand(b"flowersec-e2ee-s2c-key", 32)?.try_into().expect("len 32");
    let rekey_base: [u8; 32] = prk.expand(b"flowersec-e2ee-rekey-base", 32)?.try_into().expect("len 32");
    let c2s_nonce_prefix: [u8; 4] =
        prk.expand(b"flowersec-e2ee-c2s-nonce", 4)?.try_into().expect("len 4");
    let s2c_nonce_prefix: [u8; 4] =
        prk.expand(b"flowersec-e2ee-s2c-nonce", 4)?.try_into().expect("len 4");

    Ok(HandshakeKeys { c2s_key, s2c_key, rekey_base, c2s_nonce_prefix, s2c_nonce_prefix })
}

/// `auth_tag = HMAC-SHA256(psk, transcript || timestamp_unix_s:u64be)`.
pub fn compute_auth_tag(psk: &[u8; 32], transcript: &[u8; 32], timestamp_unix_s: i64) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(psk).expect("hmac accepts any key length");
    mac.update(transcript);
    mac.update(&timestamp_unix_s.to_be_bytes());
    mac.finalize().into_bytes().into()
}

/// Constant-time verification of an `Ack`'s `auth_tag`.
pub fn verify_auth_tag(psk: &[u8; 32], transcript: &[u8; 32], timestamp_unix_s: i64, tag: &[u8]) -> bool {
    let expected = compute_auth_tag(psk, transcript, timestamp_unix_s);
    flowersec_util::ct_eq(&expected, tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_schedule_is_deterministic() {
        let psk = [1u8; 32];
        let shared = [2u8; 32];
        let transcript = [3u8; 32];
        let a = derive_handshake_keys(&psk, &shared, &transcript).unwrap();
        let b = derive_handshake_keys(&psk, &shared, &transcript).unwrap();
        assert_eq!(a.c2s_key, b.c2s_key);
        assert_eq!(a.s2c_key, b.s2c_key);
        assert_ne!(a.c2s_key, a.s2c_key);
    }

    #[test]
    fn auth_tag_round_trips() {
        let psk = [9u8; 32];
        let transcript = [4u8; 32];
        let tag = compute_auth_tag(&psk, &transcript, 1_700_000_000);
        assert!(verify_auth_tag(&psk, &transcript, 1_700_000_000, &tag));
        assert!(!verify_auth_tag(&psk, &transcript, 1_700_000_001, &tag));
    }
}
