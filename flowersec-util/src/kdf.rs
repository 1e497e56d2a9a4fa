//! HKDF-SHA256 key derivation, shared between the E2EE handshake's transcript
//! binding and any future per-epoch rekey derivation.

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("hkdf output length invalid for the requested size")]
    InvalidLength,
}

/// `HKDF-Extract(salt, ikm)` followed by `HKDF-Expand(prk, info, out_len)`.
pub fn hkdf_expand(salt: &[u8], ikm: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>, KdfError> {
    let (_, hk) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    let mut out = vec![0u8; out_len];
    hk.expand(info, &mut out).map_err(|_| KdfError::InvalidLength)?;
    Ok(out)
}

/// Derive a fixed-size key using a pre-extracted PRK, for callers that need
/// to expand several `info` strings off a single extraction (as the
/// handshake does for the five transcript-bound secrets).
pub struct Prk(Hkdf<Sha256>);

impl Prk {
    pub fn extract(salt: &[u8], ikm: &[u8]) -> Self {
        let (_, hk) = Hkdf::<Sha256>::extract(Some(salt), ikm);
        Self(hk)
    }

    pub fn expand(&self, info: &[u8], out_len: usize) -> Result<Vec<u8>, KdfError> {
        let mut out = vec![0u8; out_len];
        self.0.expand(info, &mut out).map_err(|_| KdfError::InvalidLength)?;
        Ok(out)
    }
}
