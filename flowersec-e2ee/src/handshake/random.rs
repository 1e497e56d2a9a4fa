use crate::error::{E2eeError, E2eeResult};

/// Fill a fresh buffer with CSPRNG bytes, surfacing failure as a typed error
/// (spec.md §7 `random_failed`) rather than panicking.
pub fn random_bytes(len: usize) -> E2eeResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    getrandom::fill(&mut buf).map_err(|_| E2eeError::RandomFailed)?;
    Ok(buf)
}

pub fn random_nonce32() -> E2eeResult<[u8; 32]> {
    let bytes = random_bytes(32)?;
    Ok(bytes.try_into().unwrap_or([0u8; 32]))
}

pub fn random_handshake_id() -> E2eeResult<String> {
    let bytes = random_bytes(16)?;
    Ok(flowersec_util::b64u::encode(&bytes))
}
