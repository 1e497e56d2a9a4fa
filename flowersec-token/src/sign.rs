//! `SignToken`/`VerifyToken` (spec.md §4.1).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};

use crate::error::{TokenError, TokenResult};
use crate::keyset::Keyset;
use crate::payload::TokenPayload;

const PREFIX: &str = "FST1";

/// Sign `payload` with `signing_key`. Refuses empty `kid`/`aud` per spec.md §4.1.
pub fn sign_token(signing_key: &SigningKey, payload: &TokenPayload) -> TokenResult<String> {
    if payload.kid.is_empty() {
        return Err(TokenError::EmptyKid);
    }
    if payload.aud.is_empty() {
        return Err(TokenError::EmptyAud);
    }
    if payload.exp > payload.init_exp {
        return Err(TokenError::ExpAfterInitExp);
    }

    let payload_json = serde_json::to_vec(payload)?;
    let payload_b64u = flowersec_util::b64u::encode(&payload_json);
    let signed_part = format!("{PREFIX}.{payload_b64u}");
    let signature: Signature = signing_key.sign(signed_part.as_bytes());
    let sig_b64u = flowersec_util::b64u::encode(&signature.to_bytes());
    Ok(format!("{signed_part}.{sig_b64u}"))
}

/// Verification options supplied by the caller (spec.md §4.1, §7).
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub aud: String,
    pub iss: Option<String>,
    pub now: i64,
    pub skew_seconds: i64,
}

/// Verify `token` against `keyset`. Returns the decoded payload on success.
///
/// Order of checks mirrors spec.md §4.1: format, base64, json, kid
/// resolution, signature, then audience/issuer/time checks, all of which
/// happen only after the signature has been validated.
pub fn verify_token(token: &str, keyset: &Keyset, opts: &VerifyOptions) -> TokenResult<TokenPayload> {
    let parts: Vec<&str> = token.split('.').collect();
    let [prefix, payload_b64u, sig_b64u] = parts[..] else {
        return Err(TokenError::InvalidFormat);
    };
    if prefix != PREFIX {
        return Err(TokenError::InvalidFormat);
    }

    let payload_json = flowersec_util::b64u::decode(payload_b64u)?;
    let sig_bytes = flowersec_util::b64u::decode(sig_b64u)?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| TokenError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    let payload: TokenPayload = serde_json::from_slice(&payload_json)?;

    let verifying_key = keyset.resolve(&payload.kid)?;
    let signed_part = format!("{PREFIX}.{payload_b64u}");
    verifying_key
        .verify(signed_part.as_bytes(), &signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    if !flowersec_util::ct_eq_str(&payload.aud, &opts.aud) {
        return Err(TokenError::InvalidAudience);
    }
    if let Some(expected_iss) = &opts.iss {
        match &payload.iss {
            Some(actual) if flowersec_util::ct_eq_str(actual, expected_iss) => {}
            _ => return Err(TokenError::InvalidIssuer),
        }
    }
    if payload.exp > payload.init_exp {
        return Err(TokenError::ExpAfterInitExp);
    }
    if payload.iat > opts.now + opts.skew_seconds {
        return Err(TokenError::IatInFuture);
    }
    if opts.now > payload.exp + opts.skew_seconds {
        return Err(TokenError::Expired);
    }
    if opts.now > payload.init_exp + opts.skew_seconds {
        return Err(TokenError::InitWindowExpired);
    }

    Ok(payload)
}
