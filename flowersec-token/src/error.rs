use thiserror::Error;

/// Failure taxonomy for token signing/verification (spec.md §4.1).
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("kid must not be empty")]
    EmptyKid,
    #[error("aud must not be empty")]
    EmptyAud,
    #[error("token does not have the FST1.<payload>.<sig> shape")]
    InvalidFormat,
    #[error("bad base64 in token: {0}")]
    BadBase64(#[from] base64::DecodeError),
    #[error("bad json payload: {0}")]
    BadJson(#[from] serde_json::Error),
    #[error("unknown kid: {0}")]
    UnknownKid(String),
    #[error("invalid ed25519 signature")]
    InvalidSignature,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("iat is in the future")]
    IatInFuture,
    #[error("token has expired")]
    Expired,
    #[error("channel-init window has expired")]
    InitWindowExpired,
    #[error("exp must not exceed init_exp")]
    ExpAfterInitExp,
    #[error("malformed ed25519 key material: {0}")]
    MalformedKey(String),
}

pub type TokenResult<T> = Result<T, TokenError>;
