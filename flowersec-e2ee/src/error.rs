use thiserror::Error;

/// Failure taxonomy for the handshake and record layer (spec.md §4.4, §4.5).
#[derive(Debug, Error)]
pub enum E2eeError {
    #[error("invalid handshake version")]
    InvalidVersion,
    #[error("invalid or unsupported suite")]
    InvalidSuite,
    #[error("handshake timestamp outside the allowed clock skew")]
    TimestampOutOfSkew,
    #[error("handshake timestamp is after init_exp")]
    TimestampAfterInitExp,
    #[error("auth tag mismatch")]
    AuthTagMismatch,
    #[error("handshake payload exceeds max_handshake_payload")]
    PayloadTooLarge,
    #[error("malformed handshake frame: {0}")]
    MalformedFrame(&'static str),
    #[error("bad json payload: {0}")]
    BadJson(#[from] serde_json::Error),
    #[error("bad base64 field: {0}")]
    BadBase64(#[from] base64::DecodeError),
    #[error("invalid public key length for suite")]
    InvalidPublicKey,
    #[error("invalid nonce length")]
    InvalidNonce,
    #[error("server handshake cache is at capacity")]
    CacheFull,
    #[error("unexpected frame type in handshake state {0}")]
    UnexpectedFrameType(&'static str),
    #[error("record sequence mismatch: expected {expected}, got {got}")]
    BadSeq { expected: u64, got: u64 },
    #[error("record exceeds max_record_bytes")]
    RecordTooLarge,
    #[error("cipher_len does not match frame length")]
    BadCipherLen,
    #[error("unread buffered plaintext exceeds max_buffered_bytes")]
    RecvBufferExceeded,
    #[error("AEAD seal/open failed")]
    CryptoFailure,
    #[error("random number generation failed")]
    RandomFailed,
    #[error("REKEY is not implemented; this base SecureChannel treats it as reserved")]
    RekeyUnimplemented,
    #[error("key derivation failed: {0}")]
    Kdf(#[from] flowersec_util::kdf::KdfError),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error(transparent)]
    Deadline(#[from] flowersec_util::DeadlineExceeded),
}

pub type E2eeResult<T> = Result<T, E2eeError>;
