use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("origin is not in the allow-list")]
    OriginNotAllowed,
    #[error("too many concurrent connections")]
    TooManyConnections,
    #[error("expected an Attach frame")]
    ExpectedAttach,
    #[error("malformed Attach frame: {0}")]
    InvalidAttach(String),
    #[error("attach token rejected: {0}")]
    InvalidToken(#[from] flowersec_token::TokenError),
    #[error("channel_id in token does not match attach request")]
    ChannelMismatch,
    #[error("token_id has already been used")]
    TokenReplay,
    #[error("channel already paired with a mismatched init_exp")]
    InitExpMismatch,
    #[error("channel already paired with a mismatched idle_timeout")]
    IdleTimeoutMismatch,
    #[error("role slot already occupied by a different endpoint")]
    RoleMismatch,
    #[error("replace attempt exceeded the rate limit")]
    ReplaceRateLimited,
    #[error("too many paired channels")]
    TooManyChannels,
    #[error("non-binary frame received on a paired relay")]
    NonBinaryFrame,
    #[error("record exceeds max_record_bytes")]
    RecordTooLarge,
    #[error("pre-pair pending buffer exceeded its limit")]
    PendingOverflow,
    #[error("write timed out or failed: {0}")]
    WriteError(String),
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to generate random bytes")]
    RandomFailed,
}

pub type TunnelResult<T> = Result<T, TunnelError>;

impl TunnelError {
    /// The stable close-reason token for this error (spec.md §6).
    pub fn close_reason(&self) -> &'static str {
        match self {
            TunnelError::OriginNotAllowed => "invalid_attach",
            TunnelError::TooManyConnections => "too_many_connections",
            TunnelError::ExpectedAttach => "expected_attach",
            TunnelError::InvalidAttach(_) => "invalid_attach",
            TunnelError::InvalidToken(_) => "invalid_token",
            TunnelError::ChannelMismatch => "channel_mismatch",
            TunnelError::TokenReplay => "token_replay",
            TunnelError::InitExpMismatch => "init_exp_mismatch",
            TunnelError::IdleTimeoutMismatch => "idle_timeout_mismatch",
            TunnelError::RoleMismatch => "role_mismatch",
            TunnelError::ReplaceRateLimited => "replace_rate_limited",
            TunnelError::TooManyChannels => "invalid_attach",
            TunnelError::NonBinaryFrame => "non_binary_frame",
            TunnelError::RecordTooLarge => "record_too_large",
            TunnelError::PendingOverflow => "pending_overflow",
            TunnelError::WriteError(_) => "write_error",
            TunnelError::Transport(_) => "attach_failed",
            TunnelError::RandomFailed => "attach_failed",
        }
    }
}
