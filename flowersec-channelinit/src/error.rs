use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelInitError {
    #[error("channel_id must not be empty")]
    EmptyChannelId,
    #[error("allowed_suites must not be empty")]
    EmptyAllowedSuites,
    #[error("default_suite must be one of allowed_suites")]
    InvalidDefaultSuite,
    #[error("failed to generate random bytes")]
    RandomFailed,
    #[error("exp computation overflowed")]
    ExpOverflow,
    #[error("grant is already past its init_exp window")]
    PastInitExp,
    #[error("token signing failed: {0}")]
    Token(#[from] flowersec_token::TokenError),
}

pub type ChannelInitResult<T> = Result<T, ChannelInitError>;
