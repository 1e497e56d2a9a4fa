//! Channel-init grant issuance: fresh PSK, matched client/server tokens
//! (spec.md §4.2).

mod config;
mod error;
mod grant;
mod service;

pub use config::{
    ChannelInitConfig, DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_INIT_EXP_SECONDS, DEFAULT_SKEW_SECONDS,
    DEFAULT_TOKEN_EXP_SECONDS,
};
pub use error::{ChannelInitError, ChannelInitResult};
pub use grant::{ChannelGrant, ChannelGrantPair};
pub use service::ChannelInitService;
