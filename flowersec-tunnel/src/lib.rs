//! WebSocket tunnel pairing server: Attach verification, role-slot pairing,
//! pre-pair buffering, and binary-record relay between a paired client and
//! server (spec.md §4.3).

mod attach;
mod channel;
mod clock;
mod config;
mod error;
mod origin;
mod replay;
mod server;

pub use attach::Attach;
pub use config::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_ATTACH_BYTES, DEFAULT_MAX_CHANNELS,
    DEFAULT_MAX_CONNS, DEFAULT_MAX_PENDING_BYTES, DEFAULT_MAX_RECORD_BYTES, DEFAULT_MAX_TOTAL_PENDING_BYTES,
    DEFAULT_MAX_WRITE_QUEUE_BYTES, DEFAULT_SKEW_SECONDS, DEFAULT_WRITE_TIMEOUT, TunnelConfig,
};
pub use error::{TunnelError, TunnelResult};
pub use origin::is_origin_allowed;
pub use replay::TokenUseCache;
pub use server::TunnelServer;
