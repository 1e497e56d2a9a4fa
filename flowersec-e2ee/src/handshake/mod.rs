//! Three-flight Init/Resp/Ack handshake (spec.md §4.4).

mod cache;
mod client;
mod messages;
mod random;
mod server;

pub use cache::{CacheEntry, CacheKey, DEFAULT_MAX_ENTRIES, DEFAULT_TTL, ServerHandshakeCache, cache_key};
pub use client::{ClientHandshakeParams, run_client_handshake};
pub use messages::{AckMessage, InitMessage, RespMessage};
pub use server::{DEFAULT_SKEW, ServerHandshakeParams, run_server_handshake};
