use std::time::Duration;

use flowersec_token::Keyset;

pub const DEFAULT_MAX_CONNS: usize = 4096;
pub const DEFAULT_MAX_CHANNELS: usize = 4096;
pub const DEFAULT_MAX_RECORD_BYTES: usize = 256 * 1024;
pub const DEFAULT_MAX_ATTACH_BYTES: usize = 8 * 1024;
pub const DEFAULT_MAX_PENDING_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_PENDING_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_WRITE_QUEUE_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_SKEW_SECONDS: i64 = 30;

/// Construction parameters for a [`crate::TunnelServer`] (spec.md §6).
#[derive(Clone)]
pub struct TunnelConfig {
    pub path: String,
    pub keyset: Keyset,
    pub tunnel_audience: String,
    pub tunnel_issuer: Option<String>,
    pub allowed_origins: Vec<String>,
    pub allow_no_origin: bool,
    pub max_conns: usize,
    pub max_channels: usize,
    pub max_record_bytes: usize,
    pub max_attach_bytes: usize,
    pub max_pending_bytes: usize,
    pub max_total_pending_bytes: usize,
    pub idle_timeout: Duration,
    pub cleanup_interval: Duration,
    pub write_timeout: Duration,
    pub max_write_queue_bytes: usize,
    pub skew_seconds: i64,
}

impl TunnelConfig {
    pub fn new(keyset: Keyset, tunnel_audience: impl Into<String>) -> Self {
        Self {
            path: "/ws".to_string(),
            keyset,
            tunnel_audience: tunnel_audience.into(),
            tunnel_issuer: None,
            allowed_origins: Vec::new(),
            allow_no_origin: false,
            max_conns: DEFAULT_MAX_CONNS,
            max_channels: DEFAULT_MAX_CHANNELS,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            max_attach_bytes: DEFAULT_MAX_ATTACH_BYTES,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            max_total_pending_bytes: DEFAULT_MAX_TOTAL_PENDING_BYTES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_write_queue_bytes: DEFAULT_MAX_WRITE_QUEUE_BYTES,
            skew_seconds: DEFAULT_SKEW_SECONDS,
        }
    }
}
