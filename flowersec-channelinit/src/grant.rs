use serde::{Deserialize, Serialize};

/// Per-role channel-init grant (spec.md §3 "Channel-init grant").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelGrant {
    pub tunnel_url: String,
    pub channel_id: String,
    pub channel_init_expire_at_unix_s: i64,
    pub idle_timeout_seconds: u64,
    pub role: String,
    pub token: String,
    pub e2ee_psk_b64u: String,
    pub allowed_suites: Vec<String>,
    pub default_suite: String,
}

/// A matched client/server grant pair sharing `channel_id`, PSK, `init_exp`,
/// idle timeout, and `default_suite`; only `role` and `token` differ.
#[derive(Debug, Clone)]
pub struct ChannelGrantPair {
    pub client: ChannelGrant,
    pub server: ChannelGrant,
}
