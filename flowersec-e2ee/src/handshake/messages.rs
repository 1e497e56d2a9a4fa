use serde::{Deserialize, Serialize};

/// Flight 1 (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitMessage {
    pub channel_id: String,
    pub role: u8,
    pub version: u8,
    pub suite: u16,
    pub client_eph_pub_b64u: String,
    pub nonce_c_b64u: String,
    pub client_features: u32,
}

/// Flight 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespMessage {
    pub handshake_id: String,
    pub server_eph_pub_b64u: String,
    pub nonce_s_b64u: String,
    pub server_features: u32,
}

/// Flight 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMessage {
    pub handshake_id: String,
    pub timestamp_unix_s: i64,
    pub auth_tag_b64u: String,
}
