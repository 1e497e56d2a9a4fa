//! Server handshake flow (spec.md §4.4 "Server flow").

use std::sync::Arc;
use std::time::Duration;

use crate::ecdh::EphemeralKeypair;
use crate::error::{E2eeError, E2eeResult};
use crate::frame::{FrameType, decode_frame, encode_frame};
use crate::handshake::cache::{CacheEntry, ServerHandshakeCache, cache_key};
use crate::handshake::messages::{AckMessage, InitMessage, RespMessage};
use crate::handshake::random::{random_handshake_id, random_nonce32};
use crate::keys::{derive_handshake_keys, verify_auth_tag};
use crate::record::SecureChannel;
use crate::suite::Suite;
use crate::transcript::compute_transcript;
use crate::transport::BinaryFrameTransport;

pub struct ServerHandshakeParams {
    pub server_features: u32,
    pub max_handshake_payload: usize,
    pub max_record_bytes: usize,
    pub max_buffered_bytes: usize,
    /// Allowed clock skew around `now_unix_s` for the `Ack` timestamp (spec.md §4.4).
    pub skew_seconds: i64,
    pub now_unix_s: i64,
    /// The channel's `init_exp`: the `Ack` timestamp must not fall after
    /// `init_exp + skew_seconds` (spec.md §4.4 `timestamp_after_init_exp`).
    pub init_exp: i64,
}

/// Run one server-side handshake to completion over `transport`: accepts an
/// `Init` (serving a cached `Resp` on retry), then an `Ack`, then returns a
/// ready `SecureChannel` after sending the server-finished `PING`.
///
/// `psk` is resolved by the caller from the channel/token context before
/// calling in; `cache` may be shared across many concurrent handshakes.
pub async fn run_server_handshake(
    transport: &mut dyn BinaryFrameTransport,
    cache: &Arc<ServerHandshakeCache>,
    psk: &[u8; 32],
    channel_id: &str,
    params: &ServerHandshakeParams,
) -> E2eeResult<SecureChannel> {
    let init_raw = transport.recv_frame().await?;
    let (frame_type, init_payload) = decode_frame(&init_raw, params.max_handshake_payload)?;
    if frame_type != FrameType::Init {
        return Err(E2eeError::UnexpectedFrameType("expected Init"));
    }
    let init: InitMessage = serde_json::from_slice(init_payload)?;
    if init.channel_id != channel_id {
        return Err(E2eeError::MalformedFrame("channel_id does not match this connection"));
    }
    let suite = Suite::from_wire(init.suite)?;

    let key = cache_key(init_payload);
    if let Some(cached_resp) = cache.resend(&key) {
        transport.send_frame(&cached_resp).await?;
    } else {
        let client_pub = flowersec_util::b64u::decode(&init.client_eph_pub_b64u)?;
        if client_pub.len() != suite.public_key_len() {
            return Err(E2eeError::InvalidPublicKey);
        }
        let nonce_c = flowersec_util::b64u::decode(&init.nonce_c_b64u)?;
        let nonce_c: [u8; 32] = nonce_c.try_into().map_err(|_| E2eeError::InvalidNonce)?;

        let server_eph = EphemeralKeypair::generate(suite);
        let nonce_s = random_nonce32()?;
        let handshake_id = random_handshake_id()?;

        let transcript = compute_transcript(
            init.suite,
            init.client_features,
            params.server_features,
            channel_id,
            &nonce_c,
            &nonce_s,
            &client_pub,
            server_eph.public_bytes(),
        );

        let resp = RespMessage {
            handshake_id: handshake_id.clone(),
            server_eph_pub_b64u: flowersec_util::b64u::encode(server_eph.public_bytes()),
            nonce_s_b64u: flowersec_util::b64u::encode(&nonce_s),
            server_features: params.server_features,
        };
        let resp_json = serde_json::to_vec(&resp)?;
        let resp_frame = encode_frame(FrameType::Resp, &resp_json);

        cache.insert(
            key,
            CacheEntry::new(handshake_id, resp_frame.clone(), transcript, client_pub, server_eph),
        )?;
        transport.send_frame(&resp_frame).await?;
    }

    let ack_raw = transport.recv_frame().await?;
    let (frame_type, ack_payload) = decode_frame(&ack_raw, params.max_handshake_payload)?;
    if frame_type != FrameType::Ack {
        return Err(E2eeError::UnexpectedFrameType("expected Ack"));
    }
    let ack: AckMessage = serde_json::from_slice(ack_payload)?;

    let (transcript, client_pub, server_secret) = cache.take(&key, &ack.handshake_id)?;

    if ack.timestamp_unix_s > params.now_unix_s + params.skew_seconds
        || ack.timestamp_unix_s < params.now_unix_s - params.skew_seconds
    {
        return Err(E2eeError::TimestampOutOfSkew);
    }
    if ack.timestamp_unix_s > params.init_exp + params.skew_seconds {
        return Err(E2eeError::TimestampAfterInitExp);
    }

    let auth_tag = flowersec_util::b64u::decode(&ack.auth_tag_b64u)?;
    if !verify_auth_tag(psk, &transcript, ack.timestamp_unix_s, &auth_tag) {
        return Err(E2eeError::AuthTagMismatch);
    }

    let shared = server_secret.shared_secret(&client_pub)?;
    let keys = derive_handshake_keys(psk, &shared, &transcript)?;

    let secure_channel = SecureChannel::new_server(&keys, params.max_record_bytes, params.max_buffered_bytes);
    let finished = secure_channel.send_ping()?;
    transport.send_frame(&finished).await?;

    Ok(secure_channel)
}

/// Default allowed clock skew for the `Ack` timestamp (spec.md §4.4: "default 30s").
pub const DEFAULT_SKEW: Duration = Duration::from_secs(30);
