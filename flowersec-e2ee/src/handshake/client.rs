//! Client handshake flow (spec.md §4.4 "Client flow").

use crate::ecdh::EphemeralKeypair;
use crate::error::{E2eeError, E2eeResult};
use crate::frame::{FrameType, decode_frame, encode_frame};
use crate::handshake::messages::{AckMessage, InitMessage, RespMessage};
use crate::handshake::random::random_nonce32;
use crate::keys::{compute_auth_tag, derive_handshake_keys};
use crate::record::{RecordFlag, SecureChannel};
use crate::suite::Suite;
use crate::transcript::compute_transcript;
use crate::transport::BinaryFrameTransport;

/// Clock and random inputs the handshake needs, injected so tests can drive
/// deterministic timestamps.
pub struct ClientHandshakeParams<'a> {
    pub channel_id: &'a str,
    pub suite: Suite,
    pub psk: [u8; 32],
    pub client_features: u32,
    pub max_handshake_payload: usize,
    pub max_record_bytes: usize,
    pub max_buffered_bytes: usize,
    pub now_unix_s: i64,
}

/// Run the three-flight client handshake to completion over `transport`,
/// returning a ready `SecureChannel`.
pub async fn run_client_handshake(
    transport: &mut dyn BinaryFrameTransport,
    params: &ClientHandshakeParams<'_>,
) -> E2eeResult<SecureChannel> {
    let eph = EphemeralKeypair::generate(params.suite);
    let nonce_c = random_nonce32()?;

    let init = InitMessage {
        channel_id: params.channel_id.to_string(),
        role: 1,
        version: 1,
        suite: params.suite.to_wire(),
        client_eph_pub_b64u: flowersec_util::b64u::encode(eph.public_bytes()),
        nonce_c_b64u: flowersec_util::b64u::encode(&nonce_c),
        client_features: params.client_features,
    };
    let init_json = serde_json::to_vec(&init)?;
    transport.send_frame(&encode_frame(FrameType::Init, &init_json)).await?;

    let resp_raw = transport.recv_frame().await?;
    let (frame_type, payload) = decode_frame(&resp_raw, params.max_handshake_payload)?;
    if frame_type != FrameType::Resp {
        return Err(E2eeError::UnexpectedFrameType("expected Resp"));
    }
    let resp: RespMessage = serde_json::from_slice(payload)?;

    let nonce_s = flowersec_util::b64u::decode(&resp.nonce_s_b64u)?;
    let nonce_s: [u8; 32] = nonce_s.try_into().map_err(|_| E2eeError::InvalidNonce)?;
    let server_pub = flowersec_util::b64u::decode(&resp.server_eph_pub_b64u)?;
    if server_pub.len() != params.suite.public_key_len() {
        return Err(E2eeError::InvalidPublicKey);
    }

    let transcript = compute_transcript(
        params.suite.to_wire(),
        params.client_features,
        resp.server_features,
        params.channel_id,
        &nonce_c,
        &nonce_s,
        eph.public_bytes(),
        &server_pub,
    );

    let shared = eph.shared_secret(&server_pub)?;
    let keys = derive_handshake_keys(&params.psk, &shared, &transcript)?;

    let auth_tag = compute_auth_tag(&params.psk, &transcript, params.now_unix_s);
    let ack = AckMessage {
        handshake_id: resp.handshake_id.clone(),
        timestamp_unix_s: params.now_unix_s,
        auth_tag_b64u: flowersec_util::b64u::encode(&auth_tag),
    };
    let ack_json = serde_json::to_vec(&ack)?;
    transport.send_frame(&encode_frame(FrameType::Ack, &ack_json)).await?;

    let secure_channel = SecureChannel::new_client(&keys, params.max_record_bytes, params.max_buffered_bytes);

    // Server-finished confirmation: an encrypted PING at S2C sequence 1.
    let finished_raw = transport.recv_frame().await?;
    let (flags, seq, plaintext) = secure_channel.decrypt(&finished_raw)?;
    if flags != RecordFlag::Ping || seq != 1 || !plaintext.is_empty() {
        return Err(E2eeError::UnexpectedFrameType("expected server-finished PING at seq 1"));
    }

    Ok(secure_channel)
}
