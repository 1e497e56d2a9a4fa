//! Handshake frame codec (spec.md §4.4, §6):
//! `"FSEH" | version:u8 | type:u8 | reserved:u32 | length:u32 | json_payload`.

use flowersec_util::beio;

use crate::error::{E2eeError, E2eeResult};

const MAGIC: &[u8; 4] = b"FSEH";
pub const HEADER_LEN: usize = 4 + 1 + 1 + 4 + 4;
pub const VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Init = 1,
    Resp = 2,
    Ack = 3,
}

impl FrameType {
    fn from_u8(v: u8) -> E2eeResult<Self> {
        match v {
            1 => Ok(FrameType::Init),
            2 => Ok(FrameType::Resp),
            3 => Ok(FrameType::Ack),
            _ => Err(E2eeError::MalformedFrame("unknown handshake frame type")),
        }
    }
}

/// Encode a handshake flight as an opaque blob for the binary frame transport.
pub fn encode_frame(frame_type: FrameType, payload_json: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload_json.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.push(frame_type as u8);
    beio::put_u32_be(&mut out, 0); // reserved
    beio::put_u32_be(&mut out, payload_json.len() as u32);
    out.extend_from_slice(payload_json);
    out
}

/// Decode a handshake flight, enforcing `max_payload` (spec.md's
/// `max_handshake_payload`, default 8 KiB).
pub fn decode_frame(data: &[u8], max_payload: usize) -> E2eeResult<(FrameType, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(E2eeError::MalformedFrame("frame shorter than header"));
    }
    if &data[0..4] != MAGIC {
        return Err(E2eeError::MalformedFrame("bad magic"));
    }
    let version = beio::read_u8(data, 4).ok_or(E2eeError::MalformedFrame("missing version"))?;
    if version != VERSION {
        return Err(E2eeError::InvalidVersion);
    }
    let frame_type = beio::read_u8(data, 5).ok_or(E2eeError::MalformedFrame("missing type"))?;
    let frame_type = FrameType::from_u8(frame_type)?;
    let length = beio::read_u32_be(data, 10).ok_or(E2eeError::MalformedFrame("missing length"))? as usize;
    if length > max_payload {
        return Err(E2eeError::PayloadTooLarge);
    }
    let payload = data
        .get(HEADER_LEN..HEADER_LEN + length)
        .ok_or(E2eeError::MalformedFrame("payload shorter than declared length"))?;
    Ok((frame_type, payload))
}
