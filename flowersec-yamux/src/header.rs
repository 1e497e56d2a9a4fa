//! Yamux version-0 wire header (spec.md §4.6): 12 bytes,
//! `version:u8 | type:u8 | flags:u16be | stream_id:u32be | length:u32be`.

use flowersec_util::beio;

use crate::error::{YamuxError, YamuxResult};

pub const HEADER_LEN: usize = 1 + 1 + 2 + 4 + 4;
pub const VERSION: u8 = 0;

pub mod frame_type {
    pub const DATA: u8 = 0;
    pub const WINDOW_UPDATE: u8 = 1;
    pub const PING: u8 = 2;
    pub const GO_AWAY: u8 = 3;
}

pub mod flags {
    pub const SYN: u16 = 1;
    pub const ACK: u16 = 2;
    pub const FIN: u16 = 4;
    pub const RST: u16 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub frame_type: u8,
    pub flags: u16,
    pub stream_id: u32,
    pub length: u32,
}

impl Header {
    pub fn new(frame_type: u8, flags: u16, stream_id: u32, length: u32) -> Self {
        Self { frame_type, flags, stream_id, length }
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = VERSION;
        out[1] = self.frame_type;
        out[2..4].copy_from_slice(&self.flags.to_be_bytes());
        out[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> YamuxResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(YamuxError::MalformedHeader("short header"));
        }
        let version = beio::read_u8(data, 0).ok_or(YamuxError::MalformedHeader("missing version"))?;
        if version != VERSION {
            return Err(YamuxError::MalformedHeader("unsupported yamux version"));
        }
        let frame_type = beio::read_u8(data, 1).ok_or(YamuxError::MalformedHeader("missing type"))?;
        let flags = beio::read_u16_be(data, 2).ok_or(YamuxError::MalformedHeader("missing flags"))?;
        let stream_id = beio::read_u32_be(data, 4).ok_or(YamuxError::MalformedHeader("missing stream_id"))?;
        let length = beio::read_u32_be(data, 8).ok_or(YamuxError::MalformedHeader("missing length"))?;
        Ok(Self { frame_type, flags, stream_id, length })
    }
}
