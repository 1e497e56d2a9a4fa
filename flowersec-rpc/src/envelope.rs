//! Wire envelope and length-prefixed JSON framing (spec.md §4.7):
//! `len:u32be | json_utf8(Envelope)`.
//!
//! This is the same length-prefixing shape `vsock_proto` uses for its
//! binary frames, generalized from a fixed binary header to a JSON body.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RpcError, RpcResult};

/// Default cap on a single frame's JSON body (spec.md §4.7).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// `max_frame_bytes == 0` means "use the default", not "no limit"
/// (spec.md §8).
pub fn normalize_max_frame_bytes(max_frame_bytes: usize) -> usize {
    if max_frame_bytes == 0 { DEFAULT_MAX_FRAME_BYTES } else { max_frame_bytes }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self { code, message: Some(message.into()) }
    }

    pub fn handler_not_found() -> Self {
        Self::new(404, "handler not found")
    }

    pub fn internal() -> Self {
        Self::new(500, "internal error")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub type_id: u32,
    #[serde(default)]
    pub request_id: u64,
    #[serde(default)]
    pub response_to: u64,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorPayload>,
}

impl Envelope {
    pub fn notification(type_id: u32, payload: Value) -> Self {
        Self { type_id, request_id: 0, response_to: 0, payload, error: None }
    }

    pub fn request(type_id: u32, request_id: u64, payload: Value) -> Self {
        Self { type_id, request_id, response_to: 0, payload, error: None }
    }

    pub fn response(type_id: u32, response_to: u64, payload: Value, error: Option<ErrorPayload>) -> Self {
        Self { type_id, request_id: 0, response_to, payload, error }
    }

    /// `request_id == 0 && response_to == 0`.
    pub fn is_notification(&self) -> bool {
        self.request_id == 0 && self.response_to == 0
    }

    /// `request_id > 0 && response_to == 0`.
    pub fn is_request(&self) -> bool {
        self.request_id > 0 && self.response_to == 0
    }

    /// `response_to > 0`.
    pub fn is_response(&self) -> bool {
        self.response_to > 0
    }
}

pub async fn write_json_frame<W, T>(writer: &mut W, value: &T, max_frame_bytes: usize) -> RpcResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    if body.len() > normalize_max_frame_bytes(max_frame_bytes) {
        return Err(RpcError::FrameTooLarge);
    }
    let len = u32::try_from(body.len()).map_err(|_| RpcError::FrameTooLarge)?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_json_frame<R, T>(reader: &mut R, max_frame_bytes: usize) -> RpcResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > normalize_max_frame_bytes(max_frame_bytes) {
        return Err(RpcError::FrameTooLarge);
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}
