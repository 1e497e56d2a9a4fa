use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("frame exceeds max_frame_bytes")]
    FrameTooLarge,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("no handler registered for type_id {0}")]
    HandlerNotFound(u32),
    #[error("call was canceled")]
    Canceled,
    #[error("call timed out")]
    Timeout,
    #[error("client is not connected")]
    NotConnected,
    #[error("peer returned error {code}: {message}")]
    Remote { code: u32, message: String },
}

pub type RpcResult<T> = Result<T, RpcError>;
