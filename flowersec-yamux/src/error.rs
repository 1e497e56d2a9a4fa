use thiserror::Error;

#[derive(Debug, Error)]
pub enum YamuxError {
    #[error("malformed yamux header: {0}")]
    MalformedHeader(&'static str),
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),
    #[error("stream {0} is not open")]
    UnknownStream(u32),
    #[error("stream {0} already exists")]
    DuplicateStream(u32),
    #[error("stream {0} recv window exceeded")]
    WindowExceeded(u32),
    #[error("stream {0} was reset by the peer")]
    Reset(u32),
    #[error("session received GO_AWAY")]
    GoneAway,
    #[error("session is closed")]
    SessionClosed,
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

pub type YamuxResult<T> = Result<T, YamuxError>;
