//! Stream-hello record (spec.md §4.7): the first framed record written on
//! every yamux stream, identifying what the stream carries before any
//! envelope traffic flows.

use serde::{Deserialize, Serialize};

use crate::envelope::{read_json_frame, write_json_frame};
use crate::error::RpcResult;

pub const HELLO_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHello {
    pub kind: String,
    pub v: u8,
}

impl StreamHello {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), v: HELLO_VERSION }
    }
}

pub async fn write_stream_hello<W>(writer: &mut W, kind: &str, max_frame_bytes: usize) -> RpcResult<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    write_json_frame(writer, &StreamHello::new(kind), max_frame_bytes).await
}

pub async fn read_stream_hello<R>(reader: &mut R, max_frame_bytes: usize) -> RpcResult<StreamHello>
where
    R: tokio::io::AsyncRead + Unpin,
{
    read_json_frame(reader, max_frame_bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hello_round_trips_with_version_one() {
        let mut buf = Vec::new();
        write_stream_hello(&mut buf, "rpc", 0).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let hello = read_stream_hello(&mut cursor, 0).await.unwrap();
        assert_eq!(hello.kind, "rpc");
        assert_eq!(hello.v, 1);
    }
}
