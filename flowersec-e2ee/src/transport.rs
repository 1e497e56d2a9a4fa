//! Transport-agnostic binary frame exchange (spec.md §4.4: "any binary frame
//! transport"). Grounded in `sandbox_fc::overlay::pool::OverlayCreator`'s
//! trait-for-testability shape; `WebSocketFrameTransport` adapts a
//! `tokio-tungstenite` stream the way `ably_subscriber::connection` splits
//! its WebSocket into read/write halves.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::{E2eeError, E2eeResult};

/// Exchange of opaque byte blobs, one message per call. Implemented by
/// anything that can carry the handshake and record frames: a WebSocket, a
/// yamux stream, or an in-memory duplex for tests.
#[async_trait]
pub trait BinaryFrameTransport: Send + Sync {
    async fn send_frame(&mut self, frame: &[u8]) -> E2eeResult<()>;
    async fn recv_frame(&mut self) -> E2eeResult<Vec<u8>>;
}

/// Adapts a split `tokio-tungstenite` WebSocket stream, mapping `Binary`
/// frames to opaque blobs and rejecting anything else.
pub struct WebSocketFrameTransport<S> {
    inner: S,
}

impl<S> WebSocketFrameTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> BinaryFrameTransport for WebSocketFrameTransport<S>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send
        + Sync,
{
    async fn send_frame(&mut self, frame: &[u8]) -> E2eeResult<()> {
        self.inner
            .send(Message::Binary(frame.to_vec().into()))
            .await
            .map_err(|e| E2eeError::Transport(std::io::Error::other(e)))
    }

    async fn recv_frame(&mut self) -> E2eeResult<Vec<u8>> {
        loop {
            let msg = self
                .inner
                .next()
                .await
                .ok_or_else(|| E2eeError::Transport(std::io::Error::other("transport closed")))?
                .map_err(|e| E2eeError::Transport(std::io::Error::other(e)))?;
            match msg {
                Message::Binary(bytes) => return Ok(bytes.to_vec()),
                Message::Close(_) => {
                    return Err(E2eeError::Transport(std::io::Error::other("peer closed")));
                }
                _ => continue, // non-binary control frames are not protocol violations here
            }
        }
    }
}

/// An in-memory transport pairing two ends via bounded channels, for
/// handshake/record-layer tests that don't need a real socket.
pub struct ChannelTransport {
    tx: tokio::sync::mpsc::Sender<Vec<u8>>,
    rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = tokio::sync::mpsc::channel(16);
        let (tx_b, rx_a) = tokio::sync::mpsc::channel(16);
        (Self { tx: tx_a, rx: rx_a }, Self { tx: tx_b, rx: rx_b })
    }
}

#[async_trait]
impl BinaryFrameTransport for ChannelTransport {
    async fn send_frame(&mut self, frame: &[u8]) -> E2eeResult<()> {
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| E2eeError::Transport(std::io::Error::other("peer dropped")))
    }

    async fn recv_frame(&mut self) -> E2eeResult<Vec<u8>> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| E2eeError::Transport(std::io::Error::other("peer dropped")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_transport_round_trips() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.send_frame(b"hello").await.unwrap();
        assert_eq!(b.recv_frame().await.unwrap(), b"hello");
        b.send_frame(b"world").await.unwrap();
        assert_eq!(a.recv_frame().await.unwrap(), b"world");
    }
}
