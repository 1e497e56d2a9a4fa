//! Yamux session: stream table, serialized writer, and the background
//! reader task (spec.md §4.6) — grounded in
//! `ably_subscriber::connection::run_event_loop`'s single-reader-task shape,
//! generalized from a WebSocket-specific event loop to a generic
//! `AsyncRead`/`AsyncWrite` transport and a stream map instead of a single
//! connection's channel fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio::task::JoinHandle;

use crate::error::{YamuxError, YamuxResult};
use crate::header::{Header, flags, frame_type};
use crate::stream::{DEFAULT_WINDOW, Stream, StreamState};

struct Inner<W> {
    writer: AsyncMutex<W>,
    streams: std::sync::Mutex<HashMap<u32, Arc<Stream>>>,
    next_id: AtomicU32,
    max_window: u32,
    go_away: Notify,
    gone_away: std::sync::atomic::AtomicBool,
}

impl<W> Inner<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_frame(&self, header: Header, payload: &[u8]) -> YamuxResult<()> {
        let mut w = self.writer.lock().await;
        w.write_all(&header.encode()).await?;
        if !payload.is_empty() {
            w.write_all(payload).await?;
        }
        w.flush().await?;
        Ok(())
    }

    fn streams(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<Stream>>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A multiplexed session over one underlying duplex transport.
pub struct Session<W> {
    inner: Arc<Inner<W>>,
    accept_rx: AsyncMutex<mpsc::Receiver<Arc<Stream>>>,
    reader_task: JoinHandle<()>,
}

impl<W> Session<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Start a session. `is_client` selects the stream id parity (odd
    /// starting at 1 for clients, even starting at 2 for servers, per
    /// spec.md §4.6).
    pub fn new<R>(reader: R, writer: W, is_client: bool, max_window: u32) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (accept_tx, accept_rx) = mpsc::channel(64);
        let inner = Arc::new(Inner {
            writer: AsyncMutex::new(writer),
            streams: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(if is_client { 1 } else { 2 }),
            max_window,
            go_away: Notify::new(),
            gone_away: std::sync::atomic::AtomicBool::new(false),
        });

        let reader_task = tokio::spawn(run_reader(reader, Arc::clone(&inner), accept_tx));

        Self { inner, accept_rx: AsyncMutex::new(accept_rx), reader_task }
    }

    pub fn with_default_window<R>(reader: R, writer: W, is_client: bool) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::new(reader, writer, is_client, DEFAULT_WINDOW)
    }

    /// Open a new outbound stream: sends `WINDOW_UPDATE(SYN)` and waits for
    /// the peer's ACK.
    pub async fn open_stream(&self) -> YamuxResult<Arc<Stream>> {
        if self.inner.gone_away.load(Ordering::SeqCst) {
            return Err(YamuxError::GoneAway);
        }
        let id = self.inner.next_id.fetch_add(2, Ordering::SeqCst);
        let stream = Arc::new(Stream::new(id, StreamState::SynSent, self.inner.max_window));
        self.inner.streams().insert(id, Arc::clone(&stream));

        self.inner.write_frame(Header::new(frame_type::WINDOW_UPDATE, flags::SYN, id, 0), &[]).await?;

        loop {
            if stream.state() == StreamState::Established {
                return Ok(stream);
            }
            if matches!(stream.state(), StreamState::Reset | StreamState::Closed) {
                return Err(YamuxError::Reset(id));
            }
            stream.state_notify.notified().await;
        }
    }

    /// Accept the next inbound stream, already established (ACK sent).
    pub async fn accept(&self) -> Option<Arc<Stream>> {
        self.accept_rx.lock().await.recv().await
    }

    /// Write application data to `stream`, chunked against its send window.
    pub async fn write(&self, stream: &Stream, mut data: &[u8]) -> YamuxResult<()> {
        while !data.is_empty() {
            let grant = stream.reserve_send_window(data.len() as u32).await;
            let grant = grant.max(1).min(data.len() as u32) as usize;
            let (chunk, rest) = data.split_at(grant);
            self.inner.write_frame(Header::new(frame_type::DATA, 0, stream.id, chunk.len() as u32), chunk).await?;
            data = rest;
        }
        Ok(())
    }

    /// Read one buffered chunk for `stream`, waiting for data, FIN, or RST.
    pub async fn read(&self, stream: &Stream) -> YamuxResult<Option<Vec<u8>>> {
        loop {
            if let Some(chunk) = stream.try_read() {
                if let Some(delta) = stream.consume_and_maybe_grant(chunk.len() as u32) {
                    self.inner
                        .write_frame(Header::new(frame_type::WINDOW_UPDATE, 0, stream.id, delta), &[])
                        .await?;
                }
                return Ok(Some(chunk));
            }
            if stream.is_reset() {
                return Err(YamuxError::Reset(stream.id));
            }
            if stream.is_eof() {
                return Ok(None);
            }
            stream.recv_notify.notified().await;
        }
    }

    /// Half-close `stream`: send `WINDOW_UPDATE(FIN)`.
    pub async fn close_stream(&self, stream: &Stream) -> YamuxResult<()> {
        self.inner.write_frame(Header::new(frame_type::WINDOW_UPDATE, flags::FIN, stream.id, 0), &[]).await?;
        let next = match stream.state() {
            StreamState::Established => StreamState::LocalClose,
            StreamState::RemoteClose => StreamState::Closed,
            other => other,
        };
        stream.set_state(next);
        Ok(())
    }

    /// Reset `stream`: send `WINDOW_UPDATE(RST)` and mark it terminally errored locally.
    pub async fn reset_stream(&self, stream: &Stream) -> YamuxResult<()> {
        self.inner.write_frame(Header::new(frame_type::WINDOW_UPDATE, flags::RST, stream.id, 0), &[]).await?;
        stream.on_reset();
        Ok(())
    }

    /// Session-level PING: send PING+SYN and let the reader loop observe the echo.
    pub async fn ping(&self, opaque: u32) -> YamuxResult<()> {
        self.inner.write_frame(Header::new(frame_type::PING, flags::SYN, 0, opaque), &[]).await
    }

    /// Terminate the session: send GO_AWAY and stop the reader task.
    pub async fn close(&self) -> YamuxResult<()> {
        let result = self.inner.write_frame(Header::new(frame_type::GO_AWAY, 0, 0, 0), &[]).await;
        self.inner.gone_away.store(true, Ordering::SeqCst);
        self.inner.go_away.notify_waiters();
        self.reader_task.abort();
        result
    }
}

/// Largest DATA frame this reader accepts before refusing to allocate for
/// an attacker-controlled length field.
const MAX_DATA_FRAME: u32 = 16 * 1024 * 1024;

async fn run_reader<R, W>(mut reader: R, inner: Arc<Inner<W>>, accept_tx: mpsc::Sender<Arc<Stream>>)
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut header_buf = [0u8; crate::header::HEADER_LEN];
    loop {
        if reader.read_exact(&mut header_buf).await.is_err() {
            tracing::debug!("yamux session transport closed");
            return;
        }
        let header = match Header::decode(&header_buf) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("malformed yamux header, terminating session: {e}");
                return;
            }
        };

        let mut payload = Vec::new();
        if header.frame_type == frame_type::DATA {
            if header.length > MAX_DATA_FRAME {
                tracing::warn!(length = header.length, "yamux DATA frame exceeds max size, terminating session");
                return;
            }
            payload = vec![0u8; header.length as usize];
            if !payload.is_empty() && reader.read_exact(&mut payload).await.is_err() {
                tracing::warn!("yamux session transport closed mid-frame");
                return;
            }
        }

        match header.frame_type {
            frame_type::DATA => {
                if let Err(e) = dispatch_data(&inner, &accept_tx, header, payload).await {
                    tracing::warn!("yamux data dispatch error: {e}");
                }
            }
            frame_type::WINDOW_UPDATE => {
                dispatch_window_update(&inner, &accept_tx, header).await;
            }
            frame_type::PING => {
                if header.has_flag(flags::SYN) {
                    let _ = inner.write_frame(Header::new(frame_type::PING, flags::ACK, 0, header.length), &[]).await;
                }
            }
            frame_type::GO_AWAY => {
                inner.gone_away.store(true, Ordering::SeqCst);
                inner.go_away.notify_waiters();
                for (_, stream) in inner.streams().iter() {
                    stream.on_reset();
                }
                return;
            }
            other => {
                tracing::warn!("unknown yamux frame type {other}, terminating session");
                return;
            }
        }
    }
}

async fn dispatch_data<W>(
    inner: &Arc<Inner<W>>,
    accept_tx: &mpsc::Sender<Arc<Stream>>,
    header: Header,
    payload: Vec<u8>,
) -> YamuxResult<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let stream = get_or_create_inbound(inner, accept_tx, &header).await;
    let stream = match stream {
        Some(s) => s,
        None => return Ok(()),
    };
    if header.has_flag(flags::RST) {
        stream.on_reset();
        return Ok(());
    }
    if let Err(e) = stream.on_data(payload) {
        let _ = inner.write_frame(Header::new(frame_type::WINDOW_UPDATE, flags::RST, header.stream_id, 0), &[]).await;
        stream.on_reset();
        return Err(e);
    }
    if header.has_flag(flags::FIN) {
        stream.on_fin();
    }
    Ok(())
}

async fn dispatch_window_update<W>(inner: &Arc<Inner<W>>, accept_tx: &mpsc::Sender<Arc<Stream>>, header: Header)
where
    W: AsyncWrite + Unpin + Send,
{
    if header.has_flag(flags::RST) {
        if let Some(stream) = inner.streams().get(&header.stream_id).cloned() {
            stream.on_reset();
        }
        return;
    }

    let stream = match get_or_create_inbound(inner, accept_tx, &header).await {
        Some(s) => s,
        None => return,
    };

    if header.has_flag(flags::ACK) {
        stream.on_ack();
    }
    if header.length > 0 {
        stream.credit_send_window(header.length);
    }
    if header.has_flag(flags::FIN) {
        stream.on_fin();
    }
}

/// Resolve `header.stream_id` to an existing stream, or — if the frame
/// carries SYN and the stream is unknown — create it in `SynReceived`,
/// register it for `accept()`, and immediately echo an ACK (spec.md §4.6:
/// "implicitly acknowledges with the next outbound frame").
async fn get_or_create_inbound<W>(
    inner: &Arc<Inner<W>>,
    accept_tx: &mpsc::Sender<Arc<Stream>>,
    header: &Header,
) -> Option<Arc<Stream>>
where
    W: AsyncWrite + Unpin + Send,
{
    if let Some(stream) = inner.streams().get(&header.stream_id).cloned() {
        return Some(stream);
    }
    if !header.has_flag(flags::SYN) {
        tracing::warn!(stream_id = header.stream_id, "frame for unknown stream, dropping");
        return None;
    }
    let stream = Arc::new(Stream::new(header.stream_id, StreamState::SynReceived, inner.max_window));
    inner.streams().insert(header.stream_id, Arc::clone(&stream));
    if inner
        .write_frame(Header::new(frame_type::WINDOW_UPDATE, flags::ACK, header.stream_id, 0), &[])
        .await
        .is_ok()
    {
        stream.set_state(StreamState::Established);
    }
    let _ = accept_tx.send(Arc::clone(&stream)).await;
    Some(stream)
}
