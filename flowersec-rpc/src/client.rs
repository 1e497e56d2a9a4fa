//! RPC client: call dispatch over a pending-request map plus a background
//! read loop that routes responses back to their caller and fans out
//! server-sent notifications to subscribers.
//!
//! The read-loop/fan-out shape is grounded in `ably_subscriber::connection`'s
//! event loop: a single task owns the read half, and notification delivery
//! uses `try_send` so a slow or gone subscriber never blocks the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use flowersec_observer::{ClientCallResult, Direction, ObserverHandle, RpcObserver};
use flowersec_util::{Cancellation, with_deadline};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::envelope::{Envelope, read_json_frame, write_json_frame};
use crate::error::{RpcError, RpcResult};

/// Default bound on a per-`subscribe` notification channel.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

struct ClientInner<W> {
    writer: AsyncMutex<W>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<RpcResult<Value>>>>,
    subscribers: StdMutex<HashMap<u32, Vec<mpsc::Sender<Value>>>>,
    next_request_id: AtomicU64,
    max_frame_bytes: usize,
    observer: ObserverHandle<dyn RpcObserver>,
    closed: AtomicBool,
}

pub struct Client<W> {
    inner: Arc<ClientInner<W>>,
    reader_task: JoinHandle<()>,
}

impl<W> Client<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new<R>(reader: R, writer: W, max_frame_bytes: usize, observer: ObserverHandle<dyn RpcObserver>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let inner = Arc::new(ClientInner {
            writer: AsyncMutex::new(writer),
            pending: StdMutex::new(HashMap::new()),
            subscribers: StdMutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            max_frame_bytes,
            observer,
            closed: AtomicBool::new(false),
        });
        let reader_task = tokio::spawn(run_client_reader(inner.clone(), reader));
        Self { inner, reader_task }
    }

    /// Issue a request and await its matching response, or `Canceled` if
    /// `deadline` elapses or `cancel` fires first.
    pub async fn call(
        &self,
        type_id: u32,
        payload: Value,
        deadline: Duration,
        cancel: &Cancellation,
    ) -> RpcResult<Value> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RpcError::NotConnected);
        }
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner()).insert(request_id, tx);

        let start = Instant::now();
        let envelope = Envelope::request(type_id, request_id, payload);
        if let Err(err) = write_json_frame(
            &mut *self.inner.writer.lock().await,
            &envelope,
            self.inner.max_frame_bytes,
        )
        .await
        {
            self.inner.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&request_id);
            self.inner.observer.get().client_call(ClientCallResult::TransportError, start.elapsed());
            return Err(err);
        }

        match with_deadline(deadline, cancel, rx).await {
            Err(_deadline_exceeded) => {
                self.inner.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&request_id);
                self.inner.observer.get().client_call(ClientCallResult::Canceled, start.elapsed());
                Err(RpcError::Canceled)
            }
            Ok(Err(_recv_dropped)) => {
                self.inner.observer.get().client_call(ClientCallResult::TransportError, start.elapsed());
                Err(RpcError::NotConnected)
            }
            Ok(Ok(Ok(value))) => {
                self.inner.observer.get().client_call(ClientCallResult::Ok, start.elapsed());
                Ok(value)
            }
            Ok(Ok(Err(remote_err))) => {
                self.inner.observer.get().client_call(ClientCallResult::RpcError, start.elapsed());
                Err(remote_err)
            }
        }
    }

    /// Send a fire-and-forget notification (`request_id == 0 && response_to == 0`).
    pub async fn notify(&self, type_id: u32, payload: Value) -> RpcResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RpcError::NotConnected);
        }
        let envelope = Envelope::notification(type_id, payload);
        write_json_frame(&mut *self.inner.writer.lock().await, &envelope, self.inner.max_frame_bytes).await?;
        self.inner.observer.get().client_notify();
        Ok(())
    }

    /// Register interest in server-sent notifications for `type_id`.
    pub fn subscribe(&self, type_id: u32) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(DEFAULT_SUBSCRIBER_BUFFER);
        self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).entry(type_id).or_default().push(tx);
        rx
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl<W> Drop for Client<W> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn run_client_reader<R, W>(inner: Arc<ClientInner<W>>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_json_frame::<_, Envelope>(&mut reader, inner.max_frame_bytes).await {
            Ok(envelope) if envelope.is_response() => {
                let slot = inner.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&envelope.response_to);
                if let Some(tx) = slot {
                    let result = match envelope.error {
                        Some(err) => Err(RpcError::Remote { code: err.code, message: err.message.unwrap_or_default() }),
                        None => Ok(envelope.payload),
                    };
                    // Dropping `tx` silently is fine: the caller already gave
                    // up (timeout/cancel) and released its slot.
                    let _ = tx.send(result);
                }
            }
            Ok(envelope) if envelope.is_notification() => {
                dispatch_notification(&inner, envelope.type_id, envelope.payload);
            }
            Ok(envelope) => {
                tracing::warn!(type_id = envelope.type_id, "rpc client received an unexpected request envelope");
            }
            Err(err) => {
                tracing::warn!(error = %err, "rpc client transport read failed");
                inner.observer.get().client_frame_error(Direction::Read);
                break;
            }
        }
    }
    inner.closed.store(true, Ordering::SeqCst);
    let pending: Vec<_> = inner.pending.lock().unwrap_or_else(|e| e.into_inner()).drain().collect();
    for (_, tx) in pending {
        let _ = tx.send(Err(RpcError::NotConnected));
    }
}

fn dispatch_notification<W>(inner: &Arc<ClientInner<W>>, type_id: u32, payload: Value) {
    let senders = inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).get(&type_id).cloned();
    let Some(senders) = senders else { return };
    for tx in senders {
        if tx.try_send(payload.clone()).is_err() {
            tracing::debug!(type_id, "dropping notification: subscriber channel full or gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hello::{read_stream_hello, write_stream_hello};
    use flowersec_observer::NoopRpcObserver;
    use tokio::io::duplex;

    fn observer() -> ObserverHandle<dyn RpcObserver> {
        ObserverHandle::new(Arc::new(NoopRpcObserver))
    }

    #[tokio::test]
    async fn call_receives_its_matching_response() {
        let (client_io, mut server_io) = duplex(4096);
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let client = Client::new(client_reader, client_writer, 0, observer());

        tokio::spawn(async move {
            let request: Envelope = read_json_frame(&mut server_io, 0).await.unwrap();
            assert_eq!(request.type_id, 7);
            let response = Envelope::response(7, request.request_id, serde_json::json!({"ok": true}), None);
            write_json_frame(&mut server_io, &response, 0).await.unwrap();
        });

        let cancel = Cancellation::new();
        let result = client
            .call(7, serde_json::json!({"x": 1}), Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn remote_error_surfaces_as_rpc_error_remote() {
        let (client_io, mut server_io) = duplex(4096);
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let client = Client::new(client_reader, client_writer, 0, observer());

        tokio::spawn(async move {
            let request: Envelope = read_json_frame(&mut server_io, 0).await.unwrap();
            let response = Envelope::response(
                request.type_id,
                request.request_id,
                Value::Null,
                Some(crate::envelope::ErrorPayload::handler_not_found()),
            );
            write_json_frame(&mut server_io, &response, 0).await.unwrap();
        });

        let cancel = Cancellation::new();
        let err = client.call(9, Value::Null, Duration::from_secs(1), &cancel).await.unwrap_err();
        assert!(matches!(err, RpcError::Remote { code: 404, .. }));
    }

    #[tokio::test]
    async fn canceled_call_releases_its_pending_slot() {
        let (client_io, server_io) = duplex(4096);
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let client = Client::new(client_reader, client_writer, 0, observer());

        let cancel = Cancellation::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let err = client.call(1, Value::Null, Duration::from_secs(5), &cancel).await.unwrap_err();
        assert!(matches!(err, RpcError::Canceled));
        assert!(client.inner.pending.lock().unwrap().is_empty());
        drop(server_io);
    }

    #[tokio::test]
    async fn subscriber_receives_server_sent_notifications() {
        let (client_io, mut server_io) = duplex(4096);
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let client = Client::new(client_reader, client_writer, 0, observer());
        let mut rx = client.subscribe(42);

        write_json_frame(&mut server_io, &Envelope::notification(42, serde_json::json!("hi")), 0)
            .await
            .unwrap();

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload, serde_json::json!("hi"));
    }

    #[tokio::test]
    async fn transport_close_rejects_all_pending_calls() {
        let (client_io, server_io) = duplex(4096);
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let client = Arc::new(Client::new(client_reader, client_writer, 0, observer()));

        let caller = {
            let client = client.clone();
            tokio::spawn(async move {
                let cancel = Cancellation::new();
                client.call(1, Value::Null, Duration::from_secs(5), &cancel).await
            })
        };

        tokio::task::yield_now().await;
        drop(server_io);

        let result = caller.await.unwrap();
        assert!(matches!(result, Err(RpcError::NotConnected)));
    }

    #[tokio::test]
    async fn stream_hello_precedes_envelope_traffic_on_the_wire() {
        let (mut a, mut b) = duplex(4096);
        write_stream_hello(&mut a, "rpc", 0).await.unwrap();
        let hello = read_stream_hello(&mut b, 0).await.unwrap();
        assert_eq!(hello.kind, "rpc");
    }
}
