//! Server-side read loop: dispatches each inbound request/notification to
//! the [`Router`] and writes the matching response, concurrently across
//! in-flight calls (spec.md §4.7).

use std::sync::Arc;

use flowersec_observer::{Direction, ObserverHandle, RpcObserver, ServerRequestResult};
use flowersec_util::Cancellation;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;

use crate::envelope::{Envelope, read_json_frame, write_json_frame};
use crate::router::{HandlerError, RpcContext, Router};

/// Read envelopes from `reader` until the peer disconnects, closes, or
/// `cancel` fires. Each request is dispatched concurrently; responses are
/// serialized onto `writer` through a shared lock.
pub async fn run_server<R, W>(
    mut reader: R,
    writer: W,
    router: Arc<Router>,
    max_frame_bytes: usize,
    observer: ObserverHandle<dyn RpcObserver>,
    cancel: Cancellation,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(AsyncMutex::new(writer));
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_json_frame::<_, Envelope>(&mut reader, max_frame_bytes) => frame,
        };
        match envelope {
            Ok(envelope) if envelope.is_request() => {
                tokio::spawn(handle_request(
                    envelope,
                    router.clone(),
                    writer.clone(),
                    max_frame_bytes,
                    observer.clone(),
                    cancel.clone(),
                ));
            }
            Ok(envelope) if envelope.is_notification() => {
                tokio::spawn(handle_notification(envelope, router.clone()));
            }
            Ok(envelope) => {
                tracing::warn!(type_id = envelope.type_id, "rpc server received an unexpected response envelope");
            }
            Err(err) => {
                tracing::warn!(error = %err, "rpc server transport read failed");
                observer.get().server_frame_error(Direction::Read);
                break;
            }
        }
    }
}

async fn handle_request<W>(
    envelope: Envelope,
    router: Arc<Router>,
    writer: Arc<AsyncMutex<W>>,
    max_frame_bytes: usize,
    observer: ObserverHandle<dyn RpcObserver>,
    cancel: Cancellation,
) where
    W: AsyncWrite + Unpin,
{
    let type_id = envelope.type_id;
    let request_id = envelope.request_id;

    let outcome = match router.get(type_id) {
        None => Some((Value::Null, Some(crate::envelope::ErrorPayload::handler_not_found()), ServerRequestResult::HandlerNotFound)),
        Some(handler) => {
            let ctx = RpcContext { cancel: cancel.clone() };
            tokio::select! {
                _ = cancel.cancelled() => None,
                result = handler(envelope.payload, ctx) => Some(match result {
                    Ok(value) => (value, None, ServerRequestResult::Ok),
                    Err(HandlerError::Rpc(payload)) => (Value::Null, Some(payload), ServerRequestResult::RpcError),
                    Err(other @ HandlerError::Other(_)) => (Value::Null, Some(other.into_payload()), ServerRequestResult::RpcError),
                }),
            }
        }
    };

    let Some((payload, error, result)) = outcome else {
        observer.get().server_request(ServerRequestResult::Canceled);
        return;
    };

    let response = Envelope::response(type_id, request_id, payload, error);
    let write_result = {
        let mut guard = writer.lock().await;
        write_json_frame(&mut *guard, &response, max_frame_bytes).await
    };
    if write_result.is_err() {
        observer.get().server_frame_error(Direction::Write);
    }
    observer.get().server_request(result);
}

async fn handle_notification(envelope: Envelope, router: Arc<Router>) {
    let Some(handler) = router.get(envelope.type_id) else {
        tracing::debug!(type_id = envelope.type_id, "dropping notification: no registered handler");
        return;
    };
    let ctx = RpcContext { cancel: Cancellation::new() };
    if let Err(err) = handler(envelope.payload, ctx).await {
        let payload = err.into_payload();
        tracing::debug!(type_id = envelope.type_id, code = payload.code, "notification handler returned an error");
    }
}
