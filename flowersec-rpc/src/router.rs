//! Server-side `type_id -> handler` dispatch table (spec.md §4.7).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use flowersec_util::Cancellation;
use serde_json::Value;

use crate::envelope::ErrorPayload;

/// Per-call context handed to a registered handler.
#[derive(Clone)]
pub struct RpcContext {
    pub cancel: Cancellation,
}

/// A handler's failure: either a deliberate rpc-level error the caller
/// should see verbatim, or an opaque failure normalized to `code=500`
/// before it reaches the wire (spec.md §4.7).
pub enum HandlerError {
    Rpc(ErrorPayload),
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn into_payload(self) -> ErrorPayload {
        match self {
            HandlerError::Rpc(payload) => payload,
            HandlerError::Other(_) => ErrorPayload::internal(),
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;
type DynHandler = Arc<dyn Fn(Value, RpcContext) -> HandlerFuture + Send + Sync>;

/// `type_id -> handler` dispatch table, shared between the server's reader
/// task and any number of concurrently-dispatched request handlers.
#[derive(Default)]
pub struct Router {
    handlers: StdMutex<HashMap<u32, DynHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, type_id: u32, handler: F)
    where
        F: Fn(Value, RpcContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let boxed: DynHandler = Arc::new(move |payload, ctx| Box::pin(handler(payload, ctx)));
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).insert(type_id, boxed);
    }

    pub(crate) fn get(&self, type_id: u32) -> Option<DynHandler> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).get(&type_id).cloned()
    }
}
