use std::time::Duration;

/// Direction a frame-level error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Classification of a server-side request's outcome (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRequestResult {
    Ok,
    RpcError,
    HandlerNotFound,
    TransportError,
    Canceled,
}

/// Classification of a client-side call's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCallResult {
    Ok,
    RpcError,
    TransportError,
    Canceled,
}

/// Every observable event in the JSON-RPC envelope layer (spec.md §4.7
/// "Observer hooks").
pub trait RpcObserver: Send + Sync {
    fn server_request(&self, _result: ServerRequestResult) {}
    fn server_frame_error(&self, _dir: Direction) {}
    fn client_frame_error(&self, _dir: Direction) {}
    fn client_call(&self, _result: ClientCallResult, _duration: Duration) {}
    fn client_notify(&self) {}
}

/// Default observer: every hook is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRpcObserver;

impl RpcObserver for NoopRpcObserver {}
