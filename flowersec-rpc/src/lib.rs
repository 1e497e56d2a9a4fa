//! Length-prefixed JSON envelope, request/response/notification framing,
//! client call dispatch, and server-side routing for the Flowersec RPC
//! layer (spec.md §4.7).

pub mod client;
pub mod envelope;
pub mod error;
pub mod hello;
pub mod router;
pub mod server;

pub use client::{Client, DEFAULT_SUBSCRIBER_BUFFER};
pub use envelope::{
    DEFAULT_MAX_FRAME_BYTES, Envelope, ErrorPayload, normalize_max_frame_bytes, read_json_frame, write_json_frame,
};
pub use error::{RpcError, RpcResult};
pub use hello::{HELLO_VERSION, StreamHello, read_stream_hello, write_stream_hello};
pub use router::{HandlerError, HandlerFuture, RpcContext, Router};
pub use server::run_server;
