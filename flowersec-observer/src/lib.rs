//! Observer abstractions (spec.md §4.8): polymorphic metric/event interfaces
//! for the tunnel pairing server and the JSON-RPC layer, each with a no-op
//! default and an atomically swappable handle for runtime instrumentation.

mod handle;
mod rpc;
mod tunnel;

pub use handle::ObserverHandle;
pub use rpc::{ClientCallResult, Direction, NoopRpcObserver, RpcObserver, ServerRequestResult};
pub use tunnel::{AttachResult, NoopTunnelObserver, ReplaceResult, TunnelObserver};
