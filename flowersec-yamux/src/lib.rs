//! Version-0 yamux-compatible stream multiplexer (spec.md §4.6).

pub mod error;
pub mod header;
pub mod session;
pub mod stream;

pub use error::{YamuxError, YamuxResult};
pub use header::Header;
pub use session::Session;
pub use stream::{DEFAULT_WINDOW, Stream, StreamState};
