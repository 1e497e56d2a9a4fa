//! End-to-end encrypted transport: PSK+ECDH handshake (spec.md §4.4) and
//! AES-256-GCM record layer (spec.md §4.5) atop any binary frame transport.

pub mod ecdh;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod keys;
pub mod record;
pub mod suite;
pub mod transcript;
pub mod transport;

pub use error::{E2eeError, E2eeResult};
pub use handshake::{
    ClientHandshakeParams, ServerHandshakeCache, ServerHandshakeParams, run_client_handshake,
    run_server_handshake,
};
pub use keys::HandshakeKeys;
pub use record::{RecordFlag, SecureChannel};
pub use suite::Suite;
pub use transport::{BinaryFrameTransport, ChannelTransport, WebSocketFrameTransport};
