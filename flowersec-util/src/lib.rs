//! Shared primitives for the Flowersec protocol stack.
//!
//! Every leaf crate in this workspace (`flowersec-token`, `flowersec-e2ee`,
//! `flowersec-yamux`, `flowersec-rpc`, `flowersec-channelinit`,
//! `flowersec-tunnel`) depends on this crate for wire I/O, key derivation,
//! cancellation, and constant-time comparison. Each crate keeps its own
//! `thiserror` enum for its public API rather than converting into a shared
//! error type: `path`/`stage` are properties of the call site composing
//! these crates, not of the leaf error itself, so no single conversion
//! would be correct for every caller.

pub mod b64u;
pub mod beio;
pub mod ct;
pub mod deadline;
pub mod kdf;

pub use ct::{ct_eq, ct_eq_str};
pub use deadline::{Cancellation, DeadlineExceeded, with_deadline};
pub use kdf::{Prk, hkdf_expand};
