//! Ed25519 attach-token signing/verification and keyset file I/O (spec.md §4.1).

mod error;
mod keyset;
mod payload;
mod sign;

pub use error::{TokenError, TokenResult};
pub use keyset::{Keyset, KeysetFile, PrivateKeyFile, PublicKeyEntry};
pub use payload::{Role, TokenPayload};
pub use sign::{VerifyOptions, sign_token, verify_token};
