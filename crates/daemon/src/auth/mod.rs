//! Bearer token validation for tenant-scoped requests.
//!
//! A request that carries a token only ever sees the directories the token
//! grants. Any validation failure ends the request.

pub mod error;
pub mod token;

pub use error::AuthError;
pub use token::{bearer_token, encode_token, TokenGrant, TokenValidator, MIN_SECRET_LEN};
