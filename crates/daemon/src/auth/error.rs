//! Errors produced while validating access tokens.

use protocol::ErrorCode;
use thiserror::Error;

/// Why a token did not produce a mapping set.
///
/// Every variant is terminal for the request. There is no variant that
/// carries a fallback mapping set.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No authorization header was supplied where one is required.
    #[error("missing authorization")]
    MissingAuth,

    /// The header is not of the form `Bearer <token>`.
    #[error("malformed authorization: {0}")]
    MalformedAuth(String),

    /// Signature, expiry or claim decoding failed.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// A directory entry has a blank `source` or `virtual` field.
    #[error("empty field: directory entry {index} has an empty {field}")]
    EmptyField {
        /// Position of the entry in the token's directory list.
        index: usize,
        /// Name of the blank field.
        field: &'static str,
    },

    /// A directory escapes the base directory or is not a directory.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A granted directory does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl AuthError {
    /// Error code clients branch on.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingAuth => ErrorCode::MissingAuth,
            Self::MalformedAuth(_) => ErrorCode::MalformedAuth,
            Self::InvalidToken(_) => ErrorCode::InvalidToken,
            Self::EmptyField { .. } => ErrorCode::EmptyField,
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::NotFound(_) => ErrorCode::NotFound,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidToken(err.to_string())
    }
}
