//! # Filegate Protocol Library
//!
//! Wire-level definitions shared between the Filegate daemon and its clients.
//!
//! ## Overview
//!
//! - **Message Definitions**: request/response types for every file operation
//! - **Access Claims**: the payload of the signed tokens that scope a request
//!   to a subset of directories
//! - **Size Formats**: quota size strings (`"10GB"`) and human-readable byte
//!   formatting used in user-facing errors
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Message};
//! use protocol::messages::ListRequest;
//!
//! let message = Message::ListRequest(ListRequest {
//!     path: "/documents".to_string(),
//!     include_hidden: false,
//! });
//! let envelope = Envelope::new(1, message).with_bearer("header.payload.signature");
//!
//! let bytes = envelope.to_msgpack().unwrap();
//! let decoded = Envelope::decode(&bytes).unwrap();
//! assert_eq!(decoded, envelope);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Protocol message definitions
//! - [`claims`]: Access token payload
//! - [`size`]: Size parsing and formatting
//! - [`error`]: Error types

pub mod claims;
pub mod error;
pub mod messages;
pub mod size;

pub use claims::{AccessClaims, DirectoryClaim};
pub use error::{ProtocolError, Result};
pub use messages::{
    Envelope, ErrorCode, ErrorMessage, FileRecord, FileStat, Message, PlatformStat, QuotaInfo,
    PROTOCOL_VERSION,
};
pub use size::{format_size, parse_size};
