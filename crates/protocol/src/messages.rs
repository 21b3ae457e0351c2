//! Protocol message definitions for Filegate.
//!
//! This module defines the request and response types exchanged between
//! clients and the daemon. All messages are serialized using MessagePack.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope wrapper for all protocol messages.
///
/// The envelope provides versioning and sequence numbers for request/response
/// correlation and compatibility checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number used to pair responses with requests.
    pub sequence: u64,
    /// Bearer credential (`"Bearer <token>"`), when the client has one.
    pub authorization: Option<String>,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            authorization: None,
            payload,
        }
    }

    /// Attach a bearer token to the envelope.
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.authorization = Some(format!("Bearer {token}"));
        self
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Requests
    /// List a virtual directory.
    ListRequest(ListRequest),
    /// Stat a single virtual path.
    StatRequest(StatRequest),
    /// Read part of a file.
    ReadRequest(ReadRequest),
    /// Upload a new file into a directory.
    UploadRequest(UploadRequest),
    /// Replace a file's contents.
    WriteRequest(WriteRequest),
    /// Delete a file or directory tree.
    DeleteRequest(DeleteRequest),
    /// Move a file or directory.
    MoveRequest(MoveRequest),
    /// Copy a file or directory.
    CopyRequest(CopyRequest),
    /// Create a directory.
    MkdirRequest(MkdirRequest),
    /// Export paths as a zip archive.
    ExportRequest(ExportRequest),
    /// Fetch the next chunk of a spooled export.
    ExportChunkRequest(ExportChunkRequest),
    /// Report quota usage.
    QuotaRequest(QuotaRequest),

    // Responses
    /// Directory listing.
    ListResponse(ListResponse),
    /// Metadata for one path.
    StatResponse(FileStat),
    /// Chunk of file data.
    ReadResponse(ReadResponse),
    /// A mutating operation finished.
    OperationComplete(OperationComplete),
    /// Chunk of an exported zip archive.
    ExportChunk(ExportChunk),
    /// Quota usage.
    QuotaResponse(QuotaInfo),

    // Control messages
    /// Ping for keepalive.
    Ping(Ping),
    /// Pong response to ping.
    Pong(Pong),
    /// Error message.
    Error(ErrorMessage),
}

// ============================================================================
// Requests
// ============================================================================

/// Request to list a virtual directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Virtual path to list.
    pub path: String,
    /// Include entries whose name starts with a dot.
    pub include_hidden: bool,
}

/// Request for metadata about a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRequest {
    /// Virtual path.
    pub path: String,
}

/// Request to read a chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Virtual path of the file.
    pub path: String,
    /// Starting offset.
    pub offset: u64,
    /// Maximum number of bytes to return.
    pub length: u32,
}

/// Upload a new file into a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Virtual directory receiving the file.
    pub directory: String,
    /// File name (no separators).
    pub filename: String,
    /// File contents.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Write a file's full contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Virtual path of the file.
    pub path: String,
    /// New contents.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Delete a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Virtual path to delete.
    pub path: String,
}

/// Move a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Virtual source path.
    pub source: String,
    /// Virtual destination path.
    pub destination: String,
}

/// Copy a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRequest {
    /// Virtual source path.
    pub source: String,
    /// Virtual destination path.
    pub destination: String,
}

/// Create a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirRequest {
    /// Virtual path of the new directory.
    pub path: String,
}

/// Export a set of paths as a zip archive.
///
/// The archive is built on the daemon and returned in chunks; the reply is
/// the first [`ExportChunk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Virtual paths to include.
    pub paths: Vec<String>,
    /// Maximum chunk size (0 = default).
    pub chunk_size: u32,
}

/// Request a further chunk of an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportChunkRequest {
    /// Export identifier from the first chunk.
    pub export_id: u64,
    /// Starting offset.
    pub offset: u64,
    /// Maximum chunk size (0 = default).
    pub chunk_size: u32,
}

/// Request for quota usage of the active mapping set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaRequest {}

// ============================================================================
// Responses
// ============================================================================

/// Response with directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Path that was listed.
    pub path: String,
    /// Entries in the directory.
    pub entries: Vec<FileRecord>,
}

/// A single file or directory as seen through the virtual namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Entry name (not full path).
    pub name: String,
    /// Full virtual path.
    pub virtual_path: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified: u64,
    /// Unix permission bits.
    pub mode: u32,
    /// Guessed MIME type for files.
    pub mime_type: Option<String>,
}

/// Platform-specific ownership and time fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformStat {
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Hard link count.
    pub nlink: u64,
    /// Last access time (Unix epoch seconds).
    pub accessed: u64,
    /// Last status change time (Unix epoch seconds).
    pub changed: u64,
}

/// Full metadata for a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Common record fields.
    pub record: FileRecord,
    /// Ownership, link count and extra timestamps.
    pub platform: PlatformStat,
}

/// Chunk of file data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// Path being read.
    pub path: String,
    /// Offset of this chunk.
    pub offset: u64,
    /// Total file size.
    pub total_size: u64,
    /// The chunk data.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Whether this chunk reaches the end of the file.
    pub is_last: bool,
}

/// Acknowledges a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationComplete {
    /// Virtual path affected (destination for move/copy).
    pub path: String,
}

/// Chunk of a zip archive produced by an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportChunk {
    /// Identifier for fetching further chunks.
    pub export_id: u64,
    /// Offset of this chunk.
    pub offset: u64,
    /// Total archive size.
    pub total_size: u64,
    /// The chunk data.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Whether this chunk reaches the end of the archive.
    pub is_last: bool,
    /// Number of files written into the archive.
    pub files: u64,
    /// Number of requested paths that were skipped.
    pub skipped: u64,
}

/// Quota usage for the active mapping set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    /// Bytes currently stored.
    pub used: u64,
    /// Configured limit in bytes (0 = unlimited).
    pub limit: u64,
    /// Remaining bytes, or -1 when unlimited.
    pub available: i64,
    /// Whether usage is above the limit.
    pub exceeded: bool,
}

impl QuotaInfo {
    /// Derive the quota state from usage and limit.
    pub fn new(used: u64, limit: u64) -> Self {
        if limit == 0 {
            return Self {
                used,
                limit,
                available: -1,
                exceeded: false,
            };
        }

        let remaining = limit.saturating_sub(used);
        Self {
            used,
            limit,
            available: i64::try_from(remaining).unwrap_or(i64::MAX),
            exceeded: used > limit,
        }
    }
}

// ============================================================================
// Control Messages
// ============================================================================

/// Ping for keepalive and latency measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for latency calculation).
    pub timestamp: u64,
}

/// Pong response to ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Original timestamp from ping.
    pub timestamp: u64,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message, starting with [`ErrorCode::prefix`].
    pub message: String,
    /// Optional context (e.g. the virtual path).
    pub context: Option<String>,
    /// Whether retrying the same request may succeed.
    pub recoverable: bool,
}

/// Error codes clients can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No credential was presented where one is required.
    MissingAuth,
    /// Credential is not in `Bearer <token>` form.
    MalformedAuth,
    /// Bad signature or expired token.
    InvalidToken,
    /// Token directory entry has a blank source or virtual path.
    EmptyField,
    /// Path escapes its owning directory, or is not a directory.
    AccessDenied,
    /// Virtual mapping or physical path is missing.
    NotFound,
    /// Target already exists.
    AlreadyExists,
    /// Operation would exceed the storage quota.
    QuotaExceeded,
    /// Invalid request or parameters.
    InvalidRequest,
    /// Server-side error.
    InternalError,
    /// Protocol version mismatch.
    VersionMismatch,
}

impl ErrorCode {
    /// Stable message prefix for this error kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::MissingAuth => "missing authorization",
            Self::MalformedAuth => "malformed authorization",
            Self::InvalidToken => "invalid token",
            Self::EmptyField => "empty field",
            Self::AccessDenied => "access denied",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::QuotaExceeded => "quota exceeded",
            Self::InvalidRequest => "invalid request",
            Self::InternalError => "internal error",
            Self::VersionMismatch => "version mismatch",
        }
    }
}

// ============================================================================
// Serialization helpers
// ============================================================================

impl Envelope {
    /// Serialize the envelope to MessagePack bytes.
    pub fn to_msgpack(&self) -> std::result::Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> std::result::Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    /// Deserialize an envelope and reject other protocol versions.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope = Self::from_msgpack(bytes)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: envelope.version,
            });
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_msgpack() {
        let envelope = Envelope::new(
            7,
            Message::ListRequest(ListRequest {
                path: "/documents".to_string(),
                include_hidden: false,
            }),
        )
        .with_bearer("abc.def.ghi");

        let bytes = envelope.to_msgpack().expect("serialization failed");
        let decoded = Envelope::decode(&bytes).expect("deserialization failed");
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.authorization.as_deref(), Some("Bearer abc.def.ghi"));
    }

    #[test]
    fn test_decode_rejects_other_version() {
        let mut envelope = Envelope::new(1, Message::QuotaRequest(QuotaRequest {}));
        envelope.version = PROTOCOL_VERSION + 1;
        let bytes = envelope.to_msgpack().unwrap();

        let result = Envelope::decode(&bytes);
        assert!(matches!(
            result,
            Err(ProtocolError::VersionMismatch { expected: PROTOCOL_VERSION, .. })
        ));
    }

    #[test]
    fn test_decode_garbage() {
        let result = Envelope::decode(&[0xc1, 0x00, 0x12]);
        assert!(matches!(result, Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_quota_info_unlimited() {
        let info = QuotaInfo::new(123, 0);
        assert_eq!(info.available, -1);
        assert!(!info.exceeded);
    }

    #[test]
    fn test_quota_info_limited() {
        let info = QuotaInfo::new(400, 1000);
        assert_eq!(info.available, 600);
        assert!(!info.exceeded);

        let over = QuotaInfo::new(1500, 1000);
        assert_eq!(over.available, 0);
        assert!(over.exceeded);
    }

    #[test]
    fn test_error_code_prefixes_are_distinct() {
        let codes = [
            ErrorCode::MissingAuth,
            ErrorCode::MalformedAuth,
            ErrorCode::InvalidToken,
            ErrorCode::EmptyField,
            ErrorCode::AccessDenied,
            ErrorCode::NotFound,
            ErrorCode::AlreadyExists,
            ErrorCode::QuotaExceeded,
            ErrorCode::InvalidRequest,
            ErrorCode::InternalError,
            ErrorCode::VersionMismatch,
        ];
        let mut prefixes: Vec<&str> = codes.iter().map(ErrorCode::prefix).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), codes.len());
    }

    #[test]
    fn test_file_record_json_shape() {
        let record = FileRecord {
            name: "a.txt".to_string(),
            virtual_path: "/documents/a.txt".to_string(),
            size: 10,
            is_directory: false,
            modified: 1_704_067_200,
            mode: 0o644,
            mime_type: Some("text/plain".to_string()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["virtual_path"], "/documents/a.txt");
        assert_eq!(json["mime_type"], "text/plain");
    }
}
