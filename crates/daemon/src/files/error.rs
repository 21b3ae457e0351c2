//! Errors produced by file operations.

use std::io;

use protocol::{format_size, ErrorCode};
use thiserror::Error;

/// Errors that can occur while serving a file operation.
#[derive(Debug, Error)]
pub enum FileError {
    /// The path escapes every mapped directory, or the target has the wrong type.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// No mapping covers the virtual path, or the physical path is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The write would push usage over the configured limit.
    #[error(
        "quota exceeded: current usage {} + {} exceeds limit {}",
        human(.current),
        human(.prospective),
        human(.limit)
    )]
    QuotaExceeded {
        /// Bytes in use before the operation.
        current: u64,
        /// Bytes the operation would add.
        prospective: u64,
        /// Configured limit.
        limit: u64,
    },

    /// The request itself is malformed (bad file name, offset, wrong target type).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Zip archive could not be written.
    #[error("internal error: archive: {0}")]
    Archive(String),

    /// IO error.
    #[error("internal error: {0}")]
    Io(#[from] io::Error),
}

fn human(bytes: &u64) -> String {
    format_size(*bytes)
}

impl FileError {
    /// Error code clients branch on.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Archive(_) | Self::Io(_) => ErrorCode::InternalError,
        }
    }

    /// Map an IO error on `virtual_path` to the matching taxonomy entry.
    pub(crate) fn from_io(err: io::Error, virtual_path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(virtual_path.to_string()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(virtual_path.to_string()),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(virtual_path.to_string()),
            _ => Self::Io(err),
        }
    }
}

impl From<zip::result::ZipError> for FileError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Self::Io(e),
            other => Self::Archive(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_message_uses_human_sizes() {
        let err = FileError::QuotaExceeded {
            current: 512_000,
            prospective: 614_400,
            limit: 1_048_576,
        };
        let msg = err.to_string();
        assert!(msg.contains("500.00 KB"));
        assert!(msg.contains("600.00 KB"));
        assert!(msg.contains("1.00 MB"));
    }

    #[test]
    fn test_messages_start_with_code_prefix() {
        let errors = vec![
            FileError::AccessDenied("/x".to_string()),
            FileError::NotFound("/x".to_string()),
            FileError::AlreadyExists("/x".to_string()),
            FileError::QuotaExceeded {
                current: 1,
                prospective: 2,
                limit: 2,
            },
            FileError::InvalidRequest("bad name".to_string()),
            FileError::Archive("broken".to_string()),
            FileError::Io(io::Error::other("disk on fire")),
        ];

        for err in errors {
            assert!(
                err.to_string().starts_with(err.code().prefix()),
                "{err} does not start with {}",
                err.code().prefix()
            );
        }
    }

    #[test]
    fn test_from_io_maps_kinds() {
        let err = FileError::from_io(io::Error::from(io::ErrorKind::NotFound), "/a");
        assert!(matches!(err, FileError::NotFound(p) if p == "/a"));

        let err = FileError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), "/a");
        assert!(matches!(err, FileError::AlreadyExists(_)));

        let err = FileError::from_io(io::Error::from(io::ErrorKind::Interrupted), "/a");
        assert!(matches!(err, FileError::Io(_)));
    }
}
