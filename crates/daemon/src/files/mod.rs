//! Virtual filesystem over a set of mapped host directories.
//!
//! This module provides:
//! - Directory mappings and virtual path resolution
//! - An access guard that rejects physical paths outside every mapping
//! - Quota accounting over the mapped trees
//! - [`DirectoryManager`], the request-scoped façade tying them together
//!
//! # Security
//!
//! Resolution alone never proves a path is safe. Every operation runs the
//! guard on the resolved physical path, which rejects `..` escapes and
//! symlinks leading out of a mapped tree.

pub mod error;
pub mod export;
pub mod guard;
pub mod manager;
pub mod mapping;
pub mod platform;
pub mod quota;
pub mod resolver;

pub use error::FileError;
pub use export::{ExportPart, ExportStore};
pub use guard::{is_safe, is_within};
pub use manager::{DirectoryManager, ExportSummary, ReadChunk};
pub use mapping::{DirectoryMapping, MappingSet};
pub use platform::platform_stat;
pub use quota::QuotaTracker;
pub use resolver::{ResolvedPath, VirtualPathResolver};
