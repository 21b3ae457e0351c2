//! Spooled zip exports served in chunks.
//!
//! An export is written once to an anonymous temporary file and then read
//! back one chunk per request, so neither the daemon nor a single response
//! holds the whole archive in memory. Each spool is bound to the
//! authorization header of the request that created it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::error::FileError;
use super::manager::{read_range, DirectoryManager, ExportSummary};

/// Spools kept at once; the oldest is dropped beyond this.
pub const MAX_PENDING_EXPORTS: usize = 32;

/// One chunk of a spooled archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPart {
    /// Identifier for fetching further chunks.
    pub export_id: u64,
    /// Offset of this chunk.
    pub offset: u64,
    /// Total archive size.
    pub total_size: u64,
    /// Bytes read.
    pub data: Vec<u8>,
    /// Whether the chunk reaches the end of the archive.
    pub is_last: bool,
    /// Counts from building the archive.
    pub summary: ExportSummary,
}

#[derive(Debug)]
struct PendingExport {
    file: Arc<NamedTempFile>,
    owner: Option<String>,
    total_size: u64,
    summary: ExportSummary,
}

/// Archives waiting to be fetched.
#[derive(Debug, Default)]
pub struct ExportStore {
    exports: RwLock<HashMap<u64, PendingExport>>,
    next_id: AtomicU64,
}

impl ExportStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spools waiting to be fetched.
    pub fn pending(&self) -> usize {
        self.exports.read().map(|e| e.len()).unwrap_or_default()
    }

    /// Build an archive of `paths` and return its first chunk.
    pub fn start(
        &self,
        manager: &DirectoryManager,
        paths: &[String],
        owner: Option<&str>,
        chunk_size: u32,
    ) -> Result<ExportPart, FileError> {
        let mut file = NamedTempFile::new()?;
        let summary = manager.export_zip(paths, file.as_file_mut())?;
        let total_size = file.as_file().metadata()?.len();

        let export_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut exports = self.exports.write().map_err(|_| poisoned())?;
            if exports.len() >= MAX_PENDING_EXPORTS {
                if let Some(oldest) = exports.keys().min().copied() {
                    warn!(export_id = oldest, "dropping unfetched export");
                    exports.remove(&oldest);
                }
            }
            exports.insert(
                export_id,
                PendingExport {
                    file: Arc::new(file),
                    owner: owner.map(str::to_string),
                    total_size,
                    summary,
                },
            );
        }

        debug!(export_id, total_size, "spooled export");
        self.chunk(export_id, owner, 0, chunk_size)
    }

    /// Read a chunk of a spooled archive.
    ///
    /// A spool is only visible to the authorization it was created with.
    /// It is released once its last chunk has been read.
    pub fn chunk(
        &self,
        export_id: u64,
        owner: Option<&str>,
        offset: u64,
        chunk_size: u32,
    ) -> Result<ExportPart, FileError> {
        let (file, total_size, summary) = {
            let exports = self.exports.read().map_err(|_| poisoned())?;
            match exports.get(&export_id) {
                Some(pending) if pending.owner.as_deref() == owner => (
                    Arc::clone(&pending.file),
                    pending.total_size,
                    pending.summary,
                ),
                _ => return Err(FileError::NotFound(format!("export {export_id}"))),
            }
        };

        if offset > total_size {
            return Err(FileError::InvalidRequest(format!(
                "offset {offset} beyond end of export {export_id} ({total_size} bytes)"
            )));
        }

        let data = read_range(&mut file.reopen()?, offset, chunk_size)?;
        let is_last = offset + data.len() as u64 >= total_size;

        if is_last {
            let mut exports = self.exports.write().map_err(|_| poisoned())?;
            exports.remove(&export_id);
            debug!(export_id, "export fully read");
        }

        Ok(ExportPart {
            export_id,
            offset,
            total_size,
            data,
            is_last,
            summary,
        })
    }
}

fn poisoned() -> FileError {
    FileError::Io(std::io::Error::other("export store lock poisoned"))
}
