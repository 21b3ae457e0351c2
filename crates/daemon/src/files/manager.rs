//! Request-scoped file operations over one mapping set.
//!
//! Every operation resolves its virtual path(s), runs the access guard on
//! the physical result and, for operations that add bytes, checks the quota
//! before touching the filesystem.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use protocol::{FileRecord, FileStat, PlatformStat, QuotaInfo};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::error::FileError;
use super::guard::{absolutize, clean_path, is_safe};
use super::mapping::{join_virtual, normalize_virtual, MappingSet};
use super::platform::{permission_bits, platform_stat, unix_seconds};
use super::quota::{tree_size, QuotaTracker};
use super::resolver::{ResolvedPath, VirtualPathResolver};

/// Default chunk size for reads (64KB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Maximum chunk size for reads (1MB).
pub const MAX_CHUNK_SIZE: u32 = 1024 * 1024;

/// One chunk of a file read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    /// Bytes read.
    pub data: Vec<u8>,
    /// Size of the whole file.
    pub total_size: u64,
    /// Whether the chunk reaches the end of the file.
    pub is_last: bool,
}

/// Outcome of a zip export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Files written to the archive.
    pub files: u64,
    /// Requested paths or entries left out.
    pub skipped: u64,
}

/// File operations scoped to a single, immutable mapping set.
///
/// Built once per request with either the full configured mappings or the
/// subset granted by a validated token.
#[derive(Debug, Clone)]
pub struct DirectoryManager {
    resolver: VirtualPathResolver,
    quota: QuotaTracker,
}

impl DirectoryManager {
    /// Create a manager over `mappings` with the given quota.
    pub fn new(mappings: MappingSet, quota: QuotaTracker) -> Self {
        Self {
            resolver: VirtualPathResolver::new(mappings),
            quota,
        }
    }

    /// Mappings visible to this manager.
    pub fn mappings(&self) -> &MappingSet {
        self.resolver.mappings()
    }

    /// Path resolver for this manager's mappings.
    pub fn resolver(&self) -> &VirtualPathResolver {
        &self.resolver
    }

    /// Quota tracker for this manager.
    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Resolve and guard a virtual path.
    ///
    /// The returned physical path is lexically cleaned, which is the form
    /// the guard validated.
    fn resolve_safe(&self, virtual_path: &str) -> Result<ResolvedPath, FileError> {
        let resolved = self.resolver.resolve(virtual_path)?;

        if !is_safe(&resolved.physical, self.mappings()) {
            warn!(
                virtual_path = %resolved.virtual_path,
                physical = %resolved.physical.display(),
                "path escapes mapped directories"
            );
            return Err(FileError::AccessDenied(resolved.virtual_path));
        }

        Ok(ResolvedPath {
            physical: clean_path(&absolutize(&resolved.physical)),
            virtual_path: resolved.virtual_path,
        })
    }

    /// List a directory.
    ///
    /// Directories come first, then files, each group sorted by name without
    /// regard to case. Virtual directories that only exist as ancestors of a
    /// mapping prefix are listed from the mapping set and merged with any
    /// real entries.
    pub fn list(
        &self,
        virtual_path: &str,
        include_hidden: bool,
    ) -> Result<Vec<FileRecord>, FileError> {
        let normalized = normalize_virtual(virtual_path);
        let synthetic = self.resolver.virtual_children(&normalized);

        let mut entries = match self.resolve_safe(&normalized) {
            Ok(resolved) => match fs::metadata(&resolved.physical) {
                Ok(metadata) if metadata.is_dir() => {
                    read_entries(&resolved.physical, &normalized, include_hidden)?
                }
                Ok(_) => {
                    return Err(FileError::InvalidRequest(format!(
                        "not a directory: {normalized}"
                    )))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound && !synthetic.is_empty() => {
                    Vec::new()
                }
                Err(e) => return Err(FileError::from_io(e, &normalized)),
            },
            Err(FileError::NotFound(_)) if !synthetic.is_empty() => Vec::new(),
            Err(e) => return Err(e),
        };

        for name in synthetic {
            if !entries.iter().any(|e| e.name == name) {
                entries.push(synthetic_record(&name, &join_virtual(&normalized, &name)));
            }
        }

        entries.sort_by(|a, b| match (a.is_directory, b.is_directory) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        debug!(path = %normalized, count = entries.len(), "listed directory");
        Ok(entries)
    }

    /// Metadata for a single path.
    pub fn stat(&self, virtual_path: &str) -> Result<FileStat, FileError> {
        let normalized = normalize_virtual(virtual_path);

        let resolved = match self.resolve_safe(&normalized) {
            Ok(resolved) => resolved,
            Err(FileError::NotFound(_)) if self.resolver.is_virtual_dir(&normalized) => {
                return Ok(FileStat {
                    record: synthetic_record(entry_name(&normalized), &normalized),
                    platform: PlatformStat {
                        nlink: 1,
                        ..PlatformStat::default()
                    },
                });
            }
            Err(e) => return Err(e),
        };

        let metadata =
            fs::metadata(&resolved.physical).map_err(|e| FileError::from_io(e, &normalized))?;

        Ok(FileStat {
            record: file_record(entry_name(&normalized), &normalized, &metadata),
            platform: platform_stat(&metadata),
        })
    }

    /// Read up to `length` bytes of a file starting at `offset`.
    ///
    /// A zero length reads [`DEFAULT_CHUNK_SIZE`]; lengths above
    /// [`MAX_CHUNK_SIZE`] are capped.
    pub fn read(&self, virtual_path: &str, offset: u64, length: u32) -> Result<ReadChunk, FileError> {
        let resolved = self.resolve_safe(virtual_path)?;
        let metadata = fs::metadata(&resolved.physical)
            .map_err(|e| FileError::from_io(e, &resolved.virtual_path))?;

        if metadata.is_dir() {
            return Err(FileError::InvalidRequest(format!(
                "is a directory: {}",
                resolved.virtual_path
            )));
        }

        let total_size = metadata.len();
        if offset > total_size {
            return Err(FileError::InvalidRequest(format!(
                "offset {offset} beyond end of {} ({total_size} bytes)",
                resolved.virtual_path
            )));
        }

        let data = read_range(&mut File::open(&resolved.physical)?, offset, length)?;

        let is_last = offset + data.len() as u64 >= total_size;
        Ok(ReadChunk {
            data,
            total_size,
            is_last,
        })
    }

    /// Store `size` bytes from `reader` as `filename` inside `directory`.
    ///
    /// The data is written to a temporary file next to the target and
    /// renamed into place, so a short stream leaves nothing behind.
    /// Returns the virtual path of the new file.
    pub fn upload<R: Read>(
        &self,
        directory: &str,
        filename: &str,
        reader: R,
        size: u64,
    ) -> Result<String, FileError> {
        validate_file_name(filename)?;

        let dir = self.resolve_safe(directory)?;
        let dir_metadata =
            fs::metadata(&dir.physical).map_err(|e| FileError::from_io(e, &dir.virtual_path))?;
        if !dir_metadata.is_dir() {
            return Err(FileError::InvalidRequest(format!(
                "not a directory: {}",
                dir.virtual_path
            )));
        }

        let target_virtual = join_virtual(&dir.virtual_path, filename);
        let target = self.resolve_safe(&target_virtual)?;
        if target.physical.is_dir() {
            return Err(FileError::InvalidRequest(format!(
                "is a directory: {target_virtual}"
            )));
        }

        self.quota.check_upload(self.mappings(), size)?;
        write_atomic(&dir.physical, &target.physical, reader, size)?;

        info!(path = %target_virtual, size, "uploaded file");
        Ok(target_virtual)
    }

    /// Replace or create the file at `virtual_path` with `data`.
    pub fn write(&self, virtual_path: &str, data: &[u8]) -> Result<String, FileError> {
        let target = self.resolve_safe(virtual_path)?;

        if target.physical.is_dir() {
            return Err(FileError::InvalidRequest(format!(
                "is a directory: {}",
                target.virtual_path
            )));
        }

        let parent = target.physical.parent().ok_or_else(|| {
            FileError::InvalidRequest(format!("no parent directory: {}", target.virtual_path))
        })?;
        if !parent.is_dir() {
            return Err(FileError::NotFound(parent_virtual(&target.virtual_path)));
        }

        let size = data.len() as u64;
        self.quota.check_upload(self.mappings(), size)?;
        write_atomic(parent, &target.physical, data, size)?;

        info!(path = %target.virtual_path, size, "wrote file");
        Ok(target.virtual_path)
    }

    /// Delete a file or directory tree.
    ///
    /// Neither a mapping's source directory nor any directory containing one
    /// can be deleted.
    pub fn delete(&self, virtual_path: &str) -> Result<(), FileError> {
        let target = self.resolve_safe(virtual_path)?;

        if self.mappings().contains_source(&target.physical) {
            warn!(path = %target.virtual_path, "refusing to delete mapping root");
            return Err(FileError::AccessDenied(format!(
                "cannot delete mapping root or its ancestor {}",
                target.virtual_path
            )));
        }

        let metadata = fs::symlink_metadata(&target.physical)
            .map_err(|e| FileError::from_io(e, &target.virtual_path))?;

        if metadata.is_dir() {
            fs::remove_dir_all(&target.physical)?;
        } else {
            fs::remove_file(&target.physical)?;
        }

        info!(path = %target.virtual_path, "deleted");
        Ok(())
    }

    /// Move `source` to `destination`, creating missing parent directories.
    ///
    /// The destination must not exist. Moves across filesystems fall back to
    /// copy and delete.
    pub fn move_path(&self, source: &str, destination: &str) -> Result<String, FileError> {
        let src = self.resolve_safe(source)?;
        let dst = self.resolve_safe(destination)?;

        if self.mappings().contains_source(&src.physical) {
            warn!(path = %src.virtual_path, "refusing to move mapping root");
            return Err(FileError::AccessDenied(format!(
                "cannot move mapping root or its ancestor {}",
                src.virtual_path
            )));
        }

        let metadata = fs::symlink_metadata(&src.physical)
            .map_err(|e| FileError::from_io(e, &src.virtual_path))?;
        ensure_vacant(&dst)?;
        if metadata.is_dir() && dst.physical.starts_with(&src.physical) {
            return Err(FileError::InvalidRequest(format!(
                "cannot move {} into itself",
                src.virtual_path
            )));
        }

        create_parent(&dst.physical)?;

        match fs::rename(&src.physical, &dst.physical) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!(
                    source = %src.virtual_path,
                    destination = %dst.virtual_path,
                    "rename crosses devices, copying instead"
                );
                copy_recursive(&src.physical, &dst.physical)?;
                if metadata.is_dir() {
                    fs::remove_dir_all(&src.physical)?;
                } else {
                    fs::remove_file(&src.physical)?;
                }
            }
            Err(e) => return Err(FileError::from_io(e, &src.virtual_path)),
        }

        info!(source = %src.virtual_path, destination = %dst.virtual_path, "moved");
        Ok(dst.virtual_path)
    }

    /// Copy `source` to `destination`, creating missing parent directories.
    ///
    /// The destination must not exist, and the full size of the source
    /// counts against the quota.
    pub fn copy(&self, source: &str, destination: &str) -> Result<String, FileError> {
        let src = self.resolve_safe(source)?;
        let dst = self.resolve_safe(destination)?;

        let metadata = fs::symlink_metadata(&src.physical)
            .map_err(|e| FileError::from_io(e, &src.virtual_path))?;
        ensure_vacant(&dst)?;
        if metadata.is_dir() && dst.physical.starts_with(&src.physical) {
            return Err(FileError::InvalidRequest(format!(
                "cannot copy {} into itself",
                src.virtual_path
            )));
        }

        let size = tree_size(&src.physical);
        self.quota.check_copy(self.mappings(), size)?;

        create_parent(&dst.physical)?;
        copy_recursive(&src.physical, &dst.physical)?;

        info!(source = %src.virtual_path, destination = %dst.virtual_path, size, "copied");
        Ok(dst.virtual_path)
    }

    /// Create a directory and any missing parents.
    pub fn mkdir(&self, virtual_path: &str) -> Result<String, FileError> {
        let target = self.resolve_safe(virtual_path)?;
        ensure_vacant(&target)?;

        fs::create_dir_all(&target.physical)
            .map_err(|e| FileError::from_io(e, &target.virtual_path))?;

        info!(path = %target.virtual_path, "created directory");
        Ok(target.virtual_path)
    }

    /// Write a zip archive of `paths` to `writer`.
    ///
    /// Paths that do not resolve, fail the guard or do not exist are
    /// skipped rather than failing the export, as are entries already written
    /// by an earlier, overlapping path. Entry names are virtual paths without
    /// the leading slash. Symlinks are not followed.
    pub fn export_zip<W: Write + Seek>(
        &self,
        paths: &[String],
        writer: W,
    ) -> Result<ExportSummary, FileError> {
        let mut zip = ZipWriter::new(writer);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);
        let mut summary = ExportSummary::default();
        let mut written = HashSet::new();

        for path in paths {
            let resolved = match self.resolve_safe(path) {
                Ok(resolved) => resolved,
                Err(e) => {
                    debug!(path = %path, error = %e, "skipping export path");
                    summary.skipped += 1;
                    continue;
                }
            };

            let (Ok(metadata), Ok(name)) = (
                fs::symlink_metadata(&resolved.physical),
                self.resolver.reverse(&resolved.physical),
            ) else {
                debug!(path = %path, "skipping missing export path");
                summary.skipped += 1;
                continue;
            };
            let name = name.trim_start_matches('/').to_string();

            if metadata.is_file() {
                if !written.insert(name.clone()) {
                    debug!(path = %path, "skipping duplicate export entry");
                    summary.skipped += 1;
                    continue;
                }
                zip.start_file(name, options)?;
                io::copy(&mut File::open(&resolved.physical)?, &mut zip)?;
                summary.files += 1;
            } else if metadata.is_dir() {
                let mut dir = ArchiveDir {
                    zip: &mut zip,
                    options,
                    written: &mut written,
                    summary: &mut summary,
                };
                dir.add(&resolved.physical, &name)?;
            } else {
                summary.skipped += 1;
            }
        }

        zip.finish()?;
        info!(files = summary.files, skipped = summary.skipped, "exported archive");
        Ok(summary)
    }

    /// Quota usage for this manager's mappings.
    pub fn quota_info(&self) -> QuotaInfo {
        self.quota.info(self.mappings())
    }
}

/// Effective chunk length for a requested one.
pub(crate) fn chunk_length(length: u32) -> u32 {
    match length {
        0 => DEFAULT_CHUNK_SIZE,
        n => n.min(MAX_CHUNK_SIZE),
    }
}

/// Read up to one chunk from `file` starting at `offset`.
pub(crate) fn read_range(file: &mut File, offset: u64, length: u32) -> io::Result<Vec<u8>> {
    let length = chunk_length(length);
    file.seek(SeekFrom::Start(offset))?;

    let mut data = Vec::with_capacity(length as usize);
    file.take(u64::from(length)).read_to_end(&mut data)?;
    Ok(data)
}

/// Reject names that could address anything but a direct child.
fn validate_file_name(name: &str) -> Result<(), FileError> {
    if name.trim().is_empty() {
        return Err(FileError::InvalidRequest("empty file name".to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(FileError::InvalidRequest(format!(
            "file name contains path separator: {name}"
        )));
    }
    if name == "." || name == ".." || name.contains('\0') {
        return Err(FileError::InvalidRequest(format!("invalid file name: {name}")));
    }
    Ok(())
}

fn ensure_vacant(target: &ResolvedPath) -> Result<(), FileError> {
    if fs::symlink_metadata(&target.physical).is_ok() {
        return Err(FileError::AlreadyExists(target.virtual_path.clone()));
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<(), FileError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Stream exactly `size` bytes into a temp file in `dir`, then rename it
/// over `target`.
fn write_atomic<R: Read>(dir: &Path, target: &Path, reader: R, size: u64) -> Result<(), FileError> {
    let existing = fs::metadata(target).ok().map(|m| m.permissions());

    let mut temp = NamedTempFile::new_in(dir)?;
    let written = io::copy(&mut reader.take(size), temp.as_file_mut())?;
    if written != size {
        return Err(FileError::InvalidRequest(format!(
            "incomplete upload: expected {size} bytes, received {written}"
        )));
    }
    temp.as_file().sync_all()?;

    match existing {
        Some(permissions) => fs::set_permissions(temp.path(), permissions)?,
        None => set_default_permissions(temp.path())?,
    }

    temp.persist(target).map_err(|e| FileError::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Copy a file, or a directory tree without following symlinks.
fn copy_recursive(src: &Path, dst: &Path) -> Result<(), FileError> {
    let metadata = fs::symlink_metadata(src)?;
    if metadata.is_file() {
        fs::copy(src, dst)?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target: PathBuf = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            debug!(path = %entry.path().display(), "not copying symlink");
        }
    }
    Ok(())
}

/// Writes a directory tree into an archive, skipping names already present.
struct ArchiveDir<'a, W: Write + Seek> {
    zip: &'a mut ZipWriter<W>,
    options: SimpleFileOptions,
    written: &'a mut HashSet<String>,
    summary: &'a mut ExportSummary,
}

impl<W: Write + Seek> ArchiveDir<'_, W> {
    fn add(&mut self, dir: &Path, base: &str) -> Result<(), FileError> {
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry in export");
                    self.summary.skipped += 1;
                    continue;
                }
            };

            let relative: Vec<String> = entry
                .path()
                .strip_prefix(dir)
                .map(|rel| {
                    rel.components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect()
                })
                .unwrap_or_default();
            let name = std::iter::once(base.to_string())
                .chain(relative)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type().is_file() {
                if !self.written.insert(name.clone()) {
                    self.summary.skipped += 1;
                    continue;
                }
                self.zip.start_file(name, self.options)?;
                io::copy(&mut File::open(entry.path())?, &mut *self.zip)?;
                self.summary.files += 1;
            } else if entry.file_type().is_dir() {
                let dir_name = format!("{name}/");
                // Repeated directory entries carry no content; drop them quietly.
                if !name.is_empty() && self.written.insert(dir_name.clone()) {
                    self.zip.add_directory(dir_name, self.options)?;
                }
            } else {
                self.summary.skipped += 1;
            }
        }
        Ok(())
    }
}

fn read_entries(
    dir: &Path,
    virtual_dir: &str,
    include_hidden: bool,
) -> Result<Vec<FileRecord>, FileError> {
    let mut records = Vec::new();

    for entry in fs::read_dir(dir).map_err(|e| FileError::from_io(e, virtual_dir))? {
        let Ok(entry) = entry else { continue };

        let name = entry.file_name().to_string_lossy().to_string();
        if !include_hidden && name.starts_with('.') {
            continue;
        }

        // Don't follow symlinks.
        let Ok(metadata) = entry.metadata() else { continue };

        let virtual_path = join_virtual(virtual_dir, &name);
        records.push(file_record(&name, &virtual_path, &metadata));
    }

    Ok(records)
}

fn file_record(name: &str, virtual_path: &str, metadata: &fs::Metadata) -> FileRecord {
    let is_directory = metadata.is_dir();
    FileRecord {
        name: name.to_string(),
        virtual_path: virtual_path.to_string(),
        size: if metadata.is_file() { metadata.len() } else { 0 },
        is_directory,
        modified: metadata.modified().map(unix_seconds).unwrap_or(0),
        mode: permission_bits(metadata),
        mime_type: metadata
            .is_file()
            .then(|| mime_guess::from_path(name).first_or_octet_stream().to_string()),
    }
}

fn synthetic_record(name: &str, virtual_path: &str) -> FileRecord {
    FileRecord {
        name: name.to_string(),
        virtual_path: virtual_path.to_string(),
        size: 0,
        is_directory: true,
        modified: 0,
        mode: 0o755,
        mime_type: None,
    }
}

fn entry_name(virtual_path: &str) -> &str {
    match virtual_path.rsplit('/').next() {
        Some("") | None => "/",
        Some(name) => name,
    }
}

fn parent_virtual(virtual_path: &str) -> String {
    match virtual_path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}
