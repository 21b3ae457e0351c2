//! Quota accounting over the mapped source trees.
//!
//! Usage is computed fresh on every check by walking the trees. The check
//! and the write that follows are not atomic: concurrent writers can each
//! pass against the same snapshot.

use std::path::{Path, PathBuf};

use protocol::QuotaInfo;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::error::FileError;
use super::guard::{absolutize, clean_path};
use super::mapping::MappingSet;

/// Evaluates prospective writes against a byte limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaTracker {
    limit: u64,
}

impl QuotaTracker {
    /// Create a tracker with `limit` bytes. Zero means unlimited.
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    /// A tracker that never rejects.
    pub fn unlimited() -> Self {
        Self { limit: 0 }
    }

    /// Configured limit in bytes (0 = unlimited).
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Total bytes stored under every mapping's source tree.
    ///
    /// Unreadable entries are skipped. Symlinks are not followed, and a
    /// source nested inside another source is only counted once.
    pub fn usage(&self, mappings: &MappingSet) -> u64 {
        distinct_roots(mappings).iter().map(|root| tree_size(root)).sum()
    }

    /// Current quota state for `mappings`.
    pub fn info(&self, mappings: &MappingSet) -> QuotaInfo {
        QuotaInfo::new(self.usage(mappings), self.limit)
    }

    /// Check that writing `size` new bytes stays within the limit.
    pub fn check_upload(&self, mappings: &MappingSet, size: u64) -> Result<(), FileError> {
        if self.limit == 0 {
            return Ok(());
        }
        let used = self.usage(mappings);
        debug!(used, size, limit = self.limit, "quota check for upload");
        check(used, size, self.limit)
    }

    /// Check that duplicating `size` bytes stays within the limit.
    pub fn check_copy(&self, mappings: &MappingSet, size: u64) -> Result<(), FileError> {
        if self.limit == 0 {
            return Ok(());
        }
        let used = self.usage(mappings);
        debug!(used, size, limit = self.limit, "quota check for copy");
        check(used, size, self.limit)
    }
}

/// Reject iff a limit is set and `used + size` exceeds it.
pub fn check(used: u64, size: u64, limit: u64) -> Result<(), FileError> {
    if limit > 0 && used.checked_add(size).map_or(true, |total| total > limit) {
        warn!(used, size, limit, "quota exceeded");
        return Err(FileError::QuotaExceeded {
            current: used,
            prospective: size,
            limit,
        });
    }
    Ok(())
}

/// Size in bytes of a file, or the recursive size of a directory tree.
pub fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry in quota walk");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn distinct_roots(mappings: &MappingSet) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = mappings
        .iter()
        .map(|m| clean_path(&absolutize(&m.source)))
        .collect();
    roots.sort_by_key(|root| root.components().count());

    let mut distinct: Vec<PathBuf> = Vec::with_capacity(roots.len());
    for root in roots {
        if !distinct.iter().any(|kept| root.starts_with(kept)) {
            distinct.push(root);
        }
    }
    distinct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::mapping::DirectoryMapping;
    use std::fs;
    use tempfile::TempDir;

    fn single(dir: &Path) -> MappingSet {
        MappingSet::new(vec![DirectoryMapping::new(dir, "/data")])
    }

    #[test]
    fn test_usage_sums_recursively() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("one.txt"), vec![0u8; 100]).unwrap();
        fs::write(temp.path().join("a/two.txt"), vec![0u8; 200]).unwrap();
        fs::write(temp.path().join("a/b/three.txt"), vec![0u8; 300]).unwrap();

        let tracker = QuotaTracker::unlimited();
        assert_eq!(tracker.usage(&single(temp.path())), 600);
    }

    #[test]
    fn test_usage_missing_source_is_zero() {
        let tracker = QuotaTracker::new(10);
        let set = single(Path::new("/nonexistent/filegate/quota"));
        assert_eq!(tracker.usage(&set), 0);
    }

    #[test]
    fn test_nested_sources_counted_once() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("inner")).unwrap();
        fs::write(temp.path().join("inner/file"), vec![0u8; 50]).unwrap();
        fs::write(temp.path().join("top"), vec![0u8; 25]).unwrap();

        let set = MappingSet::new(vec![
            DirectoryMapping::new(temp.path(), "/all"),
            DirectoryMapping::new(temp.path().join("inner"), "/inner"),
        ]);
        assert_eq!(QuotaTracker::unlimited().usage(&set), 75);
    }

    #[cfg(unix)]
    #[test]
    fn test_usage_does_not_follow_symlinks() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("big"), vec![0u8; 4096]).unwrap();
        fs::write(temp.path().join("small"), vec![0u8; 10]).unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        assert_eq!(QuotaTracker::unlimited().usage(&single(temp.path())), 10);
    }

    #[test]
    fn test_check_boundaries() {
        assert!(check(0, 100, 100).is_ok());
        assert!(check(50, 50, 100).is_ok());
        assert!(check(50, 51, 100).is_err());
        assert!(check(u64::MAX, u64::MAX, 0).is_ok());
        assert!(check(u64::MAX, 1, u64::MAX).is_err());
    }

    #[test]
    fn test_check_rejects_overflowing_sum() {
        assert!(matches!(
            check(u64::MAX - 10, 20, u64::MAX),
            Err(FileError::QuotaExceeded { current, prospective: 20, .. }) if current == u64::MAX - 10
        ));
        assert!(check(u64::MAX - 10, 10, u64::MAX).is_ok());
    }

    #[test]
    fn test_check_upload_scenario_message() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("existing"), vec![0u8; 512_000]).unwrap();

        let tracker = QuotaTracker::new(1_048_576);
        let err = tracker
            .check_upload(&single(temp.path()), 614_400)
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.starts_with("quota exceeded"));
        assert!(msg.contains("500.00 KB"), "{msg}");
        assert!(msg.contains("600.00 KB"), "{msg}");
        assert!(msg.contains("1.00 MB"), "{msg}");
    }

    #[test]
    fn test_unlimited_never_rejects() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("existing"), vec![0u8; 1024]).unwrap();
        let tracker = QuotaTracker::unlimited();
        assert!(tracker.check_upload(&single(temp.path()), u64::MAX).is_ok());
        assert!(tracker.check_copy(&single(temp.path()), u64::MAX).is_ok());
    }

    #[test]
    fn test_info() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f"), vec![0u8; 10]).unwrap();

        let info = QuotaTracker::new(100).info(&single(temp.path()));
        assert_eq!(info.used, 10);
        assert_eq!(info.limit, 100);
        assert_eq!(info.available, 90);
        assert!(!info.exceeded);

        let info = QuotaTracker::unlimited().info(&single(temp.path()));
        assert_eq!(info.available, -1);
    }

    #[test]
    fn test_tree_size_of_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, vec![0u8; 42]).unwrap();
        assert_eq!(tree_size(&file), 42);
    }
}
