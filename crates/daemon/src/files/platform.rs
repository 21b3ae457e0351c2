//! Platform-specific stat fields.

use std::fs::Metadata;
use std::time::SystemTime;

use protocol::PlatformStat;

/// Seconds since the Unix epoch, clamped to zero for earlier times.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Owner, group, link count, access and change times for `metadata`.
#[cfg(unix)]
pub fn platform_stat(metadata: &Metadata) -> PlatformStat {
    use std::os::unix::fs::MetadataExt;

    PlatformStat {
        uid: metadata.uid(),
        gid: metadata.gid(),
        nlink: metadata.nlink(),
        accessed: u64::try_from(metadata.atime()).unwrap_or(0),
        changed: u64::try_from(metadata.ctime()).unwrap_or(0),
    }
}

/// Stable defaults where owner, group and change time do not exist.
#[cfg(not(unix))]
pub fn platform_stat(metadata: &Metadata) -> PlatformStat {
    let modified = metadata.modified().map(unix_seconds).unwrap_or(0);
    PlatformStat {
        uid: 0,
        gid: 0,
        nlink: 1,
        accessed: metadata.accessed().map(unix_seconds).unwrap_or(modified),
        changed: modified,
    }
}

/// Permission bits for `metadata`.
#[cfg(unix)]
pub fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

/// Permission bits synthesized from the read-only flag.
#[cfg(not(unix))]
pub fn permission_bits(metadata: &Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, false) => 0o755,
        (true, true) => 0o555,
        (false, false) => 0o644,
        (false, true) => 0o444,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_platform_stat_defaults_are_sane() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, "x").unwrap();

        let metadata = fs::metadata(&file).unwrap();
        let stat = platform_stat(&metadata);
        assert!(stat.nlink >= 1);
        assert!(stat.changed > 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o640)).unwrap();

        assert_eq!(permission_bits(&fs::metadata(&file).unwrap()), 0o640);
    }

    #[test]
    fn test_unix_seconds_before_epoch() {
        let early = SystemTime::UNIX_EPOCH - std::time::Duration::from_secs(5);
        assert_eq!(unix_seconds(early), 0);
    }
}
