//! Containment checks for resolved physical paths.
//!
//! Resolution trusts configuration; the guard distrusts the result of
//! resolution. Every operation runs [`is_safe`] on the physical paths it is
//! about to touch, which catches `..` segments that survived resolution as
//! well as symlinks pointing out of a mapped tree.

use std::fs;
use std::path::{Component, Path, PathBuf};

use super::mapping::MappingSet;

/// Whether `path` lies inside the source tree of at least one mapping.
pub fn is_safe(path: &Path, mappings: &MappingSet) -> bool {
    mappings.iter().any(|m| is_within(path, &m.source))
}

/// Whether `path` lies inside `root` (or is `root` itself).
///
/// Both paths are made absolute and cleaned lexically, then the relative
/// path from `root` to `path` must not start with a parent segment. When
/// part of `path` exists on disk, its nearest existing ancestor is also
/// canonicalized so a symlink cannot lead outside `root`.
pub fn is_within(path: &Path, root: &Path) -> bool {
    let target = clean_path(&absolutize(path));
    let base = clean_path(&absolutize(root));

    if !target.starts_with(&base) {
        return false;
    }

    match (canonicalize_existing(&target), fs::canonicalize(&base)) {
        (Some(real_target), Ok(real_base)) => real_target.starts_with(real_base),
        // Nothing on disk to follow; the lexical check is all there is.
        _ => true,
    }
}

/// Make `path` absolute against the current directory without touching the
/// filesystem.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Lexically clean a path: drop `.` segments and fold `..` into its parent.
///
/// `..` at the root of an absolute path is discarded; leading `..` of a
/// relative path is kept.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => cleaned.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_in_normal = matches!(
                    cleaned.components().next_back(),
                    Some(Component::Normal(_))
                );
                if ends_in_normal {
                    cleaned.pop();
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            Component::Normal(part) => cleaned.push(part),
        }
    }

    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}

/// Join `relative` onto `base` segment by segment, ignoring any root or
/// prefix components so an absolute `relative` cannot replace `base`.
pub fn join_relative(base: &Path, relative: &str) -> PathBuf {
    let mut joined = base.to_path_buf();
    for segment in relative.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            other => joined.push(other),
        }
    }
    joined
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// remaining components.
fn canonicalize_existing(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut suffix = Vec::new();

    loop {
        if let Ok(real) = fs::canonicalize(existing) {
            let mut result = real;
            for part in suffix.iter().rev() {
                result.push(part);
            }
            return Some(result);
        }
        suffix.push(existing.file_name()?.to_os_string());
        existing = existing.parent()?;
    }
}
