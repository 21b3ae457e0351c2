//! Directory mappings: which physical trees are exposed, and under which
//! virtual prefix.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A physical source directory exposed under a virtual path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMapping {
    /// Absolute physical directory.
    pub source: PathBuf,
    /// Virtual prefix, always starting with `/`.
    #[serde(rename = "virtual")]
    pub virtual_path: String,
}

impl DirectoryMapping {
    /// Create a new mapping. The virtual prefix is normalized.
    pub fn new(source: impl Into<PathBuf>, virtual_path: &str) -> Self {
        Self {
            source: source.into(),
            virtual_path: normalize_virtual(virtual_path),
        }
    }

    /// Whether this mapping is the catch-all `/` mapping.
    pub fn is_root(&self) -> bool {
        self.virtual_path == "/"
    }

    /// Remainder of `virtual_path` below this mapping's prefix, if it matches.
    ///
    /// `virtual_path` must already be normalized. The remainder has no
    /// leading slash and is empty when the path equals the prefix.
    pub fn strip_prefix<'a>(&self, virtual_path: &'a str) -> Option<&'a str> {
        if self.is_root() {
            return virtual_path.strip_prefix('/');
        }
        if virtual_path == self.virtual_path {
            return Some("");
        }
        virtual_path
            .strip_prefix(self.virtual_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// The ordered, immutable mappings visible to one request.
///
/// Mappings are sorted by descending virtual-prefix length so the most
/// specific mapping wins a prefix match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingSet {
    mappings: Vec<DirectoryMapping>,
}

impl MappingSet {
    /// Build a mapping set, ordering by specificity.
    pub fn new(mut mappings: Vec<DirectoryMapping>) -> Self {
        for mapping in &mut mappings {
            mapping.virtual_path = normalize_virtual(&mapping.virtual_path);
        }
        mappings.sort_by(|a, b| b.virtual_path.len().cmp(&a.virtual_path.len()));
        Self { mappings }
    }

    /// Iterate mappings, most specific first.
    pub fn iter(&self) -> impl Iterator<Item = &DirectoryMapping> {
        self.mappings.iter()
    }

    /// Number of mappings.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the set has no mappings at all.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// The catch-all `/` mapping, if configured.
    pub fn root(&self) -> Option<&DirectoryMapping> {
        self.mappings.iter().find(|m| m.is_root())
    }

    /// Whether `physical` is a mapping's source directory or an ancestor of
    /// one. Removing or relocating such a path would take a mapping with it.
    pub fn contains_source(&self, physical: &Path) -> bool {
        let cleaned = super::guard::clean_path(&super::guard::absolutize(physical));
        self.mappings.iter().any(|m| {
            super::guard::clean_path(&super::guard::absolutize(&m.source)).starts_with(&cleaned)
        })
    }
}

impl<'a> IntoIterator for &'a MappingSet {
    type Item = &'a DirectoryMapping;
    type IntoIter = std::slice::Iter<'a, DirectoryMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.mappings.iter()
    }
}

/// Normalize a client-supplied virtual path to a clean, leading-slash form.
///
/// Backslashes become slashes, empty and `.` segments are dropped and any
/// trailing slash is removed. `..` segments are kept: they are resolved
/// against the physical tree and rejected by the access guard if they
/// escape it.
pub fn normalize_virtual(input: &str) -> String {
    let replaced = input.trim().replace('\\', "/");
    let segments: Vec<&str> = replaced
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Join a normalized virtual directory and an entry name.
pub fn join_virtual(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_virtual() {
        assert_eq!(normalize_virtual(""), "/");
        assert_eq!(normalize_virtual("/"), "/");
        assert_eq!(normalize_virtual("documents"), "/documents");
        assert_eq!(normalize_virtual("/documents/"), "/documents");
        assert_eq!(normalize_virtual("//documents//a.txt"), "/documents/a.txt");
        assert_eq!(normalize_virtual("/documents/./a.txt"), "/documents/a.txt");
        assert_eq!(normalize_virtual("\\documents\\a.txt"), "/documents/a.txt");
        assert_eq!(normalize_virtual("  /docs  "), "/docs");
    }

    #[test]
    fn test_normalize_keeps_parent_segments() {
        assert_eq!(normalize_virtual("/documents/../etc"), "/documents/../etc");
    }

    #[test]
    fn test_mapping_set_orders_by_specificity() {
        let set = MappingSet::new(vec![
            DirectoryMapping::new("/srv/a", "/a"),
            DirectoryMapping::new("/srv/root", "/"),
            DirectoryMapping::new("/srv/ab", "/a/b"),
        ]);

        let prefixes: Vec<&str> = set.iter().map(|m| m.virtual_path.as_str()).collect();
        assert_eq!(prefixes, vec!["/a/b", "/a", "/"]);
        assert_eq!(set.root().unwrap().source, PathBuf::from("/srv/root"));
    }

    #[test]
    fn test_strip_prefix() {
        let mapping = DirectoryMapping::new("/srv/docs", "/documents");
        assert_eq!(mapping.strip_prefix("/documents"), Some(""));
        assert_eq!(mapping.strip_prefix("/documents/a/b"), Some("a/b"));
        assert_eq!(mapping.strip_prefix("/documentsX/a"), None);
        assert_eq!(mapping.strip_prefix("/other"), None);

        let root = DirectoryMapping::new("/srv/all", "/");
        assert_eq!(root.strip_prefix("/"), Some(""));
        assert_eq!(root.strip_prefix("/x/y"), Some("x/y"));
    }

    #[test]
    fn test_new_normalizes_virtual() {
        let mapping = DirectoryMapping::new("/srv/docs", "documents/");
        assert_eq!(mapping.virtual_path, "/documents");
    }

    #[test]
    fn test_contains_source() {
        let set = MappingSet::new(vec![
            DirectoryMapping::new("/srv/docs", "/documents"),
            DirectoryMapping::new("/srv/docs/team/shared", "/shared"),
        ]);
        assert!(set.contains_source(Path::new("/srv/docs")));
        assert!(set.contains_source(Path::new("/srv/docs/")));
        assert!(set.contains_source(Path::new("/srv/docs/sub/..")));
        assert!(set.contains_source(Path::new("/srv/docs/team")));
        assert!(set.contains_source(Path::new("/srv")));
        assert!(!set.contains_source(Path::new("/srv/docs/sub")));
        assert!(!set.contains_source(Path::new("/srv/docs/team/shared-old")));
    }

    #[test]
    fn test_join_virtual() {
        assert_eq!(join_virtual("/", "docs"), "/docs");
        assert_eq!(join_virtual("/docs", "a.txt"), "/docs/a.txt");
    }

    #[test]
    fn test_mapping_toml_field_name() {
        let mapping: DirectoryMapping =
            toml::from_str("source = \"/srv/docs\"\nvirtual = \"/documents\"").unwrap();
        assert_eq!(mapping.virtual_path, "/documents");
    }
}
