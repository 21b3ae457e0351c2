//! Virtual to physical path resolution.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use super::error::FileError;
use super::guard::{absolutize, clean_path, join_relative};
use super::mapping::{join_virtual, normalize_virtual, MappingSet};

/// Result of resolving a virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Normalized virtual path.
    pub virtual_path: String,
    /// Physical path on the host. Not yet checked by the access guard.
    pub physical: PathBuf,
}

/// Converts virtual paths to physical paths and back for one mapping set.
#[derive(Debug, Clone)]
pub struct VirtualPathResolver {
    mappings: MappingSet,
}

impl VirtualPathResolver {
    /// Create a resolver over `mappings`.
    pub fn new(mappings: MappingSet) -> Self {
        Self { mappings }
    }

    /// The mapping set this resolver works on.
    pub fn mappings(&self) -> &MappingSet {
        &self.mappings
    }

    /// Resolve a virtual path to its physical location.
    ///
    /// Mappings are tried most specific first, so a `/` catch-all only
    /// handles paths no other prefix claims.
    pub fn resolve(&self, virtual_path: &str) -> Result<ResolvedPath, FileError> {
        let normalized = normalize_virtual(virtual_path);

        for mapping in &self.mappings {
            if let Some(rest) = mapping.strip_prefix(&normalized) {
                return Ok(ResolvedPath {
                    physical: join_relative(&mapping.source, rest),
                    virtual_path: normalized,
                });
            }
        }

        Err(FileError::NotFound(normalized))
    }

    /// Map a physical path back into the virtual namespace.
    ///
    /// When sources are nested, the deepest source wins.
    pub fn reverse(&self, physical: &Path) -> Result<String, FileError> {
        let target = clean_path(&absolutize(physical));

        let best = self
            .mappings
            .iter()
            .filter_map(|mapping| {
                let source = clean_path(&absolutize(&mapping.source));
                let rest = target.strip_prefix(&source).ok()?.to_path_buf();
                Some((source.components().count(), mapping, rest))
            })
            .max_by_key(|(depth, _, _)| *depth);

        let (_, mapping, rest) =
            best.ok_or_else(|| FileError::NotFound(physical.display().to_string()))?;

        let mut virtual_path = mapping.virtual_path.clone();
        for component in rest.components() {
            if let Component::Normal(part) = component {
                virtual_path = join_virtual(&virtual_path, &part.to_string_lossy());
            }
        }
        Ok(virtual_path)
    }

    /// Names of pseudo-directories directly below `virtual_dir`.
    ///
    /// A virtual directory that is a strict ancestor of some mapping prefix
    /// lists the next segment of every such prefix, whether or not a mapping
    /// resolves the directory itself. Sorted and de-duplicated.
    pub fn virtual_children(&self, virtual_dir: &str) -> Vec<String> {
        let dir = normalize_virtual(virtual_dir);
        let mut names = BTreeSet::new();

        for mapping in self.mappings.iter().filter(|m| !m.is_root()) {
            let below = if dir == "/" {
                mapping.virtual_path.strip_prefix('/')
            } else {
                mapping
                    .virtual_path
                    .strip_prefix(dir.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
            };

            if let Some(segment) = below.and_then(|rest| rest.split('/').next()) {
                if !segment.is_empty() {
                    names.insert(segment.to_string());
                }
            }
        }

        names.into_iter().collect()
    }

    /// Whether `virtual_dir` exists only as a synthesized directory.
    pub fn is_virtual_dir(&self, virtual_dir: &str) -> bool {
        !self.virtual_children(virtual_dir).is_empty()
    }
}
