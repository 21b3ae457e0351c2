//! Access token payload.
//!
//! An external issuer signs an [`AccessClaims`] value and hands the token to a
//! client, which presents it as a bearer credential. The daemon verifies the
//! signature and turns the declared directories into the only mappings the
//! request may see.

use serde::{Deserialize, Serialize};

/// A directory granted by an access token.
///
/// Both fields default to an empty string when absent so that a misspelled
/// key is caught by validation instead of silently meaning "the base
/// directory".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectoryClaim {
    /// Physical directory, relative to the daemon's configured base directory.
    #[serde(default)]
    pub source: String,
    /// Virtual prefix the directory is exposed under.
    #[serde(default, rename = "virtual")]
    pub virtual_path: String,
}

impl DirectoryClaim {
    /// Create a new directory claim.
    pub fn new(source: impl Into<String>, virtual_path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            virtual_path: virtual_path.into(),
        }
    }
}

/// Claims carried by a signed access token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Directories this token grants access to.
    #[serde(default)]
    pub directories: Vec<DirectoryClaim>,
    /// Quota as a size string (`"5GB"`); empty means unlimited.
    #[serde(default)]
    pub quota: String,
    /// Absolute expiry (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
    /// Standard JWT expiry claim (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl AccessClaims {
    /// Create claims for the given directories, expiring at `expires`.
    pub fn new(directories: Vec<DirectoryClaim>, expires: u64) -> Self {
        Self {
            directories,
            quota: String::new(),
            expires: Some(expires),
            exp: None,
        }
    }

    /// Set the quota size string.
    pub fn with_quota(mut self, quota: impl Into<String>) -> Self {
        self.quota = quota.into();
        self
    }

    /// Earliest of the two expiry fields, if either is present.
    pub fn expiry(&self) -> Option<u64> {
        match (self.expires, self.exp) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_field_name_on_the_wire() {
        let claim = DirectoryClaim::new("tenant-a/docs", "/docs");
        let json = serde_json::to_string(&claim).unwrap();
        assert_eq!(json, r#"{"source":"tenant-a/docs","virtual":"/docs"}"#);
    }

    #[test]
    fn test_misspelled_field_defaults_to_empty() {
        let json = r#"{"directories":[{"sourse":"tenant-a","virtual":"/a"}],"expires":10}"#;
        let claims: AccessClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.directories[0].source, "");
        assert_eq!(claims.directories[0].virtual_path, "/a");
    }

    #[test]
    fn test_expiry_prefers_earliest() {
        let mut claims = AccessClaims::new(vec![], 200);
        assert_eq!(claims.expiry(), Some(200));

        claims.exp = Some(100);
        assert_eq!(claims.expiry(), Some(100));

        claims.expires = None;
        assert_eq!(claims.expiry(), Some(100));

        claims.exp = None;
        assert_eq!(claims.expiry(), None);
    }

    #[test]
    fn test_quota_defaults_to_empty() {
        let claims: AccessClaims = serde_json::from_str(r#"{"exp": 5}"#).unwrap();
        assert!(claims.quota.is_empty());
        assert!(claims.directories.is_empty());
    }
}
