//! Signed access tokens that restrict a request to a subset of directories.
//!
//! A token names directories relative to the configured base directory.
//! Validation either yields a [`TokenGrant`] holding exactly those
//! directories, or an [`AuthError`]. The unrestricted configuration is never
//! a possible result.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use protocol::{parse_size, AccessClaims};
use tracing::{debug, warn};

use super::error::AuthError;
use crate::files::guard::{absolutize, clean_path, is_within, join_relative};
use crate::files::mapping::{normalize_virtual, DirectoryMapping, MappingSet};

/// Minimum length of the shared signing secret (256 bits).
pub const MIN_SECRET_LEN: usize = 32;

/// Clock skew tolerated on expiry, in seconds.
const LEEWAY_SECS: u64 = 30;

/// What a validated token grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// The only mappings visible to the request.
    pub mappings: MappingSet,
    /// Quota limit in bytes (0 = unlimited).
    pub quota_limit: u64,
    /// Expiry (Unix epoch seconds).
    pub expires: u64,
}

/// Verifies bearer tokens and turns their claims into mapping sets.
pub struct TokenValidator {
    base_dir: PathBuf,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Create a validator for tokens signed with `secret`, granting
    /// directories below `base_dir`.
    ///
    /// The secret length is enforced when the configuration is validated.
    pub fn new(secret: &str, base_dir: impl Into<PathBuf>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.leeway = LEEWAY_SECS;

        Self {
            base_dir: base_dir.into(),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Base directory token sources are relative to.
    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    /// Validate an `Authorization` header value.
    pub fn validate(&self, authorization: Option<&str>) -> Result<TokenGrant, AuthError> {
        let token = bearer_token(authorization)?;
        self.validate_token(token)
    }

    /// Validate a raw token.
    pub fn validate_token(&self, token: &str) -> Result<TokenGrant, AuthError> {
        let claims = self.verify(token)?;

        let quota_limit = parse_size(&claims.quota).map_err(|e| {
            warn!(error = %e, "token carries an invalid quota");
            AuthError::InvalidToken(format!("bad quota: {e}"))
        })?;

        let mappings = self.restrict(&claims)?;
        let expires = claims.expiry().unwrap_or_default();

        debug!(
            directories = mappings.len(),
            quota_limit, expires, "token validated"
        );
        Ok(TokenGrant {
            mappings,
            quota_limit,
            expires,
        })
    }

    /// Check signature and expiry, returning the decoded claims.
    fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                warn!(error = %e, "token rejected");
                AuthError::from(e)
            })?;
        let claims = data.claims;

        let Some(expiry) = claims.expiry() else {
            warn!("token has no expiry");
            return Err(AuthError::InvalidToken("token has no expiry".to_string()));
        };
        if expiry.saturating_add(LEEWAY_SECS) < now() {
            warn!(expiry, "token expired");
            return Err(AuthError::InvalidToken("token expired".to_string()));
        }

        Ok(claims)
    }

    /// Turn the claimed directories into a mapping set, rejecting the whole
    /// token if any entry is unusable.
    fn restrict(&self, claims: &AccessClaims) -> Result<MappingSet, AuthError> {
        if claims.directories.is_empty() {
            warn!("token grants no directories");
            return Err(AuthError::AccessDenied(
                "token grants no directories".to_string(),
            ));
        }

        let base = clean_path(&absolutize(&self.base_dir));
        let mut seen = HashSet::new();
        let mut mappings = Vec::with_capacity(claims.directories.len());

        for (index, entry) in claims.directories.iter().enumerate() {
            let source = entry.source.trim();
            let virtual_path = entry.virtual_path.trim();

            if source.is_empty() {
                warn!(index, "token directory has an empty source");
                return Err(AuthError::EmptyField {
                    index,
                    field: "source",
                });
            }
            if virtual_path.is_empty() {
                warn!(index, "token directory has an empty virtual path");
                return Err(AuthError::EmptyField {
                    index,
                    field: "virtual",
                });
            }

            let candidate = join_relative(&base, source);
            if !is_within(&candidate, &base) {
                warn!(index, source, "token directory escapes base directory");
                return Err(AuthError::AccessDenied(format!(
                    "{source} escapes base directory"
                )));
            }

            match fs::metadata(&candidate) {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => {
                    return Err(AuthError::AccessDenied(format!(
                        "{source} is not a directory"
                    )))
                }
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    return Err(AuthError::AccessDenied(format!("{source}: {e}")))
                }
                Err(_) => {
                    return Err(AuthError::NotFound(format!(
                        "directory not found: {source}"
                    )))
                }
            }

            let virtual_path = normalize_virtual(virtual_path);
            if !seen.insert(virtual_path.clone()) {
                return Err(AuthError::InvalidToken(format!(
                    "duplicate virtual path {virtual_path}"
                )));
            }

            mappings.push(DirectoryMapping::new(clean_path(&candidate), &virtual_path));
        }

        Ok(MappingSet::new(mappings))
    }
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched without regard to case.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, AuthError> {
    let header = match authorization.map(str::trim) {
        None | Some("") => return Err(AuthError::MissingAuth),
        Some(header) => header,
    };

    let (scheme, token) = header
        .split_once(char::is_whitespace)
        .ok_or_else(|| AuthError::MalformedAuth("expected \"Bearer <token>\"".to_string()))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedAuth(format!(
            "unsupported scheme {scheme:?}"
        )));
    }

    let token = token.trim();
    let well_formed = token.split('.').count() == 3
        && token.split('.').all(|part| !part.is_empty())
        && !token.contains(char::is_whitespace);
    if !well_formed {
        return Err(AuthError::MalformedAuth(
            "token is not a compact JWS".to_string(),
        ));
    }

    Ok(token)
}

/// Sign `claims` with `secret` (HS256).
///
/// Used by external issuers and tests; the daemon itself never issues
/// tokens.
pub fn encode_token(claims: &AccessClaims, secret: &str) -> Result<String, AuthError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::InvalidToken(e.to_string()))
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::DirectoryClaim;
    use std::path::Path;
    use tempfile::TempDir;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn in_an_hour() -> u64 {
        now() + 3600
    }

    fn base() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("tenant/docs")).unwrap();
        fs::create_dir_all(temp.path().join("tenant/media")).unwrap();
        fs::write(temp.path().join("tenant/file.txt"), "x").unwrap();
        temp
    }

    fn header(claims: &AccessClaims) -> String {
        format!("Bearer {}", encode_token(claims, SECRET).unwrap())
    }

    fn claims(dirs: &[(&str, &str)]) -> AccessClaims {
        AccessClaims::new(
            dirs.iter()
                .map(|(s, v)| DirectoryClaim::new(*s, *v))
                .collect(),
            in_an_hour(),
        )
    }

    #[test]
    fn test_valid_token_restricts_mappings() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());

        let claims = claims(&[("tenant/docs", "/docs"), ("tenant/media", "media")])
            .with_quota("5GB");
        let grant = validator.validate(Some(&header(&claims))).unwrap();

        assert_eq!(grant.mappings.len(), 2);
        assert_eq!(grant.quota_limit, 5 * 1024 * 1024 * 1024);
        let virtuals: Vec<&str> = grant
            .mappings
            .iter()
            .map(|m| m.virtual_path.as_str())
            .collect();
        assert!(virtuals.contains(&"/docs"));
        assert!(virtuals.contains(&"/media"));
        for mapping in &grant.mappings {
            assert!(is_within(&mapping.source, base.path()));
        }
    }

    #[test]
    fn test_absolute_source_is_relative_to_base() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let grant = validator
            .validate(Some(&header(&claims(&[("/tenant/docs", "/d")]))))
            .unwrap();
        let mapping = grant.mappings.iter().next().unwrap();
        assert!(mapping.source.starts_with(clean_path(base.path())));
    }

    #[test]
    fn test_empty_fields_rejected() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());

        for (source, virtual_path, field) in [
            ("", "/x", "source"),
            ("   ", "/x", "source"),
            ("tenant/docs", "", "virtual"),
            ("tenant/docs", " \t", "virtual"),
        ] {
            let err = validator
                .validate(Some(&header(&claims(&[(source, virtual_path)]))))
                .unwrap_err();
            assert_eq!(err, AuthError::EmptyField { index: 0, field });
        }
    }

    #[test]
    fn test_empty_field_in_later_entry_rejects_whole_token() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let err = validator
            .validate(Some(&header(&claims(&[
                ("tenant/docs", "/docs"),
                ("", "/x"),
            ]))))
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::EmptyField {
                index: 1,
                field: "source"
            }
        );
    }

    #[test]
    fn test_misspelled_field_is_empty() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());

        let payload = serde_json::json!({
            "directories": [{ "sourse": "tenant/docs", "virtual": "/x" }],
            "expires": in_an_hour(),
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = validator.validate_token(&token).unwrap_err();
        assert_eq!(
            err,
            AuthError::EmptyField {
                index: 0,
                field: "source"
            }
        );
    }

    #[test]
    fn test_escape_rejected() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path().join("tenant"));

        for source in [
            "../escape",
            "..",
            "docs/../../escape",
            "./docs/./../../",
            "docs/.././../tenant/../..",
            "docs/../media/../../../../etc",
        ] {
            let err = validator
                .validate(Some(&header(&claims(&[(source, "/e")]))))
                .unwrap_err();
            assert!(
                matches!(&err, AuthError::AccessDenied(msg) if msg.contains("escapes base directory")),
                "{source}: {err}"
            );
        }
    }

    #[test]
    fn test_interleaved_segments_inside_base_allowed() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let grant = validator
            .validate(Some(&header(&claims(&[("tenant/./media/../docs", "/d")]))))
            .unwrap();
        let mapping = grant.mappings.iter().next().unwrap();
        assert!(mapping.source.ends_with("tenant/docs"));
    }

    #[test]
    fn test_missing_directory() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let err = validator
            .validate(Some(&header(&claims(&[("tenant/nope", "/n")]))))
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::NotFound("directory not found: tenant/nope".to_string())
        );
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let err = validator
            .validate(Some(&header(&claims(&[("tenant/file.txt", "/f")]))))
            .unwrap_err();
        assert!(matches!(err, AuthError::AccessDenied(msg) if msg.contains("not a directory")));
    }

    #[test]
    fn test_no_directories_rejected() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let err = validator.validate(Some(&header(&claims(&[])))).unwrap_err();
        assert!(matches!(err, AuthError::AccessDenied(_)));
    }

    #[test]
    fn test_duplicate_virtual_rejected() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let err = validator
            .validate(Some(&header(&claims(&[
                ("tenant/docs", "/x"),
                ("tenant/media", "/x/"),
            ]))))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn test_expired_token() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());

        let mut expired = claims(&[("tenant/docs", "/d")]);
        expired.expires = Some(now() - 3600);
        let err = validator.validate(Some(&header(&expired))).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));

        let mut jwt_expired = claims(&[("tenant/docs", "/d")]);
        jwt_expired.expires = None;
        jwt_expired.exp = Some(now() - 3600);
        let err = validator.validate(Some(&header(&jwt_expired))).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn test_token_without_expiry() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let mut forever = claims(&[("tenant/docs", "/d")]);
        forever.expires = None;
        let err = validator.validate(Some(&header(&forever))).unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("token has no expiry".to_string()));
    }

    #[test]
    fn test_standard_exp_claim_accepted() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let mut c = claims(&[("tenant/docs", "/d")]);
        c.expires = None;
        c.exp = Some(in_an_hour());
        assert!(validator.validate(Some(&header(&c))).is_ok());
    }

    #[test]
    fn test_wrong_secret() {
        let base = base();
        let validator = TokenValidator::new("another-secret-that-is-long-enough!!", base.path());
        let err = validator
            .validate(Some(&header(&claims(&[("tenant/docs", "/d")]))))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn test_tampered_payload() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let token = encode_token(&claims(&[("tenant/docs", "/d")]), SECRET).unwrap();
        let other = encode_token(&claims(&[("tenant/media", "/d")]), SECRET).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);

        assert!(matches!(
            validator.validate_token(&forged),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_bad_quota() {
        let base = base();
        let validator = TokenValidator::new(SECRET, base.path());
        let c = claims(&[("tenant/docs", "/d")]).with_quota("lots");
        assert!(matches!(
            validator.validate(Some(&header(&c))),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(bearer_token(None), Err(AuthError::MissingAuth));
        assert_eq!(bearer_token(Some("")), Err(AuthError::MissingAuth));
        assert_eq!(bearer_token(Some("   ")), Err(AuthError::MissingAuth));
        assert!(matches!(
            bearer_token(Some("Basic dXNlcjpwYXNz")),
            Err(AuthError::MalformedAuth(_))
        ));
        assert!(matches!(
            bearer_token(Some("Bearer")),
            Err(AuthError::MalformedAuth(_))
        ));
        assert!(matches!(
            bearer_token(Some("Bearer not-a-jwt")),
            Err(AuthError::MalformedAuth(_))
        ));
        assert!(matches!(
            bearer_token(Some("Bearer a..c")),
            Err(AuthError::MalformedAuth(_))
        ));
        assert_eq!(bearer_token(Some("bearer a.b.c")), Ok("a.b.c"));
        assert_eq!(bearer_token(Some("BEARER   a.b.c ")), Ok("a.b.c"));
    }

    #[test]
    fn test_base_dir_accessor() {
        let validator = TokenValidator::new(SECRET, "/srv/base");
        assert_eq!(validator.base_dir(), Path::new("/srv/base"));
    }
}
