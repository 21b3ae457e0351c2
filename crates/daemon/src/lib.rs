//! # Filegate Daemon Library
//!
//! This crate serves file operations over a set of mapped host directories,
//! exposed to clients as a single virtual namespace.
//!
//! ## Overview
//!
//! - **Directory Mappings**: physical directories published under virtual
//!   prefixes such as `/documents`
//! - **Access Guard**: every resolved path is checked to stay inside its
//!   mapping, including through symlinks
//! - **Scoped Tokens**: a signed token narrows a request to the directories
//!   it grants below a base directory
//! - **Quotas**: uploads and copies are refused when they would exceed the
//!   configured or token-granted limit
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Request Router                           │
//! │         (per-request manager: full or token-restricted)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────────────────────────────────┐ │
//! │  │    Token     │  │            Directory Manager             │ │
//! │  │  Validator   │  │  ┌──────────┐ ┌────────┐ ┌────────────┐  │ │
//! │  └──────────────┘  │  │ Resolver │ │ Guard  │ │   Quota    │  │ │
//! │                    │  └──────────┘ └────────┘ └────────────┘  │ │
//! │                    └──────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::files::{DirectoryManager, DirectoryMapping, MappingSet, QuotaTracker};
//!
//! let mappings = MappingSet::new(vec![DirectoryMapping::new("/srv/docs", "/documents")]);
//! let manager = DirectoryManager::new(mappings, QuotaTracker::unlimited());
//!
//! for entry in manager.list("/documents", false)? {
//!     println!("{}", entry.virtual_path);
//! }
//! # Ok::<(), daemon::files::FileError>(())
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`files`]: Mappings, path resolution, access guard, quota, operations
//! - [`auth`]: Access token validation
//! - [`router`]: Message routing to a per-request manager

pub mod auth;
pub mod config;
pub mod files;
pub mod router;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export files types for convenience
pub use files::{
    DirectoryManager, DirectoryMapping, FileError, MappingSet, QuotaTracker, VirtualPathResolver,
};

// Re-export auth types for convenience
pub use auth::{AuthError, TokenGrant, TokenValidator};

// Re-export router types for convenience
pub use router::{RequestRouter, RouterError, RouterResult};
