//! rio - repeatable I/O
//!
//! a content-addressed fileset packaging engine: filesets are packed into
//! opaque archive "wares" whose identity is a cryptographic fingerprint of
//! their canonicalized contents, and unpacked anywhere with the guarantee
//! that the result rehashes to the declared id.
//!
//! # Core concepts
//!
//! - **Ware**: an immutable, content-addressed archive of a filesystem subtree
//! - **Ware ID**: `<packType>:<base58hash>`, a sha-512/384 over the
//!   canonical fileset digest
//! - **Warehouse**: a blob store addressable by uri (`file://`, `http://`,
//!   and their content-addressed `ca+` variants)
//! - **Filter**: deterministic uid/gid/mtime/sticky rewrites applied
//!   in-stream, so semantically equivalent filesets hash identically
//! - **Placer**: strategy for materializing a cached fileset at a target
//!   path (copy, bind-mount, direct move, none)
//!
//! # Example usage
//!
//! ```no_run
//! use std::path::Path;
//! use rio::{tartrans, CancelToken, FilterSpec, PlacementMode};
//!
//! let cancel = CancelToken::new();
//!
//! // pack a directory into a warehouse
//! let ware = tartrans::pack(
//!     &cancel,
//!     "tar",
//!     Path::new("/some/fileset"),
//!     &FilterSpec::default(),
//!     Some("file:///var/warehouse"),
//! ).unwrap();
//!
//! // unpack it elsewhere, hash-verified and cached
//! tartrans::unpack(
//!     &cancel,
//!     &ware,
//!     Path::new("/elsewhere"),
//!     &FilterSpec::default(),
//!     PlacementMode::Copy,
//!     &["file:///var/warehouse".to_string()],
//!     Path::new("/var/lib/rio"),
//! ).unwrap();
//! ```

mod cancel;
mod error;
mod filter;
mod ware;

pub mod cache;
pub mod config;
pub mod fs;
pub mod fshash;
pub mod placer;
pub mod tartrans;
pub mod transmat;
pub mod warehouse;

pub use cancel::CancelToken;
pub use error::{FsError, IoResultExt, Result, RioError};
pub use filter::{FilterPurpose, FilterSpec, Filters};
pub use placer::{Cleanup, PlacementMode};
pub use ware::{WareID, PACK_TYPE_TAR};
