use std::path::{Path, PathBuf};

/// environment variable overriding the rio base directory
pub const BASE_ENV: &str = "RIO_BASE";

/// default base directory when RIO_BASE is unset
pub const DEFAULT_BASE: &str = "/var/lib/rio";

/// resolve the rio base directory from the environment
///
/// callers thread the result through pack/unpack explicitly; nothing below
/// the cli layer consults the environment.
pub fn base_path() -> PathBuf {
    match std::env::var_os(BASE_ENV) {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => PathBuf::from(DEFAULT_BASE),
    }
}

/// the cache root under a base directory
pub fn cache_path(base: &Path) -> PathBuf {
    base.join("cache")
}
