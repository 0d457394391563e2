use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use crate::ware::WareID;

/// normalized filesystem error kinds
///
/// every variant exports its fields so the whole set serializes cleanly
/// (the json output format carries these in the error details).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FsError {
    #[error("path {} does not exist", path.display())]
    NotExists { path: PathBuf },

    #[error("path {} already exists", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("path {} is not a directory", path.display())]
    NotDir { path: PathBuf },

    #[error("permission denied on {}", path.display())]
    Permission { path: PathBuf },

    #[error("breakout: refusing to traverse symlink {} -> {} while operating on {} in {}", link.display(), target, path.display(), area.display())]
    Breakout {
        path: PathBuf,
        area: PathBuf,
        link: PathBuf,
        target: String,
    },

    #[error("{msg}")]
    IoUnknown { msg: String },
}

impl FsError {
    /// normalize an io error into one of the closed set of kinds
    pub fn from_io(path: &Path, err: std::io::Error) -> FsError {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => FsError::NotExists {
                path: path.to_path_buf(),
            },
            ErrorKind::AlreadyExists => FsError::AlreadyExists {
                path: path.to_path_buf(),
            },
            ErrorKind::PermissionDenied => FsError::Permission {
                path: path.to_path_buf(),
            },
            _ if err.raw_os_error() == Some(nix::libc::ENOTDIR) => FsError::NotDir {
                path: path.to_path_buf(),
            },
            _ => FsError::IoUnknown {
                msg: format!("{}: {}", path.display(), err),
            },
        }
    }

    /// normalize a nix errno the same way
    pub fn from_errno(path: &Path, errno: nix::errno::Errno) -> FsError {
        FsError::from_io(path, std::io::Error::from_raw_os_error(errno as i32))
    }
}

/// the rio error taxonomy
///
/// every error carries a category (stable string, used in json output and
/// for exit code selection), a human message, and optionally structured
/// details.
#[derive(Debug, thiserror::Error)]
pub enum RioError {
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    WarehouseUnavailable(String),

    #[error("{0}")]
    WareNotFound(String),

    #[error("{0}")]
    WareCorrupt(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    WareHashMismatch { expected: WareID, actual: WareID },

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    LocalCacheProblem(String),

    #[error("{0}")]
    AssemblyInvalid(String),

    #[error("{0}")]
    InoperablePath(String),

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl RioError {
    /// stable category string, as carried in json error output
    pub fn category(&self) -> &'static str {
        match self {
            RioError::Usage(_) => "ErrUsage",
            RioError::WarehouseUnavailable(_) => "ErrWarehouseUnavailable",
            RioError::WareNotFound(_) => "ErrWareNotFound",
            RioError::WareCorrupt(_) => "ErrWareCorrupt",
            RioError::WareHashMismatch { .. } => "ErrWareHashMismatch",
            RioError::Cancelled => "ErrCancelled",
            RioError::LocalCacheProblem(_) => "ErrLocalCacheProblem",
            RioError::AssemblyInvalid(_) => "ErrAssemblyInvalid",
            RioError::InoperablePath(_) => "ErrInoperablePath",
            RioError::Fs(_) => "ErrInoperablePath",
        }
    }

    /// structured details for json output, if the category defines any
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            RioError::WareHashMismatch { expected, actual } => Some(json!({
                "expected": expected.to_string(),
                "actual": actual.to_string(),
            })),
            RioError::Fs(fse) => serde_json::to_value(fse).ok(),
            _ => None,
        }
    }

    /// process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            RioError::Usage(_) => 2,
            RioError::WarehouseUnavailable(_) => 3,
            RioError::WareNotFound(_) => 4,
            RioError::WareCorrupt(_) => 5,
            RioError::WareHashMismatch { .. } => 6,
            RioError::Cancelled => 7,
            RioError::InoperablePath(_) | RioError::Fs(_) => 10,
            RioError::LocalCacheProblem(_) => 11,
            RioError::AssemblyInvalid(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RioError>;

/// helper to wrap io errors with path context, normalized to FsError
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> std::result::Result<T, FsError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> std::result::Result<T, FsError> {
        self.map_err(|e| FsError::from_io(&path.into(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_error_normalization() {
        let p = Path::new("/some/where");
        let e = FsError::from_io(
            p,
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(
            e,
            FsError::NotExists {
                path: p.to_path_buf()
            }
        );

        let e = FsError::from_io(
            p,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(e, FsError::Permission { .. }));
    }

    #[test]
    fn test_fs_error_serializable() {
        let e = FsError::NotExists {
            path: PathBuf::from("/x"),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["kind"], "not_exists");
        assert_eq!(v["path"], "/x");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RioError::Usage("x".into()).exit_code(), 2);
        assert_eq!(RioError::WarehouseUnavailable("x".into()).exit_code(), 3);
        assert_eq!(RioError::WareNotFound("x".into()).exit_code(), 4);
        assert_eq!(RioError::WareCorrupt("x".into()).exit_code(), 5);
        assert_eq!(RioError::Cancelled.exit_code(), 7);
        assert_eq!(RioError::LocalCacheProblem("x".into()).exit_code(), 11);
    }

    #[test]
    fn test_hash_mismatch_details() {
        let e = RioError::WareHashMismatch {
            expected: WareID::new("tar", "abc"),
            actual: WareID::new("tar", "def"),
        };
        let d = e.details().unwrap();
        assert_eq!(d["expected"], "tar:abc");
        assert_eq!(d["actual"], "tar:def");
        assert_eq!(e.exit_code(), 6);
    }
}
