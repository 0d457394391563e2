use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, RioError};
use crate::fs::path::RelPath;
use crate::fs::place::MtimeRepair;
use crate::fs::rooted::RootedFs;
use crate::placer::copy::{copy_tree, remove_any};
use crate::placer::Cleanup;

/// make the fileset appear by moving it into place
///
/// the source (a cache staging/committed dir) is consumed. rename is
/// attempted first; across filesystems it degrades to copy-and-delete.
/// cleanup is a recursive delete of the target.
pub fn direct_placer(src: &Path, dst: &Path) -> Result<Cleanup> {
    if !src.exists() {
        return Err(RioError::AssemblyInvalid(format!(
            "placer: source {} does not exist",
            src.display()
        )));
    }

    let _guard = dst
        .parent()
        .map(|p| MtimeRepair::capture(&RootedFs::new(p), &RelPath::root()));

    if dst.exists() {
        remove_any(dst).map_err(|e| {
            RioError::AssemblyInvalid(format!("error clearing direct placement area: {}", e))
        })?;
    }

    match fs::rename(src, dst) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(nix::libc::EXDEV) => {
            debug!(src = %src.display(), dst = %dst.display(), "rename crosses filesystems, copying");
            copy_tree(src, dst)?;
            fs::remove_dir_all(src).map_err(|e| {
                RioError::LocalCacheProblem(format!("error consuming direct placement source: {}", e))
            })?;
        }
        Err(e) => {
            return Err(RioError::AssemblyInvalid(format!(
                "error moving into direct placement: {}",
                e
            )))
        }
    }

    let dst = dst.to_path_buf();
    Ok(Cleanup::new(move || {
        remove_any(&dst).map_err(|e| {
            RioError::LocalCacheProblem(format!("error tearing down direct placement: {}", e))
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_direct_moves_source() {
        let work = tempdir().unwrap();
        let src = work.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("f"), "payload").unwrap();

        let dst = work.path().join("dst");
        let cleanup = direct_placer(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("f")).unwrap(), b"payload");

        cleanup.undo().unwrap();
        assert!(!dst.exists());
    }

    #[test]
    fn test_direct_missing_source() {
        let work = tempdir().unwrap();
        let err = match direct_placer(&work.path().join("gone"), &work.path().join("dst")) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::AssemblyInvalid(_)));
    }

    #[test]
    fn test_direct_masks_existing_target() {
        let work = tempdir().unwrap();
        let src = work.path().join("src");
        fs::create_dir(&src).unwrap();
        let dst = work.path().join("dst");
        fs::create_dir(&dst).unwrap();
        fs::write(dst.join("stale"), "stale").unwrap();

        direct_placer(&src, &dst).unwrap();
        assert!(!dst.join("stale").exists());
    }
}
