use std::fs;
use std::path::Path;

use nix::mount::{mount, umount, MsFlags};

use crate::error::{Result, RioError};
use crate::fs::path::RelPath;
use crate::fs::place::MtimeRepair;
use crate::fs::rooted::RootedFs;
use crate::placer::Cleanup;

/// make the fileset appear by bind-mounting the cache dir at the target
///
/// requires privileges. a read-only placement remounts with MS_RDONLY.
/// cleanup unmounts.
pub fn mount_placer(src: &Path, dst: &Path, writable: bool) -> Result<Cleanup> {
    if !src.is_dir() {
        return Err(RioError::AssemblyInvalid(format!(
            "placer: mount source {} is not a directory",
            src.display()
        )));
    }

    let _guard = dst
        .parent()
        .map(|p| MtimeRepair::capture(&RootedFs::new(p), &RelPath::root()));

    fs::create_dir_all(dst).map_err(|e| {
        RioError::AssemblyInvalid(format!("error preparing mount point: {}", e))
    })?;

    mount(
        Some(src),
        dst,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| RioError::AssemblyInvalid(format!("bind mount failed: {}", e)))?;

    if !writable {
        mount(
            None::<&str>,
            dst,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(|e| {
            let _ = umount(dst);
            RioError::AssemblyInvalid(format!("read-only remount failed: {}", e))
        })?;
    }

    let dst = dst.to_path_buf();
    Ok(Cleanup::new(move || {
        umount(dst.as_path())
            .map_err(|e| RioError::AssemblyInvalid(format!("unmount failed: {}", e)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // actually mounting needs privileges; only the precondition paths are
    // exercised here

    #[test]
    fn test_mount_missing_source() {
        let work = tempdir().unwrap();
        let err = match mount_placer(&work.path().join("gone"), &work.path().join("dst"), true) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::AssemblyInvalid(_)));
    }

    #[test]
    fn test_mount_file_source_rejected() {
        let work = tempdir().unwrap();
        let src = work.path().join("file");
        fs::write(&src, "x").unwrap();
        let err = match mount_placer(&src, &work.path().join("dst"), true) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::AssemblyInvalid(_)));
    }
}
