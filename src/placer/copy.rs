use std::fs;
use std::path::Path;

use crate::error::{Result, RioError};
use crate::fs::metadata::FileType;
use crate::fs::path::RelPath;
use crate::fs::place::{place_file, MtimeRepair};
use crate::fs::rooted::RootedFs;
use crate::fs::walk::walk;
use crate::placer::Cleanup;

/// make the fileset appear by plain recursive copy
///
/// the result is always writable. cleanup is a recursive delete of the
/// target.
pub fn copy_placer(src: &Path, dst: &Path) -> Result<Cleanup> {
    let src_meta = fs::symlink_metadata(src).map_err(|e| {
        RioError::LocalCacheProblem(format!("error placing with copy placer: {}", e))
    })?;
    if !src_meta.is_dir() && !src_meta.is_file() {
        return Err(RioError::AssemblyInvalid(format!(
            "placer: source may only be dir or plain file ({} is neither)",
            src.display()
        )));
    }

    // we're about to disrupt the parent dir's mtime; repair it on return
    let _guard = dst
        .parent()
        .map(|p| MtimeRepair::capture(&RootedFs::new(p), &RelPath::root()));

    // emulate mount behavior: anything already at the target just vanishes
    if dst.exists() {
        remove_any(dst).map_err(|e| {
            RioError::AssemblyInvalid(format!("error clearing copy placement area: {}", e))
        })?;
    }

    if src_meta.is_file() {
        copy_single_file(src, dst)?;
        let dst = dst.to_path_buf();
        return Ok(Cleanup::new(move || {
            fs::remove_file(&dst).map_err(|e| {
                RioError::LocalCacheProblem(format!("error tearing down copy placement: {}", e))
            })
        }));
    }

    copy_tree(src, dst)?;

    let dst = dst.to_path_buf();
    Ok(Cleanup::new(move || {
        fs::remove_dir_all(&dst).map_err(|e| {
            RioError::LocalCacheProblem(format!("error tearing down copy placement: {}", e))
        })
    }))
}

/// recursive copy preserving metadata, with post-order dir mtime repair
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let src_fs = RootedFs::new(src);
    let dst_fs = RootedFs::new(dst);
    walk::<RioError, _, _>(
        &src_fs,
        &mut |meta| {
            let mut body = match meta.ftype {
                FileType::Regular => Some(src_fs.open_read(&meta.name)?),
                _ => None,
            };
            place_file(
                &dst_fs,
                meta,
                body.as_mut().map(|r| r as &mut dyn std::io::Read),
                false,
            )
            .map_err(|e| {
                RioError::LocalCacheProblem(format!("error placing with copy placer: {}", e))
            })
        },
        &mut |meta| {
            // placing children bumped this dir's mtime; re-pave it
            if meta.ftype == FileType::Dir {
                dst_fs
                    .set_times_nano(
                        &meta.name,
                        meta.mtime,
                        meta.mtime_nsec,
                        crate::fs::metadata::DEFAULT_TIME,
                        0,
                    )
                    .map_err(RioError::from)?;
            }
            Ok(())
        },
    )
}

fn copy_single_file(src: &Path, dst: &Path) -> Result<()> {
    let parent = dst.parent().ok_or_else(|| {
        RioError::AssemblyInvalid(format!("placer: target {} has no parent", dst.display()))
    })?;
    let name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| RelPath::new(n).ok())
        .ok_or_else(|| {
            RioError::AssemblyInvalid(format!("placer: invalid target {}", dst.display()))
        })?;

    let meta = fs::symlink_metadata(src).map_err(|e| {
        RioError::LocalCacheProblem(format!("error placing with copy placer: {}", e))
    })?;
    let fmeta = crate::fs::metadata::Metadata::from_std(name, &meta);
    let mut body = fs::File::open(src).map_err(|e| {
        RioError::LocalCacheProblem(format!("error placing with copy placer: {}", e))
    })?;
    place_file(
        &RootedFs::new(parent),
        &fmeta,
        Some(&mut body),
        false,
    )
    .map_err(|e| RioError::LocalCacheProblem(format!("error placing with copy placer: {}", e)))
}

pub(crate) fn remove_any(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
