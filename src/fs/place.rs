use std::fs::File;
use std::io::{self, Read};

use tracing::warn;

use crate::error::FsError;
use crate::fs::metadata::{FileType, Metadata, DEFAULT_TIME};
use crate::fs::path::RelPath;
use crate::fs::rooted::RootedFs;

/// atomically materialize one fileset node described by `meta`
///
/// parents are created (mode 0755) when missing. for regular files `body`
/// is drained into the node and its length checked against the declared
/// size. permissions, ownership, and times are applied last; chown is
/// skipped when `skip_chown` is set or the ids already match the caller.
pub fn place_file(
    afs: &RootedFs,
    meta: &Metadata,
    body: Option<&mut dyn Read>,
    skip_chown: bool,
) -> Result<(), FsError> {
    if !meta.name.is_root() {
        afs.mkdir_all(&meta.name.dir(), 0o755)?;
    }

    match meta.ftype {
        FileType::Regular => {
            let mut file = afs.create_file(&meta.name, meta.mode)?;
            let written = match body {
                Some(r) => io::copy(r, &mut file).map_err(|e| FsError::IoUnknown {
                    msg: format!("writing {}: {}", meta.name, e),
                })?,
                None => 0,
            };
            if written != meta.size {
                return Err(FsError::IoUnknown {
                    msg: format!(
                        "content length mismatch for {}: declared {}, streamed {}",
                        meta.name, meta.size, written
                    ),
                });
            }
        }
        FileType::Dir => match afs.mkdir(&meta.name, meta.mode) {
            Ok(()) => {}
            Err(FsError::AlreadyExists { .. }) => {
                // reapply attributes below; conjured dirs get respecified
            }
            Err(e) => return Err(e),
        },
        FileType::Symlink => {
            match afs.remove(&meta.name) {
                Ok(()) | Err(FsError::NotExists { .. }) => {}
                Err(e) => return Err(e),
            }
            afs.symlink(&meta.name, &meta.linkname)?;
        }
        FileType::Hardlink => {
            let target = RelPath::new(&meta.linkname).map_err(|e| FsError::IoUnknown {
                msg: format!("hardlink {}: {}", meta.name, e),
            })?;
            afs.hardlink(&meta.name, &target)?;
            // attributes ride along with the shared inode
            return Ok(());
        }
        FileType::CharDevice => {
            afs.mknod_char(&meta.name, meta.mode, meta.devmajor, meta.devminor)?;
        }
        FileType::BlockDevice => {
            afs.mknod_block(&meta.name, meta.mode, meta.devmajor, meta.devminor)?;
        }
        FileType::Fifo => {
            afs.mkfifo(&meta.name, meta.mode)?;
        }
        FileType::Socket => match afs.mksock(&meta.name, meta.mode) {
            Ok(()) => {}
            Err(FsError::Permission { .. }) => {
                warn!(path = %meta.name, "cannot create socket node without privileges, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        },
    }

    if !skip_chown {
        let euid = nix::unistd::geteuid().as_raw();
        let egid = nix::unistd::getegid().as_raw();
        if meta.uid != euid || meta.gid != egid {
            afs.lchown(&meta.name, meta.uid, meta.gid)?;
        }
    }
    if meta.ftype != FileType::Symlink {
        // chmod after chown: chown clears setuid/setgid
        afs.chmod(&meta.name, meta.mode)?;
    }
    afs.set_times_nano(&meta.name, meta.mtime, meta.mtime_nsec, DEFAULT_TIME, 0)?;

    Ok(())
}

/// read one node back: its metadata, and a body reader for regular files
pub fn scan_file(afs: &RootedFs, path: &RelPath) -> Result<(Metadata, Option<File>), FsError> {
    let meta = afs.lstat(path)?;
    let body = match meta.ftype {
        FileType::Regular => Some(afs.open_read(path)?),
        _ => None,
    };
    Ok((meta, body))
}

/// guard that captures a directory's mtime and restores it on drop
///
/// used around operations that mutate a directory's contents (placing a
/// child bumps the parent's mtime). restoration is best-effort.
pub struct MtimeRepair {
    afs: RootedFs,
    path: RelPath,
    times: Option<(i64, u32)>,
}

impl MtimeRepair {
    pub fn capture(afs: &RootedFs, path: &RelPath) -> Self {
        let times = afs.lstat(path).ok().map(|m| (m.mtime, m.mtime_nsec));
        Self {
            afs: afs.clone(),
            path: path.clone(),
            times,
        }
    }
}

impl Drop for MtimeRepair {
    fn drop(&mut self) {
        if let Some((sec, nsec)) = self.times {
            let _ = self
                .afs
                .set_times_nano(&self.path, sec, nsec, DEFAULT_TIME, 0);
        }
    }
}
