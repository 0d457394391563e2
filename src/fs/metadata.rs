use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use serde::{Deserialize, Serialize};

use crate::fs::path::RelPath;

/// fixed epoch used for defaulted mtimes and as the atime sentinel:
/// 2010-01-01T00:00:00Z
pub const DEFAULT_TIME: i64 = 1262304000;

/// node type enumeration
///
/// hardlinks only occur in streams and buckets; lstat never reports one
/// (on disk a hardlink is just another regular file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Regular,
    Dir,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileType {
    /// detect from std metadata (never yields Hardlink)
    pub fn from_std(meta: &fs::Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_file() {
            FileType::Regular
        } else if ft.is_dir() {
            FileType::Dir
        } else if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_socket() {
            FileType::Socket
        } else {
            // fallback, shouldn't happen
            FileType::Regular
        }
    }

    /// single-byte tag used in the canonical record encoding
    pub fn tag(&self) -> &'static str {
        match self {
            FileType::Regular => "f",
            FileType::Dir => "d",
            FileType::Symlink => "l",
            FileType::Hardlink => "h",
            FileType::CharDevice => "c",
            FileType::BlockDevice => "b",
            FileType::Fifo => "p",
            FileType::Socket => "s",
        }
    }
}

/// normalized metadata for one fileset node
///
/// this is the unit of both filesystem mutation and hashing; filters
/// rewrite it in-stream before it reaches either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: RelPath,
    pub ftype: FileType,
    /// permission bits plus setuid/setgid/sticky (masked to 0o7777)
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// mtime seconds since the unix epoch, utc
    pub mtime: i64,
    /// mtime nanosecond remainder
    pub mtime_nsec: u32,
    /// byte size; zero for non-regular nodes
    pub size: u64,
    /// symlink target, or hardlink target path relative to the fileset root
    pub linkname: String,
    pub devmajor: u32,
    pub devminor: u32,
}

impl Metadata {
    /// capture from an lstat result
    pub fn from_std(name: RelPath, meta: &fs::Metadata) -> Self {
        let ftype = FileType::from_std(meta);
        let (devmajor, devminor) = match ftype {
            FileType::CharDevice | FileType::BlockDevice => {
                let rdev = meta.rdev();
                (
                    nix::sys::stat::major(rdev) as u32,
                    nix::sys::stat::minor(rdev) as u32,
                )
            }
            _ => (0, 0),
        };
        Metadata {
            name,
            ftype,
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            mtime: meta.mtime(),
            mtime_nsec: meta.mtime_nsec() as u32,
            size: if ftype == FileType::Regular {
                meta.len()
            } else {
                0
            },
            linkname: String::new(),
            devmajor,
            devminor,
        }
    }
}

/// metadata conjured for directories a stream leaves implicit
pub fn default_dir_metadata(name: RelPath) -> Metadata {
    Metadata {
        name,
        ftype: FileType::Dir,
        mode: 0o755,
        uid: 0,
        gid: 0,
        mtime: DEFAULT_TIME,
        mtime_nsec: 0,
        size: 0,
        linkname: String::new(),
        devmajor: 0,
        devminor: 0,
    }
}
