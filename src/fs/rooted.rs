use std::ffi::CString;
use std::fs::{self, File, OpenOptions, Permissions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::libc;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};

use crate::error::{FsError, IoResultExt};
use crate::fs::metadata::Metadata;
use crate::fs::path::RelPath;

/// a filesystem view rooted at a directory
///
/// all operations take paths relative to the root. write operations refuse
/// to traverse symlinks on the way to their target and fail with
/// `FsError::Breakout` instead; this is best-effort only (concurrent
/// modification of the operational area cannot be defended against).
#[derive(Debug, Clone)]
pub struct RootedFs {
    root: PathBuf,
}

impl RootedFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// native path for a relpath, without breakout checks
    pub fn native(&self, path: &RelPath) -> PathBuf {
        if path.is_root() {
            self.root.clone()
        } else {
            self.root.join(path.as_native())
        }
    }

    /// native path for a write target: every strict ancestor inside the
    /// root is lstat'd, and any symlink among them is a breakout
    fn checked(&self, path: &RelPath) -> Result<PathBuf, FsError> {
        let mut walk = RelPath::root();
        let dir = path.dir();
        for comp in dir.components() {
            walk = walk.join(comp);
            let native = self.native(&walk);
            match fs::symlink_metadata(&native) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let target = fs::read_link(&native)
                        .map(|t| t.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    return Err(FsError::Breakout {
                        path: path.as_native().to_path_buf(),
                        area: self.root.clone(),
                        link: walk.as_native().to_path_buf(),
                        target,
                    });
                }
                // missing ancestors are fine, the caller creates them
                _ => {}
            }
        }
        Ok(self.native(path))
    }

    pub fn lstat(&self, path: &RelPath) -> Result<Metadata, FsError> {
        let native = self.native(path);
        let meta = fs::symlink_metadata(&native).with_path(&native)?;
        let mut out = Metadata::from_std(path.clone(), &meta);
        if meta.file_type().is_symlink() {
            out.linkname = fs::read_link(&native)
                .with_path(&native)?
                .to_string_lossy()
                .into_owned();
        }
        Ok(out)
    }

    /// directory entry names, sorted by raw byte comparison
    pub fn read_dir_names(&self, path: &RelPath) -> Result<Vec<String>, FsError> {
        let native = self.native(path);
        let mut names: Vec<String> = fs::read_dir(&native)
            .with_path(&native)?
            .collect::<std::io::Result<Vec<_>>>()
            .with_path(&native)?
            .into_iter()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        Ok(names)
    }

    pub fn mkdir(&self, path: &RelPath, mode: u32) -> Result<(), FsError> {
        let native = self.checked(path)?;
        fs::create_dir(&native).with_path(&native)?;
        fs::set_permissions(&native, Permissions::from_mode(mode & 0o7777)).with_path(&native)
    }

    /// create missing ancestors of a path with the given mode
    pub fn mkdir_all(&self, path: &RelPath, mode: u32) -> Result<(), FsError> {
        let mut walk = RelPath::root();
        for comp in path.components() {
            walk = walk.join(comp);
            match self.mkdir(&walk, mode) {
                Ok(()) => {}
                Err(FsError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn symlink(&self, path: &RelPath, target: &str) -> Result<(), FsError> {
        let native = self.checked(path)?;
        symlink(target, &native).with_path(&native)
    }

    /// hardlink `link` to an already-placed `target` inside the root
    pub fn hardlink(&self, link: &RelPath, target: &RelPath) -> Result<(), FsError> {
        let link_native = self.checked(link)?;
        let target_native = self.checked(target)?;
        fs::hard_link(&target_native, &link_native).with_path(&link_native)
    }

    pub fn mknod_char(
        &self,
        path: &RelPath,
        mode: u32,
        major: u32,
        minor: u32,
    ) -> Result<(), FsError> {
        self.mknod(path, SFlag::S_IFCHR, mode, major, minor)
    }

    pub fn mknod_block(
        &self,
        path: &RelPath,
        mode: u32,
        major: u32,
        minor: u32,
    ) -> Result<(), FsError> {
        self.mknod(path, SFlag::S_IFBLK, mode, major, minor)
    }

    pub fn mkfifo(&self, path: &RelPath, mode: u32) -> Result<(), FsError> {
        let native = self.checked(path)?;
        nix::unistd::mkfifo(&native, Mode::from_bits_truncate(mode))
            .map_err(|e| FsError::from_errno(&native, e))
    }

    /// socket nodes cannot be bound into existence; mknod is the closest
    /// representation and needs privileges
    pub fn mksock(&self, path: &RelPath, mode: u32) -> Result<(), FsError> {
        self.mknod(path, SFlag::S_IFSOCK, mode, 0, 0)
    }

    fn mknod(
        &self,
        path: &RelPath,
        sflag: SFlag,
        mode: u32,
        major: u32,
        minor: u32,
    ) -> Result<(), FsError> {
        let native = self.checked(path)?;
        let dev = makedev(major as u64, minor as u64);
        mknod(&native, sflag, Mode::from_bits_truncate(mode), dev)
            .map_err(|e| FsError::from_errno(&native, e))
    }

    pub fn open_read(&self, path: &RelPath) -> Result<File, FsError> {
        let native = self.native(path);
        File::open(&native).with_path(&native)
    }

    /// open a file for writing, creating or truncating it
    pub fn create_file(&self, path: &RelPath, mode: u32) -> Result<File, FsError> {
        let native = self.checked(path)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode & 0o7777)
            .open(&native)
            .with_path(&native)
    }

    pub fn chmod(&self, path: &RelPath, mode: u32) -> Result<(), FsError> {
        let native = self.native(path);
        fs::set_permissions(&native, Permissions::from_mode(mode & 0o7777)).with_path(&native)
    }

    /// change ownership without following symlinks
    pub fn lchown(&self, path: &RelPath, uid: u32, gid: u32) -> Result<(), FsError> {
        let native = self.native(path);
        let c_path = cpath(&native)?;
        let ret = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
        if ret != 0 {
            return Err(FsError::from_io(&native, std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// set mtime/atime with nanosecond precision, without following symlinks
    pub fn set_times_nano(
        &self,
        path: &RelPath,
        mtime: i64,
        mtime_nsec: u32,
        atime: i64,
        atime_nsec: u32,
    ) -> Result<(), FsError> {
        let native = self.native(path);
        let c_path = cpath(&native)?;
        let times = [
            libc::timespec {
                tv_sec: atime,
                tv_nsec: atime_nsec as libc::c_long,
            },
            libc::timespec {
                tv_sec: mtime,
                tv_nsec: mtime_nsec as libc::c_long,
            },
        ];
        let ret = unsafe {
            libc::utimensat(
                libc::AT_FDCWD,
                c_path.as_ptr(),
                times.as_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            )
        };
        if ret != 0 {
            return Err(FsError::from_io(&native, std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// remove a file, symlink, or empty directory
    pub fn remove(&self, path: &RelPath) -> Result<(), FsError> {
        let native = self.checked(path)?;
        let meta = fs::symlink_metadata(&native).with_path(&native)?;
        if meta.is_dir() {
            fs::remove_dir(&native).with_path(&native)
        } else {
            fs::remove_file(&native).with_path(&native)
        }
    }
}

fn cpath(path: &Path) -> Result<CString, FsError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| FsError::IoUnknown {
        msg: format!("{}: path contains a null byte", path.display()),
    })
}
