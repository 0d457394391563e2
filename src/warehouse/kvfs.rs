use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Result, RioError};
use crate::warehouse::{ca_rel_path, BlobstoreController, WriteController};
use crate::ware::WareID;

/// filesystem-backed blob store
///
/// a `ca+file://` base is a directory holding the content-addressed
/// layout. a plain `file://` base is either a directory holding wares
/// keyed by hash, or a single file that is itself the ware.
pub struct KvFs {
    base: PathBuf,
    ca: bool,
}

impl KvFs {
    pub fn new(path: &str, ca: bool) -> Result<Self> {
        let base = PathBuf::from(path);
        let reachable = if ca {
            base.is_dir()
        } else {
            // writes may create the single-file form, so the parent
            // being present is enough
            base.exists() || base.parent().map(Path::is_dir).unwrap_or(false)
        };
        if !reachable {
            return Err(RioError::WarehouseUnavailable(format!(
                "warehouse unavailable: {} does not exist",
                base.display()
            )));
        }
        Ok(Self { base, ca })
    }

    fn ware_path(&self, ware: &WareID) -> Result<PathBuf> {
        if self.ca {
            Ok(self.base.join(ca_rel_path(ware.hash())?))
        } else if self.base.is_dir() {
            Ok(self.base.join(ware.hash()))
        } else {
            Ok(self.base.clone())
        }
    }

    /// directory that temp files and committed wares land in
    fn write_dir(&self) -> PathBuf {
        if self.ca || self.base.is_dir() {
            self.base.clone()
        } else {
            self.base
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        }
    }
}

impl BlobstoreController for KvFs {
    fn open_reader(&self, ware: &WareID) -> Result<Box<dyn Read>> {
        let path = self.ware_path(ware)?;
        match File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RioError::WareNotFound(
                format!("ware {} not found in warehouse at {}", ware, self.base.display()),
            )),
            Err(e) => Err(RioError::WarehouseUnavailable(format!(
                "warehouse at {} unreadable: {}",
                self.base.display(),
                e
            ))),
        }
    }

    fn open_writer(&self) -> Result<Box<dyn WriteController>> {
        let dir = self.write_dir();
        let tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&dir)
            .map_err(|e| {
                RioError::WarehouseUnavailable(format!(
                    "cannot stage write in warehouse at {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        Ok(Box::new(KvFsWriter {
            base: self.base.clone(),
            ca: self.ca,
            tmp,
        }))
    }
}

/// streams into a temp sibling; commit renames to the final path so
/// interrupted packs never leave partial wares
pub struct KvFsWriter {
    base: PathBuf,
    ca: bool,
    tmp: NamedTempFile,
}

impl Write for KvFsWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.tmp.flush()
    }
}

impl WriteController for KvFsWriter {
    fn commit(self: Box<Self>, ware: &WareID) -> Result<()> {
        let dest = if self.ca {
            self.base.join(ca_rel_path(ware.hash())?)
        } else if self.base.is_dir() {
            self.base.join(ware.hash())
        } else {
            self.base.clone()
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RioError::WarehouseUnavailable(format!(
                    "cannot create warehouse path {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        self.tmp.persist(&dest).map_err(|e| {
            RioError::WarehouseUnavailable(format!(
                "cannot commit ware to {}: {}",
                dest.display(),
                e
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ware() -> WareID {
        WareID::new("tar", "5y6NvK6GBPQ6CcuNyJyWtSrMAJQ4LVrAcZSoCRAzMSk5o")
    }

    #[test]
    fn test_dir_store_write_then_read() {
        let dir = tempdir().unwrap();
        let store = KvFs::new(dir.path().to_str().unwrap(), false).unwrap();

        let mut w = store.open_writer().unwrap();
        w.write_all(b"ware bytes").unwrap();
        w.commit(&ware()).unwrap();

        let mut r = store.open_reader(&ware()).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ware bytes");
        assert!(dir.path().join(ware().hash()).is_file());
    }

    #[test]
    fn test_ca_store_layout() {
        let dir = tempdir().unwrap();
        let store = KvFs::new(dir.path().to_str().unwrap(), true).unwrap();

        let mut w = store.open_writer().unwrap();
        w.write_all(b"x").unwrap();
        w.commit(&ware()).unwrap();

        let hash = ware().hash().to_string();
        let expect = dir
            .path()
            .join(&hash[..3])
            .join(&hash[3..6])
            .join(&hash);
        assert!(expect.is_file());
        store.open_reader(&ware()).unwrap();
    }

    #[test]
    fn test_single_file_store_read() {
        let dir = tempdir().unwrap();
        let ware_file = dir.path().join("fixture.tgz");
        fs::write(&ware_file, b"blob").unwrap();

        let store = KvFs::new(ware_file.to_str().unwrap(), false).unwrap();
        let mut r = store.open_reader(&ware()).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"blob");
    }

    #[test]
    fn test_missing_ware_is_not_found() {
        let dir = tempdir().unwrap();
        let store = KvFs::new(dir.path().to_str().unwrap(), false).unwrap();
        let err = match store.open_reader(&ware()) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::WareNotFound(_)));
    }

    #[test]
    fn test_missing_base_is_unavailable() {
        let err = match KvFs::new("/definitely/not/a/real/base/dir", false) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::WarehouseUnavailable(_)));
        let err = match KvFs::new("/also/not/real", true) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::WarehouseUnavailable(_)));
    }

    #[test]
    fn test_uncommitted_write_leaves_nothing() {
        let dir = tempdir().unwrap();
        let store = KvFs::new(dir.path().to_str().unwrap(), false).unwrap();
        {
            let mut w = store.open_writer().unwrap();
            w.write_all(b"partial").unwrap();
            // dropped without commit
        }
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(names.is_empty());
    }
}
