use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::cancel::CancelToken;
use crate::error::{Result, RioError};
use crate::filter::{FilterPurpose, FilterSpec, Filters};
use crate::fs::metadata::FileType;
use crate::fs::path::RelPath;
use crate::fs::rooted::RootedFs;
use crate::fs::walk::walk;
use crate::fshash::{encode_hash, Bucket, HashingReader};
use crate::tartrans::codec::append_entry;
use crate::tartrans::unpack::consume_tar;
use crate::ware::{WareID, PACK_TYPE_TAR};
use crate::warehouse::{self, WriteController};

/// pack a fileset at `path` into a ware
///
/// the tree is walked in sorted pre-order; each node is filtered, encoded
/// onto the tar stream, and recorded in the bucket. with no target
/// warehouse this is a pure scan of local state: the stream is discarded
/// and only the ware id is computed.
pub fn pack(
    cancel: &CancelToken,
    pack_type: &str,
    path: &Path,
    spec: &FilterSpec,
    target_warehouse: Option<&str>,
) -> Result<WareID> {
    if pack_type != PACK_TYPE_TAR {
        return Err(RioError::Usage(format!(
            "this transmat implementation only supports packtype \"tar\" (not {:?})",
            pack_type
        )));
    }
    let filters = Filters::process(spec, FilterPurpose::Pack)?;

    let afs = RootedFs::new(path);
    let root = afs
        .lstat(&RelPath::root())
        .map_err(|e| RioError::InoperablePath(format!("cannot pack {}: {}", path.display(), e)))?;
    if root.ftype != FileType::Dir {
        return Err(RioError::InoperablePath(format!(
            "cannot pack {}: not a directory",
            path.display()
        )));
    }

    let ctrl: Box<dyn WriteController> = match target_warehouse {
        Some(addr) => warehouse::new_controller(addr)?.open_writer()?,
        None => Box::new(NullWriter),
    };
    let mut builder = tar::Builder::new(ctrl);
    let mut bucket = Bucket::new();
    let mut hardlinks = HardlinkTracker::default();

    walk::<RioError, _, _>(
        &afs,
        &mut |meta| {
            cancel.check()?;
            let mut fmeta = meta.clone();
            filters.apply(&mut fmeta);

            if meta.ftype == FileType::Regular {
                // a file seen at an inode we already packed becomes a
                // hardlink record pointing at the first sighting
                if let Some(first) = hardlinks.check(&afs, &meta.name)? {
                    fmeta.ftype = FileType::Hardlink;
                    fmeta.linkname = first;
                    fmeta.size = 0;
                    append_entry(&mut builder, &fmeta, None)?;
                    bucket.add_record(fmeta, None);
                    return Ok(());
                }
                let file = afs.open_read(&meta.name)?;
                let mut hashing = HashingReader::new(file);
                append_entry(&mut builder, &fmeta, Some(&mut hashing))?;
                bucket.add_record(fmeta, Some(hashing.finish()));
            } else {
                append_entry(&mut builder, &fmeta, None)?;
                bucket.add_record(fmeta, None);
            }
            Ok(())
        },
        &mut |_| Ok(()),
    )?;

    let fin = bucket.finalize(root)?;
    let ware = WareID::new(PACK_TYPE_TAR, encode_hash(&fin.hash()?));

    let ctrl = builder.into_inner().map_err(|e| {
        RioError::WarehouseUnavailable(format!("error writing tar stream: {}", e))
    })?;
    ctrl.commit(&ware)?;
    if target_warehouse.is_some() {
        info!(ware = %ware, path = %path.display(), "fileset packed to warehouse");
    }
    Ok(ware)
}

/// compute the ware id of an externally-produced tar stream
///
/// equivalent to pack with the tree supplied as a tar from a warehouse,
/// and no warehouse write.
pub fn scan(
    cancel: &CancelToken,
    pack_type: &str,
    spec: &FilterSpec,
    source: Option<&str>,
) -> Result<WareID> {
    if pack_type != PACK_TYPE_TAR {
        return Err(RioError::Usage(format!(
            "this transmat implementation only supports packtype \"tar\" (not {:?})",
            pack_type
        )));
    }
    let filters = Filters::process(spec, FilterPurpose::Pack)?;
    let addr = source.ok_or_else(|| {
        RioError::Usage("scan requires a --source address naming the data stream".to_string())
    })?;

    // the blob is named by the address itself; no hash is known yet
    let ctrl = warehouse::new_controller(addr)?;
    let reader = ctrl.open_reader(&WareID::new(PACK_TYPE_TAR, ""))?;
    consume_tar(cancel, None, &filters, reader)
}

/// discards the tar stream; used when pack has no target warehouse
struct NullWriter;

impl Write for NullWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl WriteController for NullWriter {
    fn commit(self: Box<Self>, _ware: &WareID) -> Result<()> {
        Ok(())
    }
}

/// maps (device, inode) of multiply-linked files to the first fileset
/// path they were packed under
#[derive(Default)]
struct HardlinkTracker {
    seen: HashMap<(u64, u64), String>,
}

impl HardlinkTracker {
    /// returns the earlier path if this node shares an inode with one
    /// already packed; otherwise remembers it
    fn check(&mut self, afs: &RootedFs, name: &RelPath) -> Result<Option<String>> {
        use std::os::unix::fs::MetadataExt;
        let native = afs.native(name);
        let meta = std::fs::symlink_metadata(&native)
            .map_err(|e| crate::error::FsError::from_io(&native, e))?;
        if meta.nlink() <= 1 {
            return Ok(None);
        }
        let key = (meta.dev(), meta.ino());
        match self.seen.get(&key) {
            Some(first) => Ok(Some(first.clone())),
            None => {
                self.seen.insert(key, name.as_str().to_string());
                Ok(None)
            }
        }
    }
}
