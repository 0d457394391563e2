use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::cache::Cache;
use crate::cancel::CancelToken;
use crate::error::{Result, RioError};
use crate::filter::{FilterPurpose, FilterSpec, Filters};
use crate::fs::metadata::{default_dir_metadata, FileType, DEFAULT_TIME};
use crate::fs::path::RelPath;
use crate::fs::place::place_file;
use crate::fs::rooted::RootedFs;
use crate::fshash::{encode_hash, Bucket, HashingReader};
use crate::placer::{self, PlacementMode};
use crate::tartrans::codec::entry_to_metadata;
use crate::tartrans::decompress::decompress;
use crate::ware::{WareID, PACK_TYPE_TAR};
use crate::warehouse;

/// unpack a ware into a fileset at `path`
///
/// the build itself is routed through the cache: a committed fileset for
/// this ware is reused, otherwise the ware is fetched, extracted into a
/// staging dir, hash-verified, and promoted. the placer then materializes
/// the committed fileset at the target.
pub fn unpack(
    cancel: &CancelToken,
    ware_id: &WareID,
    path: &Path,
    spec: &FilterSpec,
    placement: PlacementMode,
    warehouses: &[String],
    rio_base: &Path,
) -> Result<WareID> {
    if ware_id.pack_type() != PACK_TYPE_TAR {
        return Err(RioError::Usage(format!(
            "this transmat implementation only supports packtype \"tar\" (not {:?})",
            ware_id.pack_type()
        )));
    }
    let filters = Filters::process(spec, FilterPurpose::Unpack)?;

    let cache = Cache::new(rio_base);
    let committed = cache.unpack_cached(cancel, ware_id, |staging| {
        let reader = warehouse::pick_reader(warehouses, ware_id)?;
        let afs = RootedFs::new(staging);
        let got = consume_tar(cancel, Some(&afs), &filters, reader)?;
        if got != *ware_id {
            return Err(RioError::WareHashMismatch {
                expected: ware_id.clone(),
                actual: got,
            });
        }
        Ok(got)
    })?;

    cancel.check()?;
    match placement {
        PlacementMode::None => {}
        mode => {
            // the handle is deliberately dropped: an unpack leaves its
            // placement standing for the caller to use
            let _cleanup = placer::place(mode, &committed, path, true)?;
            info!(ware = %ware_id, path = %path.display(), mode = mode.as_str(), "fileset placed");
        }
    }
    Ok(ware_id.clone())
}

/// drive a tar stream into the bucket, and optionally onto a filesystem
///
/// this is the shared spine of unpack (with a filesystem) and scan
/// (without one). returns the ware id computed from the canonical digest.
pub(crate) fn consume_tar(
    cancel: &CancelToken,
    afs: Option<&RootedFs>,
    filters: &Filters,
    reader: impl Read,
) -> Result<WareID> {
    let reader = decompress(reader)
        .map_err(|e| RioError::WareCorrupt(format!("corrupt tar compression: {}", e)))?;
    let mut archive = tar::Archive::new(reader);
    let mut bucket = Bucket::new();

    let entries = archive
        .entries()
        .map_err(|e| RioError::WareCorrupt(format!("corrupt tar: {}", e)))?;
    for entry in entries {
        cancel.check()?;
        let mut entry = entry.map_err(|e| RioError::WareCorrupt(format!("corrupt tar: {}", e)))?;
        let mut fmeta = entry_to_metadata(&mut entry)?;
        filters.apply(&mut fmeta);

        // the tar format allows implicit parent dirs; conjure any that
        // are missing with defaulted metadata. collect bottom-up, then
        // place shallowest-first so each conjured dir is recorded before
        // its creation side-effects make deeper ones look present. if a
        // conjured dir shows up explicitly later, the bucket rejects the
        // repeat.
        let mut missing = Vec::new();
        let mut parent = fmeta.name.dir();
        while !parent.is_root() {
            let present = match afs {
                Some(afs) => afs.lstat(&parent).is_ok(),
                None => bucket.contains(&parent),
            };
            if present {
                // a present dir implies present ancestors
                break;
            }
            missing.push(parent.clone());
            parent = parent.dir();
        }
        for parent in missing.into_iter().rev() {
            let mut conjured = default_dir_metadata(parent);
            filters.apply(&mut conjured);
            if let Some(afs) = afs {
                place_file(afs, &conjured, None, false).map_err(|e| {
                    RioError::InoperablePath(format!("error while unpacking: {}", e))
                })?;
            }
            bucket.add_record(conjured, None);
        }

        match fmeta.ftype {
            FileType::Regular => {
                let mut hashing = HashingReader::new(&mut entry);
                match afs {
                    Some(afs) => {
                        place_file(afs, &fmeta, Some(&mut hashing), false).map_err(|e| {
                            RioError::InoperablePath(format!("error while unpacking: {}", e))
                        })?;
                    }
                    None => {
                        std::io::copy(&mut hashing, &mut std::io::sink()).map_err(|e| {
                            RioError::WareCorrupt(format!("corrupt tar: {}", e))
                        })?;
                    }
                }
                bucket.add_record(fmeta, Some(hashing.finish()));
            }
            _ => {
                if let Some(afs) = afs {
                    place_file(afs, &fmeta, None, false).map_err(|e| {
                        RioError::InoperablePath(format!("error while unpacking: {}", e))
                    })?;
                }
                bucket.add_record(fmeta, None);
            }
        }
    }

    let mut conjured_root = default_dir_metadata(RelPath::root());
    filters.apply(&mut conjured_root);
    let fin = bucket.finalize(conjured_root)?;

    if let Some(afs) = afs {
        // placing children bumped every dir's mtime; re-pave them in
        // post-order, then re-apply the root's full metadata (it may have
        // been conjured after its placement)
        for rec in fin.dirs_post_order() {
            afs.set_times_nano(
                &rec.meta.name,
                rec.meta.mtime,
                rec.meta.mtime_nsec,
                DEFAULT_TIME,
                0,
            )
            .map_err(|e| RioError::InoperablePath(format!("error while unpacking: {}", e)))?;
        }
        place_file(afs, &fin.root().meta, None, false)
            .map_err(|e| RioError::InoperablePath(format!("error while unpacking: {}", e)))?;
    }

    let hash = fin.hash()?;
    Ok(WareID::new(PACK_TYPE_TAR, encode_hash(&hash)))
}
