use std::path::Path;

use crate::cancel::CancelToken;
use crate::error::{Result, RioError};
use crate::filter::FilterSpec;
use crate::placer::PlacementMode;
use crate::tartrans;
use crate::ware::WareID;

/// pack a fileset at a path into a ware, optionally pushing it to a
/// warehouse
pub type PackFn =
    fn(&CancelToken, &str, &Path, &FilterSpec, Option<&str>) -> Result<WareID>;

/// unpack a ware to a path via the cache and a placement mode
pub type UnpackFn = fn(
    &CancelToken,
    &WareID,
    &Path,
    &FilterSpec,
    PlacementMode,
    &[String],
    &Path,
) -> Result<WareID>;

/// compute the ware id of an externally-produced stream
pub type ScanFn = fn(&CancelToken, &str, &FilterSpec, Option<&str>) -> Result<WareID>;

/// demux the pack tool for a pack type; the dispatch tables here are the
/// extension point for additional transmats
pub fn pack_tool(pack_type: &str) -> Result<PackFn> {
    match pack_type {
        "tar" => Ok(tartrans::pack),
        _ => Err(RioError::Usage(format!(
            "unsupported packtype {:?}",
            pack_type
        ))),
    }
}

pub fn unpack_tool(pack_type: &str) -> Result<UnpackFn> {
    match pack_type {
        "tar" => Ok(tartrans::unpack),
        _ => Err(RioError::Usage(format!(
            "unsupported packtype {:?}",
            pack_type
        ))),
    }
}

pub fn scan_tool(pack_type: &str) -> Result<ScanFn> {
    match pack_type {
        "tar" => Ok(tartrans::scan),
        _ => Err(RioError::Usage(format!(
            "unsupported packtype {:?}",
            pack_type
        ))),
    }
}
