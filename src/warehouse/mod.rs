use std::io::{Read, Write};

use tracing::warn;

use crate::error::{Result, RioError};
use crate::ware::WareID;

pub mod kvfs;
pub mod kvhttp;

pub use kvfs::KvFs;
pub use kvhttp::KvHttp;

/// a blob store addressable by uri
pub trait BlobstoreController {
    /// stream one ware out of the store
    fn open_reader(&self, ware: &WareID) -> Result<Box<dyn Read>>;

    /// begin streaming a ware in; the id is only known at commit time
    fn open_writer(&self) -> Result<Box<dyn WriteController>>;
}

/// an in-flight warehouse write; dropping without commit discards it
pub trait WriteController: Write {
    fn commit(self: Box<Self>, ware: &WareID) -> Result<()>;
}

/// dial a warehouse address
///
/// recognized schemes: `file`, `ca+file`, `http`, `ca+http`, `https`,
/// `ca+https`. the `ca+` prefix selects the content-addressed layout.
pub fn new_controller(addr: &str) -> Result<Box<dyn BlobstoreController>> {
    let (scheme, rest) = addr.split_once("://").ok_or_else(|| {
        RioError::Usage(format!("failed to parse URI {:?}: missing scheme", addr))
    })?;
    match scheme {
        "file" => Ok(Box::new(KvFs::new(rest, false)?)),
        "ca+file" => Ok(Box::new(KvFs::new(rest, true)?)),
        "http" | "https" => Ok(Box::new(KvHttp::new(addr, false)?)),
        "ca+http" | "ca+https" => {
            let url = addr.strip_prefix("ca+").unwrap_or(addr);
            Ok(Box::new(KvHttp::new(url, true)?))
        }
        _ => Err(RioError::Usage(format!(
            "unsupported warehouse scheme {:?} (valid options are 'file', 'ca+file', 'http', 'ca+http', 'https', or 'ca+https')",
            scheme
        ))),
    }
}

/// select a warehouse for reading: try each address in order, absorbing
/// unavailable stores and missing wares, and return the first reader
/// obtained
pub fn pick_reader(warehouses: &[String], ware: &WareID) -> Result<Box<dyn Read>> {
    let mut reader = None;
    for addr in warehouses {
        let ctrl = match new_controller(addr) {
            Ok(c) => c,
            Err(RioError::WarehouseUnavailable(msg)) => {
                warn!(addr = %addr, ware = %ware, "warehouse unavailable, skipping: {}", msg);
                continue;
            }
            Err(e) => return Err(e),
        };
        match ctrl.open_reader(ware) {
            Ok(r) => {
                reader = Some(r);
                break;
            }
            Err(RioError::WareNotFound(msg)) => {
                warn!(addr = %addr, ware = %ware, "ware not found, skipping: {}", msg);
                continue;
            }
            Err(RioError::WarehouseUnavailable(msg)) => {
                warn!(addr = %addr, ware = %ware, "warehouse unavailable, skipping: {}", msg);
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    reader.ok_or_else(|| RioError::WarehouseUnavailable("no warehouses were available!".to_string()))
}

/// relative path of a ware in the content-addressed layout:
/// `<hash[0:3]>/<hash[3:6]>/<hash>`
pub(crate) fn ca_rel_path(hash: &str) -> Result<String> {
    if hash.len() < 7 || !hash.is_ascii() {
        return Err(RioError::Usage(format!(
            "malformed ware hash {:?}",
            hash
        )));
    }
    Ok(format!("{}/{}/{}", &hash[..3], &hash[3..6], hash))
}
