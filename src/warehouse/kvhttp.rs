use std::io::Read;

use crate::error::{Result, RioError};
use crate::warehouse::{ca_rel_path, BlobstoreController, WriteController};
use crate::ware::WareID;

/// http(s)-backed blob store, read-only
///
/// a plain url names the ware blob directly; a `ca+` url is a base under
/// which the content-addressed layout is composed.
pub struct KvHttp {
    base: String,
    ca: bool,
    client: reqwest::blocking::Client,
}

impl KvHttp {
    pub fn new(url: &str, ca: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().build().map_err(|e| {
            RioError::WarehouseUnavailable(format!("cannot set up http client: {}", e))
        })?;
        Ok(Self {
            base: url.to_string(),
            ca,
            client,
        })
    }

    fn ware_url(&self, ware: &WareID) -> Result<String> {
        if self.ca {
            Ok(format!(
                "{}/{}",
                self.base.trim_end_matches('/'),
                ca_rel_path(ware.hash())?
            ))
        } else {
            Ok(self.base.clone())
        }
    }
}

impl BlobstoreController for KvHttp {
    fn open_reader(&self, ware: &WareID) -> Result<Box<dyn Read>> {
        let url = self.ware_url(ware)?;
        let resp = self.client.get(&url).send().map_err(|e| {
            RioError::WarehouseUnavailable(format!("warehouse at {} unreachable: {}", url, e))
        })?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RioError::WareNotFound(format!(
                "ware {} not found at {}",
                ware, url
            )));
        }
        if !status.is_success() {
            return Err(RioError::WarehouseUnavailable(format!(
                "warehouse at {} answered {}",
                url, status
            )));
        }
        Ok(Box::new(resp))
    }

    fn open_writer(&self) -> Result<Box<dyn WriteController>> {
        Err(RioError::WarehouseUnavailable(
            "http warehouses do not support writes".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_url_composition() {
        let store = KvHttp::new("https://warehouse.example/wares/", true).unwrap();
        let ware = WareID::new("tar", "5y6NvK6GBPQ6CcuNyJyWtSrMAJQ4LVrAcZSoCRAzMSk5o");
        assert_eq!(
            store.ware_url(&ware).unwrap(),
            "https://warehouse.example/wares/5y6/NvK/5y6NvK6GBPQ6CcuNyJyWtSrMAJQ4LVrAcZSoCRAzMSk5o"
        );
    }

    #[test]
    fn test_plain_url_is_the_ware() {
        let store = KvHttp::new("https://warehouse.example/some.tgz", false).unwrap();
        let ware = WareID::new("tar", "abc1234");
        assert_eq!(
            store.ware_url(&ware).unwrap(),
            "https://warehouse.example/some.tgz"
        );
    }

    #[test]
    fn test_writes_unsupported() {
        let store = KvHttp::new("https://warehouse.example/wares/", true).unwrap();
        let err = match store.open_writer() {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::WarehouseUnavailable(_)));
    }

    #[test]
    fn test_connection_refused_is_unavailable() {
        // port 1 is reserved and never listening
        let store = KvHttp::new("http://127.0.0.1:1/ware.tgz", false).unwrap();
        let ware = WareID::new("tar", "abc1234");
        let err = match store.open_reader(&ware) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::WarehouseUnavailable(_)));
    }
}
