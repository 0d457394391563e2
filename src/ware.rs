use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RioError;

/// the tar pack type identifier
pub const PACK_TYPE_TAR: &str = "tar";

/// identity of a ware: a pack type plus the base58 hash of its canonical
/// fileset digest
///
/// stringified as `"<packType>:<base58hash>"`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WareID {
    pack_type: String,
    hash: String,
}

impl WareID {
    pub fn new(pack_type: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            pack_type: pack_type.into(),
            hash: hash.into(),
        }
    }

    /// parse from the wire form `"<packType>:<hash>"`
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        match s.split_once(':') {
            Some((t, h)) if !t.is_empty() && !h.is_empty() => Ok(Self::new(t, h)),
            _ => Err(RioError::Usage(format!(
                "malformed ware id {:?}: expected \"<packType>:<hash>\"",
                s
            ))),
        }
    }

    pub fn pack_type(&self) -> &str {
        &self.pack_type
    }

    /// the base58 hash text
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for WareID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pack_type, self.hash)
    }
}

impl fmt::Debug for WareID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WareID({}:{})", self.pack_type, self.hash)
    }
}

impl Serialize for WareID {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WareID {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let id = WareID::parse("tar:5y6NvK6GBPQ6CcuNyJyWtSrMAJQ4LVrAcZSoCRAzMSk5o").unwrap();
        assert_eq!(id.pack_type(), "tar");
        assert_eq!(id.hash(), "5y6NvK6GBPQ6CcuNyJyWtSrMAJQ4LVrAcZSoCRAzMSk5o");
        assert_eq!(
            id.to_string(),
            "tar:5y6NvK6GBPQ6CcuNyJyWtSrMAJQ4LVrAcZSoCRAzMSk5o"
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(WareID::parse("no-colon-here").is_err());
        assert!(WareID::parse(":hashonly").is_err());
        assert!(WareID::parse("tar:").is_err());
        assert!(WareID::parse("").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = WareID::new("tar", "abc123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"tar:abc123\"");
        let back: WareID = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
