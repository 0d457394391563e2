use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// error for strings that do not normalize to a safe relative path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid relative path: {0}")]
pub struct InvalidPath(pub String);

/// a normalized relative path inside a fileset
///
/// invariants: forward slashes, no empty/`.`/`..` components, no leading
/// slash, no trailing slash. the fileset root is spelled `"."`.
///
/// ordering is raw byte comparison of the normalized string, which is the
/// canonical sibling ordering for hashing.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// the fileset root, `"."`
    pub fn root() -> Self {
        RelPath(".".to_string())
    }

    /// parse and normalize a path string
    ///
    /// leading `"./"` and trailing `"/"` are stripped (tar producers vary
    /// on both); anything absolute or containing `..` is rejected.
    pub fn new(s: &str) -> Result<Self, InvalidPath> {
        if s.starts_with('/') {
            return Err(InvalidPath(format!("{:?} is absolute", s)));
        }
        let mut t = s;
        while let Some(rest) = t.strip_prefix("./") {
            t = rest;
        }
        let t = t.trim_end_matches('/');
        if t.is_empty() || t == "." {
            return Ok(RelPath::root());
        }
        for comp in t.split('/') {
            match comp {
                "" => return Err(InvalidPath(format!("{:?} has an empty segment", s))),
                "." => return Err(InvalidPath(format!("{:?} has a '.' segment", s))),
                ".." => return Err(InvalidPath(format!("{:?} has a '..' segment", s))),
                c if c.contains('\0') => {
                    return Err(InvalidPath(format!("{:?} contains a null byte", s)))
                }
                _ => {}
            }
        }
        Ok(RelPath(t.to_string()))
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// parent path; the parent of the root is the root
    pub fn dir(&self) -> RelPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => RelPath(parent.to_string()),
            None => RelPath::root(),
        }
    }

    /// append one component (component must not contain separators)
    pub fn join(&self, name: &str) -> RelPath {
        debug_assert!(!name.is_empty() && !name.contains('/'));
        if self.is_root() {
            RelPath(name.to_string())
        } else {
            RelPath(format!("{}/{}", self.0, name))
        }
    }

    /// last component; `"."` for the root
    pub fn file_name(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    /// iterate components, root first excluded (empty for root)
    pub fn components(&self) -> impl Iterator<Item = &str> {
        let s: &str = if self.is_root() { "" } else { &self.0 };
        s.split('/').filter(|c| !c.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// view as a native path, suitable for joining onto a root dir
    pub fn as_native(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelPath({})", self.0)
    }
}

impl TryFrom<String> for RelPath {
    type Error = InvalidPath;
    fn try_from(s: String) -> Result<Self, InvalidPath> {
        RelPath::new(&s)
    }
}

impl From<RelPath> for String {
    fn from(p: RelPath) -> String {
        p.0
    }
}
