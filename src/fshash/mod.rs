use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;

use serde::Serialize;
use sha2::{Digest, Sha384};

use crate::error::{Result, RioError};
use crate::fs::metadata::{FileType, Metadata};
use crate::fs::path::RelPath;

/// digest length of sha-512/384
pub const HASH_LEN: usize = 48;

/// base58 text of a digest, as carried in ware ids
pub fn encode_hash(digest: &[u8]) -> String {
    bs58::encode(digest).into_string()
}

/// reader wrapper that hashes bytes as they stream through
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha384,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha384::new(),
        }
    }

    /// consume and return the content digest
    pub fn finish(self) -> Vec<u8> {
        self.hasher.finalize().to_vec()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// one accumulated record: normalized metadata plus, for regular files,
/// the sha-512/384 of the content stream
#[derive(Debug, Clone)]
pub struct Record {
    pub meta: Metadata,
    pub content_hash: Option<Vec<u8>>,
}

/// in-memory accumulator for one pack/unpack/scan call
///
/// records arrive in stream order; `finalize` sorts them into canonical
/// order and the result computes the merkle digest.
#[derive(Debug, Default)]
pub struct Bucket {
    records: Vec<Record>,
    names: HashSet<String>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, meta: Metadata, content_hash: Option<Vec<u8>>) {
        self.names.insert(meta.name.as_str().to_string());
        self.records.push(Record { meta, content_hash });
    }

    /// whether a record with this name has been added
    pub fn contains(&self, name: &RelPath) -> bool {
        self.names.contains(name.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// sort into canonical order, reject duplicates, conjure the root
    /// record if the stream left it implicit
    pub fn finalize(mut self, conjured_root: Metadata) -> Result<FinalizedBucket> {
        if !self.names.contains(".") {
            self.records.push(Record {
                meta: conjured_root,
                content_hash: None,
            });
        }
        self.records
            .sort_by(|a, b| a.meta.name.as_str().as_bytes().cmp(b.meta.name.as_str().as_bytes()));

        for w in self.records.windows(2) {
            if w[0].meta.name == w[1].meta.name {
                return Err(RioError::WareCorrupt(format!(
                    "corrupt tar: repeated filename {:?}",
                    w[0].meta.name.as_str()
                )));
            }
        }

        let mut index = HashMap::new();
        for (i, rec) in self.records.iter().enumerate() {
            index.insert(rec.meta.name.as_str().to_string(), i);
        }

        let mut children: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, rec) in self.records.iter().enumerate() {
            if rec.meta.name.is_root() {
                continue;
            }
            let parent = rec.meta.name.dir();
            let parent_idx = *index.get(parent.as_str()).ok_or_else(|| {
                RioError::WareCorrupt(format!(
                    "fileset has entry {:?} but no record for its parent {:?}",
                    rec.meta.name.as_str(),
                    parent.as_str()
                ))
            })?;
            if self.records[parent_idx].meta.ftype != FileType::Dir {
                return Err(RioError::WareCorrupt(format!(
                    "fileset entry {:?} is a child of non-directory {:?}",
                    rec.meta.name.as_str(),
                    parent.as_str()
                )));
            }
            children.entry(parent_idx).or_default().push(i);
        }

        let root = index["."];
        Ok(FinalizedBucket {
            records: self.records,
            children,
            index,
            root,
        })
    }
}

/// a bucket in canonical order, ready for hashing and post-pass walks
pub struct FinalizedBucket {
    records: Vec<Record>,
    children: BTreeMap<usize, Vec<usize>>,
    index: HashMap<String, usize>,
    root: usize,
}

impl FinalizedBucket {
    pub fn root(&self) -> &Record {
        &self.records[self.root]
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// directories in post-order (children before parents, root last)
    ///
    /// placing children bumps directory mtimes; this is the repair order.
    pub fn dirs_post_order(&self) -> Vec<&Record> {
        let mut out = Vec::new();
        self.collect_dirs(self.root, &mut out);
        out
    }

    fn collect_dirs<'a>(&'a self, idx: usize, out: &mut Vec<&'a Record>) {
        if let Some(kids) = self.children.get(&idx) {
            for &k in kids {
                self.collect_dirs(k, out);
            }
        }
        if self.records[idx].meta.ftype == FileType::Dir {
            out.push(&self.records[idx]);
        }
    }

    /// the canonical fileset digest: a merkle walk where each directory
    /// hashes its own record followed by its children's digests in name
    /// order, and each file hashes its record followed by its content hash
    pub fn hash(&self) -> Result<Vec<u8>> {
        self.node_digest(self.root)
    }

    fn node_digest(&self, idx: usize) -> Result<Vec<u8>> {
        let rec = &self.records[idx];
        let mut hasher = Sha384::new();
        hasher.update(canonical_record(&rec.meta)?);
        match rec.meta.ftype {
            FileType::Regular => {
                if let Some(h) = &rec.content_hash {
                    hasher.update(h);
                }
            }
            FileType::Hardlink => {
                hasher.update(self.hardlink_target_hash(rec)?);
            }
            FileType::Dir => {
                if let Some(kids) = self.children.get(&idx) {
                    for &k in kids {
                        hasher.update(self.node_digest(k)?);
                    }
                }
            }
            _ => {}
        }
        Ok(hasher.finalize().to_vec())
    }

    /// hardlinks bind the content hash of their target, which may appear
    /// anywhere in the stream; resolution happens here, after the stream
    /// is fully consumed
    fn hardlink_target_hash(&self, rec: &Record) -> Result<&[u8]> {
        let target = RelPath::new(&rec.meta.linkname).map_err(|e| {
            RioError::WareCorrupt(format!(
                "hardlink {:?} has invalid target: {}",
                rec.meta.name.as_str(),
                e
            ))
        })?;
        let target_idx = self.index.get(target.as_str()).ok_or_else(|| {
            RioError::WareCorrupt(format!(
                "hardlink {:?} references missing target {:?}",
                rec.meta.name.as_str(),
                target.as_str()
            ))
        })?;
        self.records[*target_idx]
            .content_hash
            .as_deref()
            .ok_or_else(|| {
                RioError::WareCorrupt(format!(
                    "hardlink {:?} references non-file target {:?}",
                    rec.meta.name.as_str(),
                    target.as_str()
                ))
            })
    }
}

/// canonical serialized form of one metadata record: a definite-length
/// cbor map with fields in fixed order (part of the compatibility
/// contract; any change reshuffles every ware id)
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    n: &'a str,
    t: &'static str,
    m: u32,
    u: u32,
    g: u32,
    tm: i64,
    tmn: u32,
    s: u64,
    ln: &'a str,
    dj: u32,
    dn: u32,
}

fn canonical_record(meta: &Metadata) -> Result<Vec<u8>> {
    let rec = CanonicalRecord {
        n: meta.name.as_str(),
        t: meta.ftype.tag(),
        m: meta.mode,
        u: meta.uid,
        g: meta.gid,
        tm: meta.mtime,
        tmn: meta.mtime_nsec,
        s: meta.size,
        ln: &meta.linkname,
        dj: meta.devmajor,
        dn: meta.devminor,
    };
    let mut buf = Vec::new();
    ciborium::into_writer(&rec, &mut buf)
        .map_err(|e| RioError::WareCorrupt(format!("record encoding failed: {}", e)))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::metadata::default_dir_metadata;

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    fn file_rec(name: &str, content: &[u8]) -> (Metadata, Option<Vec<u8>>) {
        let meta = Metadata {
            name: rel(name),
            ftype: FileType::Regular,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            mtime: 1432929215,
            mtime_nsec: 0,
            size: content.len() as u64,
            linkname: String::new(),
            devmajor: 0,
            devminor: 0,
        };
        let hash = Sha384::digest(content).to_vec();
        (meta, Some(hash))
    }

    fn dir_rec(name: &str) -> (Metadata, Option<Vec<u8>>) {
        let mut meta = default_dir_metadata(rel(name));
        meta.mtime = 1432929215;
        (meta, None)
    }

    fn hash_of(entries: Vec<(Metadata, Option<Vec<u8>>)>) -> Vec<u8> {
        let mut bucket = Bucket::new();
        for (m, h) in entries {
            bucket.add_record(m, h);
        }
        bucket
            .finalize(default_dir_metadata(RelPath::root()))
            .unwrap()
            .hash()
            .unwrap()
    }

    #[test]
    fn test_hash_deterministic() {
        let a = hash_of(vec![dir_rec("."), file_rec("ab", b"x"), dir_rec("bc")]);
        let b = hash_of(vec![dir_rec("."), file_rec("ab", b"x"), dir_rec("bc")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_LEN);
    }

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let a = hash_of(vec![dir_rec("."), file_rec("ab", b"x"), dir_rec("bc")]);
        let b = hash_of(vec![dir_rec("bc"), dir_rec("."), file_rec("ab", b"x")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_sensitive_to_content() {
        let a = hash_of(vec![dir_rec("."), file_rec("ab", b"x")]);
        let b = hash_of(vec![dir_rec("."), file_rec("ab", b"y")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_sensitive_to_metadata() {
        let (mut m, h) = file_rec("ab", b"x");
        m.mode = 0o600;
        let a = hash_of(vec![dir_rec("."), (m, h)]);
        let b = hash_of(vec![dir_rec("."), file_rec("ab", b"x")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_root_conjured_when_missing() {
        let mut bucket = Bucket::new();
        let (m, h) = file_rec("ab", b"x");
        bucket.add_record(m, h);
        let fin = bucket
            .finalize(default_dir_metadata(RelPath::root()))
            .unwrap();
        assert!(fin.root().meta.name.is_root());
        assert_eq!(fin.root().meta.mode, 0o755);
        fin.hash().unwrap();
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut bucket = Bucket::new();
        let (m, h) = file_rec("ab", b"x");
        bucket.add_record(m.clone(), h.clone());
        bucket.add_record(m, h);
        let err = match bucket.finalize(default_dir_metadata(RelPath::root())) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::WareCorrupt(_)));
    }

    #[test]
    fn test_missing_parent_rejected() {
        let mut bucket = Bucket::new();
        let (m, h) = file_rec("lost/child", b"x");
        bucket.add_record(m, h);
        let err = match bucket.finalize(default_dir_metadata(RelPath::root())) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, RioError::WareCorrupt(_)));
    }

    #[test]
    fn test_hardlink_resolves_target_ahead_in_stream() {
        // hardlink arrives before its target, like tar allows
        let link = Metadata {
            name: rel("link"),
            ftype: FileType::Hardlink,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            mtime: 1432929215,
            mtime_nsec: 0,
            size: 0,
            linkname: "zz-target".to_string(),
            devmajor: 0,
            devminor: 0,
        };
        let mut bucket = Bucket::new();
        bucket.add_record(link, None);
        let (m, h) = file_rec("zz-target", b"shared");
        bucket.add_record(m, h);
        let fin = bucket
            .finalize(default_dir_metadata(RelPath::root()))
            .unwrap();
        fin.hash().unwrap();
    }

    #[test]
    fn test_hardlink_dangling_target_rejected() {
        let link = Metadata {
            name: rel("link"),
            ftype: FileType::Hardlink,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            mtime: 1432929215,
            mtime_nsec: 0,
            size: 0,
            linkname: "nowhere".to_string(),
            devmajor: 0,
            devminor: 0,
        };
        let mut bucket = Bucket::new();
        bucket.add_record(link, None);
        let fin = bucket
            .finalize(default_dir_metadata(RelPath::root()))
            .unwrap();
        let err = fin.hash().unwrap_err();
        assert!(matches!(err, RioError::WareCorrupt(_)));
    }

    #[test]
    fn test_dirs_post_order() {
        let mut bucket = Bucket::new();
        for (m, h) in [
            dir_rec("."),
            dir_rec("a"),
            dir_rec("a/b"),
            file_rec("a/b/f", b"x"),
            dir_rec("c"),
        ] {
            bucket.add_record(m, h);
        }
        let fin = bucket
            .finalize(default_dir_metadata(RelPath::root()))
            .unwrap();
        let order: Vec<&str> = fin
            .dirs_post_order()
            .iter()
            .map(|r| r.meta.name.as_str())
            .collect();
        assert_eq!(order, vec!["a/b", "a", "c", "."]);
    }

    #[test]
    fn test_hashing_reader() {
        let mut hr = HashingReader::new(&b"hello world"[..]);
        let mut out = Vec::new();
        hr.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(hr.finish(), Sha384::digest(b"hello world").to_vec());
    }

    #[test]
    fn test_encode_hash_base58() {
        // leading zero bytes become leading '1's in the bitcoin alphabet
        assert_eq!(encode_hash(&[0, 0, 1]), "112");
    }
}
