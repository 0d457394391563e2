use crate::error::FsError;
use crate::fs::metadata::{FileType, Metadata};
use crate::fs::path::RelPath;
use crate::fs::rooted::RootedFs;

/// depth-first walk over a rooted filesystem in sorted order
///
/// `pre` sees every node before its children (directories before their
/// contents, which is pack order); `post` sees it after. sibling order is
/// raw byte comparison of names.
pub fn walk<E, Pre, Post>(afs: &RootedFs, pre: &mut Pre, post: &mut Post) -> Result<(), E>
where
    E: From<FsError>,
    Pre: FnMut(&Metadata) -> Result<(), E>,
    Post: FnMut(&Metadata) -> Result<(), E>,
{
    walk_node(afs, &RelPath::root(), pre, post)
}

fn walk_node<E, Pre, Post>(
    afs: &RootedFs,
    path: &RelPath,
    pre: &mut Pre,
    post: &mut Post,
) -> Result<(), E>
where
    E: From<FsError>,
    Pre: FnMut(&Metadata) -> Result<(), E>,
    Post: FnMut(&Metadata) -> Result<(), E>,
{
    let meta = afs.lstat(path)?;
    pre(&meta)?;
    if meta.ftype == FileType::Dir {
        for name in afs.read_dir_names(path)? {
            walk_node(afs, &path.join(&name), pre, post)?;
        }
    }
    post(&meta)
}
