use std::io::{Read, Write};

use crate::error::{Result, RioError};
use crate::fs::metadata::{FileType, Metadata};
use crate::fs::path::RelPath;

/// map one decoded tar entry to normalized metadata
///
/// gnu long names and pax extensions are honored for names, link targets,
/// and nanosecond mtimes. unknown typeflags are a corrupt ware.
pub fn entry_to_metadata<R: Read>(entry: &mut tar::Entry<R>) -> Result<Metadata> {
    // pull what we need out of the pax extensions before borrowing the
    // header; values are copied because the iterator borrows the entry
    let mut pax_path: Option<String> = None;
    let mut pax_linkpath: Option<String> = None;
    let mut pax_mtime: Option<(i64, u32)> = None;
    if let Ok(Some(exts)) = entry.pax_extensions() {
        for ext in exts.flatten() {
            match (ext.key(), ext.value()) {
                (Ok("path"), Ok(v)) => pax_path = Some(v.to_string()),
                (Ok("linkpath"), Ok(v)) => pax_linkpath = Some(v.to_string()),
                (Ok("mtime"), Ok(v)) => pax_mtime = parse_pax_time(v),
                _ => {}
            }
        }
    }

    let size = entry.size();
    let header = entry.header();

    let ftype = match header.entry_type() {
        tar::EntryType::Regular => FileType::Regular,
        tar::EntryType::Directory => FileType::Dir,
        tar::EntryType::Symlink => FileType::Symlink,
        tar::EntryType::Link => FileType::Hardlink,
        tar::EntryType::Char => FileType::CharDevice,
        tar::EntryType::Block => FileType::BlockDevice,
        tar::EntryType::Fifo => FileType::Fifo,
        other => {
            return Err(RioError::WareCorrupt(format!(
                "corrupt tar: unsupported typeflag {:?}",
                other.as_byte() as char
            )))
        }
    };

    let raw_name = match pax_path {
        Some(p) => p,
        None => String::from_utf8(entry.path_bytes().into_owned()).map_err(|_| {
            RioError::WareCorrupt("corrupt tar: entry name is not valid utf-8".to_string())
        })?,
    };
    if raw_name.starts_with("..") || raw_name.starts_with('/') {
        return Err(RioError::WareCorrupt(
            "corrupt tar: paths that use '../' to leave the base dir are invalid".to_string(),
        ));
    }
    let name = RelPath::new(&raw_name)
        .map_err(|e| RioError::WareCorrupt(format!("corrupt tar: {}", e)))?;

    let linkname = match pax_linkpath {
        Some(p) => p,
        None => match entry.link_name_bytes() {
            Some(b) => String::from_utf8(b.into_owned()).map_err(|_| {
                RioError::WareCorrupt("corrupt tar: link target is not valid utf-8".to_string())
            })?,
            None => String::new(),
        },
    };

    let corrupt = |e: std::io::Error| RioError::WareCorrupt(format!("corrupt tar: {}", e));
    let mode = header.mode().map_err(corrupt)? & 0o7777;
    let uid = header.uid().map_err(corrupt)? as u32;
    let gid = header.gid().map_err(corrupt)? as u32;
    let (mtime, mtime_nsec) = match pax_mtime {
        Some(t) => t,
        None => (header.mtime().map_err(corrupt)? as i64, 0),
    };
    let devmajor = header.device_major().map_err(corrupt)?.unwrap_or(0);
    let devminor = header.device_minor().map_err(corrupt)?.unwrap_or(0);

    Ok(Metadata {
        name,
        ftype,
        mode,
        uid,
        gid,
        mtime,
        mtime_nsec,
        size: if ftype == FileType::Regular { size } else { 0 },
        linkname,
        devmajor,
        devminor,
    })
}

/// append one metadata record (and body, for files) to a tar stream
///
/// pax extension records are emitted ahead of the entry whenever the
/// mtime carries nanoseconds or a name/link target exceeds the 100-byte
/// ustar fields.
pub fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    meta: &Metadata,
    body: Option<&mut dyn Read>,
) -> Result<()> {
    let name = wire_name(meta);
    let mut pax: Vec<(&str, String)> = Vec::new();
    if meta.mtime_nsec != 0 {
        pax.push(("mtime", format!("{}.{:09}", meta.mtime, meta.mtime_nsec)));
    }
    if name.len() > 100 {
        pax.push(("path", name.clone()));
    }
    if meta.linkname.len() > 100 {
        pax.push(("linkpath", meta.linkname.clone()));
    }
    let wire_err =
        |e: std::io::Error| RioError::WarehouseUnavailable(format!("error writing tar stream: {}", e));
    if !pax.is_empty() {
        append_pax_header(builder, &pax).map_err(wire_err)?;
    }

    let mut header = tar::Header::new_ustar();
    header.set_entry_type(match meta.ftype {
        FileType::Regular => tar::EntryType::Regular,
        FileType::Dir => tar::EntryType::Directory,
        FileType::Symlink => tar::EntryType::Symlink,
        FileType::Hardlink => tar::EntryType::Link,
        FileType::CharDevice => tar::EntryType::Char,
        FileType::BlockDevice => tar::EntryType::Block,
        FileType::Fifo => tar::EntryType::Fifo,
        FileType::Socket => {
            return Err(RioError::InoperablePath(format!(
                "tar cannot represent socket {}",
                meta.name
            )))
        }
    });
    // set_path would normalize away "./" and trailing slashes, which are
    // the wire spelling for the root and for dirs; write the field raw
    // (names are pre-validated RelPaths, long ones ride in pax "path")
    let trunc = truncate_utf8(&name, 100);
    match header.as_ustar_mut() {
        Some(ustar) => {
            ustar.name = [0u8; 100];
            ustar.name[..trunc.len()].copy_from_slice(trunc.as_bytes());
        }
        None => header.set_path(trunc).map_err(wire_err)?,
    }
    header.set_mode(meta.mode);
    header.set_uid(meta.uid as u64);
    header.set_gid(meta.gid as u64);
    header.set_mtime(meta.mtime.max(0) as u64);
    header.set_size(if meta.ftype == FileType::Regular {
        meta.size
    } else {
        0
    });
    if !meta.linkname.is_empty() {
        // literal variant: symlink targets may legitimately be absolute
        // or contain '..', which the validating setter refuses
        header
            .set_link_name_literal(truncate_utf8(&meta.linkname, 100))
            .map_err(wire_err)?;
    }
    if matches!(meta.ftype, FileType::CharDevice | FileType::BlockDevice) {
        header.set_device_major(meta.devmajor).map_err(wire_err)?;
        header.set_device_minor(meta.devminor).map_err(wire_err)?;
    }
    header.set_cksum();

    match body {
        Some(r) => builder.append(&header, r).map_err(wire_err),
        None => builder.append(&header, std::io::empty()).map_err(wire_err),
    }
}

/// name as written to the wire: directories get a trailing slash, the
/// root is spelled "./"
fn wire_name(meta: &Metadata) -> String {
    if meta.name.is_root() {
        "./".to_string()
    } else if meta.ftype == FileType::Dir {
        format!("{}/", meta.name)
    } else {
        meta.name.as_str().to_string()
    }
}

fn append_pax_header<W: Write>(
    builder: &mut tar::Builder<W>,
    records: &[(&str, String)],
) -> std::io::Result<()> {
    let mut data = Vec::new();
    for (key, value) in records {
        // each record is "<len> <key>=<value>\n" where len counts itself
        let content_len = key.len() + value.len() + 3;
        let mut len = content_len + 1;
        while len != content_len + decimal_digits(len) {
            len = content_len + decimal_digits(len);
        }
        data.extend_from_slice(format!("{} {}={}\n", len, key, value).as_bytes());
    }

    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::XHeader);
    header.set_path("PaxHeaders/rio")?;
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(data.len() as u64);
    header.set_cksum();
    builder.append(&header, &data[..])
}

fn decimal_digits(mut n: usize) -> usize {
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

/// parse a pax time value like "1434941953.952227220" into (sec, nsec)
fn parse_pax_time(v: &str) -> Option<(i64, u32)> {
    match v.split_once('.') {
        Some((sec, frac)) => {
            let sec = sec.parse::<i64>().ok()?;
            let digits: String = frac.chars().filter(|c| c.is_ascii_digit()).collect();
            let mut padded = digits;
            padded.truncate(9);
            while padded.len() < 9 {
                padded.push('0');
            }
            let nsec = padded.parse::<u32>().ok()?;
            Some((sec, nsec))
        }
        None => Some((v.parse::<i64>().ok()?, 0)),
    }
}

/// longest prefix of `s` that fits `max` bytes on a char boundary
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
