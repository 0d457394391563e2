use std::io::{self, Cursor, Read};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = *b"BZh";
const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// wrap a ware stream with the decompressor its magic bytes call for
///
/// peeks at most 6 bytes. an unrecognized prefix is passthrough, not an
/// error: a bare tar is a valid ware.
pub fn decompress<'a, R: Read + 'a>(mut reader: R) -> io::Result<Box<dyn Read + 'a>> {
    let mut magic = [0u8; 6];
    let mut got = 0;
    while got < magic.len() {
        let n = reader.read(&mut magic[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    let head = &magic[..got];
    let rejoined = Cursor::new(head.to_vec()).chain(reader);

    Ok(if head.starts_with(&GZIP_MAGIC) {
        Box::new(flate2::read::GzDecoder::new(rejoined))
    } else if head.starts_with(&BZIP2_MAGIC) {
        Box::new(bzip2::read::BzDecoder::new(rejoined))
    } else if head.starts_with(&XZ_MAGIC) {
        Box::new(xz2::read::XzDecoder::new(rejoined))
    } else {
        Box::new(rejoined)
    })
}
