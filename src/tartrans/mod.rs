//! the tar transmat: pack, unpack, and scan for `tar:` wares

pub mod codec;
pub mod decompress;
pub mod pack;
pub mod unpack;

pub use pack::{pack, scan};
pub use unpack::unpack;
