pub mod metadata;
pub mod path;
pub mod place;
pub mod rooted;
pub mod walk;

pub use metadata::{default_dir_metadata, FileType, Metadata, DEFAULT_TIME};
pub use path::{InvalidPath, RelPath};
pub use place::{place_file, scan_file, MtimeRepair};
pub use rooted::RootedFs;
pub use walk::walk;
