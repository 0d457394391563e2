use std::path::Path;

use crate::error::{Result, RioError};

pub mod copy;
pub mod direct;
pub mod mount;

pub use copy::copy_placer;
pub use direct::direct_placer;
pub use mount::mount_placer;

/// how an unpacked fileset is materialized at the target path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementMode {
    /// recursive copy from the cache; fully writable
    #[default]
    Copy,
    /// move out of the cache; consumes the cache entry
    Direct,
    /// bind-mount the cache dir at the target
    Mount,
    /// sentinel: fill the cache but leave the target untouched
    None,
}

impl PlacementMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "copy" => Ok(PlacementMode::Copy),
            "direct" => Ok(PlacementMode::Direct),
            "mount" => Ok(PlacementMode::Mount),
            "none" => Ok(PlacementMode::None),
            _ => Err(RioError::Usage(format!(
                "invalid placement mode {:?} (valid options are 'copy', 'direct', 'mount', or 'none')",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementMode::Copy => "copy",
            PlacementMode::Direct => "direct",
            PlacementMode::Mount => "mount",
            PlacementMode::None => "none",
        }
    }
}

/// handle for unwinding a placement; owned by the caller
///
/// unwinding is explicit, not drop-based: a cli invocation deliberately
/// leaks the handle so the placement persists.
pub struct Cleanup(Option<Box<dyn FnOnce() -> Result<()> + Send>>);

impl Cleanup {
    pub fn noop() -> Self {
        Cleanup(None)
    }

    pub fn new(f: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Cleanup(Some(Box::new(f)))
    }

    /// unwind the placement (unmount, remove copy, restore directory)
    pub fn undo(mut self) -> Result<()> {
        match self.0.take() {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

/// dispatch a placement by mode
///
/// `Placement_None` is handled by the caller (the target must not be
/// touched, not even stat'd); reaching it here is a driver bug.
pub fn place(mode: PlacementMode, src: &Path, dst: &Path, writable: bool) -> Result<Cleanup> {
    match mode {
        PlacementMode::Copy => copy_placer(src, dst),
        PlacementMode::Direct => direct_placer(src, dst),
        PlacementMode::Mount => mount_placer(src, dst, writable),
        PlacementMode::None => unreachable!("placement mode none never reaches the placers"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(PlacementMode::parse("copy").unwrap(), PlacementMode::Copy);
        assert_eq!(
            PlacementMode::parse("direct").unwrap(),
            PlacementMode::Direct
        );
        assert_eq!(PlacementMode::parse("mount").unwrap(), PlacementMode::Mount);
        assert_eq!(PlacementMode::parse("none").unwrap(), PlacementMode::None);
        assert!(matches!(
            PlacementMode::parse("teleport"),
            Err(RioError::Usage(_))
        ));
    }

    #[test]
    fn test_cleanup_noop() {
        Cleanup::noop().undo().unwrap();
    }

    #[test]
    fn test_cleanup_runs_once() {
        let cleanup = Cleanup::new(|| Ok(()));
        cleanup.undo().unwrap();
    }
}
