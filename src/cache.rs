use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{Result, RioError};
use crate::ware::WareID;

/// content-addressed staging area for unpacked filesets
///
/// layout under the rio base dir:
///   cache/committed/<packType>/<hash>/   finalized filesets
///   cache/staging/<random>/              in-flight builds
///   cache/locks/<hash>.lock              per-ware flock files
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(rio_base: &Path) -> Self {
        Self {
            root: crate::config::cache_path(rio_base),
        }
    }

    /// where a committed fileset for this ware lives
    pub fn committed(&self, ware: &WareID) -> PathBuf {
        self.root
            .join("committed")
            .join(ware.pack_type())
            .join(ware.hash())
    }

    fn staging_base(&self) -> PathBuf {
        self.root.join("staging")
    }

    fn lock_path(&self, ware: &WareID) -> PathBuf {
        self.root.join("locks").join(format!("{}.lock", ware.hash()))
    }

    /// memoize an unpack: if the ware is already committed, skip the
    /// build; otherwise run `build` against a staging dir and atomically
    /// promote it. concurrent builds of the same ware serialize on a
    /// per-ware flock; the loser observes the winner's commit.
    pub fn unpack_cached(
        &self,
        cancel: &CancelToken,
        ware: &WareID,
        build: impl FnOnce(&Path) -> Result<WareID>,
    ) -> Result<PathBuf> {
        let committed = self.committed(ware);
        if committed.is_dir() {
            debug!(ware = %ware, "cache hit");
            return Ok(committed);
        }

        for dir in [
            self.root.join("committed").join(ware.pack_type()),
            self.staging_base(),
            self.root.join("locks"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                RioError::LocalCacheProblem(format!(
                    "cannot create cache dir {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let _lock = self.acquire_lock(cancel, ware)?;

        // the winner of the lock race may have committed while we waited
        if committed.is_dir() {
            debug!(ware = %ware, "cache hit after lock wait");
            return Ok(committed);
        }

        let staging = tempfile::Builder::new()
            .prefix("stg-")
            .tempdir_in(self.staging_base())
            .map_err(|e| {
                RioError::LocalCacheProblem(format!("cannot allocate staging dir: {}", e))
            })?;

        // build failure drops the tempdir, destroying the staging area
        let got = build(staging.path())?;
        debug!(ware = %ware, got = %got, "build complete, promoting staging dir");

        let staging_path = staging.keep();
        fs::rename(&staging_path, &committed).map_err(|e| {
            let _ = fs::remove_dir_all(&staging_path);
            RioError::LocalCacheProblem(format!(
                "cannot promote staging dir to {}: {}",
                committed.display(),
                e
            ))
        })?;
        Ok(committed)
    }

    fn acquire_lock(&self, cancel: &CancelToken, ware: &WareID) -> Result<Flock<File>> {
        let lock_path = self.lock_path(ware);
        loop {
            cancel.check()?;
            let file = File::create(&lock_path).map_err(|e| {
                RioError::LocalCacheProblem(format!(
                    "cannot open cache lock {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => return Ok(flock),
                Err((_, nix::errno::Errno::EWOULDBLOCK)) => {
                    // another build holds it; poll so cancellation stays live
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err((_, errno)) => {
                    return Err(RioError::LocalCacheProblem(format!(
                        "cannot lock {}: {}",
                        lock_path.display(),
                        errno
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ware() -> WareID {
        WareID::new("tar", "5y6NvK6GBPQ6CcuNyJyWtSrMAJQ4LVrAcZSoCRAzMSk5o")
    }

    #[test]
    fn test_miss_builds_and_commits() {
        let base = tempdir().unwrap();
        let cache = Cache::new(base.path());
        let cancel = CancelToken::new();

        let committed = cache
            .unpack_cached(&cancel, &ware(), |staging| {
                fs::write(staging.join("ab"), "content").unwrap();
                Ok(ware())
            })
            .unwrap();

        assert_eq!(committed, cache.committed(&ware()));
        assert_eq!(fs::read(committed.join("ab")).unwrap(), b"content");
    }

    #[test]
    fn test_hit_skips_build() {
        let base = tempdir().unwrap();
        let cache = Cache::new(base.path());
        let cancel = CancelToken::new();

        cache
            .unpack_cached(&cancel, &ware(), |staging| {
                fs::write(staging.join("ab"), "v1").unwrap();
                Ok(ware())
            })
            .unwrap();

        let mut built_again = false;
        let committed = cache
            .unpack_cached(&cancel, &ware(), |_| {
                built_again = true;
                Ok(ware())
            })
            .unwrap();

        assert!(!built_again);
        assert_eq!(fs::read(committed.join("ab")).unwrap(), b"v1");
    }

    #[test]
    fn test_build_failure_destroys_staging() {
        let base = tempdir().unwrap();
        let cache = Cache::new(base.path());
        let cancel = CancelToken::new();

        let err = cache
            .unpack_cached(&cancel, &ware(), |staging| {
                fs::write(staging.join("partial"), "x").unwrap();
                Err(RioError::WareCorrupt("boom".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, RioError::WareCorrupt(_)));

        // nothing promoted, staging cleaned
        assert!(!cache.committed(&ware()).exists());
        let staging_entries: Vec<_> = fs::read_dir(base.path().join("cache/staging"))
            .unwrap()
            .collect();
        assert!(staging_entries.is_empty());
    }

    #[test]
    fn test_cancelled_before_lock() {
        let base = tempdir().unwrap();
        let cache = Cache::new(base.path());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = cache
            .unpack_cached(&cancel, &ware(), |_| Ok(ware()))
            .unwrap_err();
        assert!(matches!(err, RioError::Cancelled));
    }

    #[test]
    fn test_concurrent_same_ware_builds_once() {
        let base = tempdir().unwrap();
        let base_path = base.path().to_path_buf();
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let base_path = base_path.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                let cache = Cache::new(&base_path);
                let cancel = CancelToken::new();
                cache
                    .unpack_cached(&cancel, &ware(), |staging| {
                        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        fs::write(staging.join("f"), "once").unwrap();
                        Ok(ware())
                    })
                    .unwrap()
            }));
        }
        let results: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }
}
