//! Cross-process exclusive lock on the cache directory.
//!
//! Validity check, extraction and record persistence must all happen while
//! the lock is held. Otherwise two processes starting at once can end up with
//! one deleting artifacts the other has just written.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;

use fs4::FileExt;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// Well-known lock file inside every cache directory.
pub const LOCK_FILENAME: &str = "splitcache.lock";

/// An acquired advisory lock. Unlocked by [`ProcessLock::release`] or on drop.
#[derive(Debug)]
pub struct ProcessLock {
    file: Option<File>,
    path: PathBuf,
}

impl ProcessLock {
    /// Block until the cache directory's lock is ours.
    pub fn acquire(cache_dir: &Path) -> Result<Self> {
        let path = cache_dir.join(LOCK_FILENAME);
        let failed = |source| CacheError::LockAcquisitionFailed {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(cache_dir).map_err(failed)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(failed)?;

        let start = Instant::now();
        file.lock_exclusive().map_err(failed)?;
        debug!(
            path = %path.display(),
            waited_ms = start.elapsed().as_millis() as u64,
            "cache lock acquired"
        );

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock explicitly so the caller can see a release failure.
    pub fn release(mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => {
                FileExt::unlock(&file).map_err(|source| CacheError::LockReleaseFailed {
                    path: self.path.clone(),
                    source,
                })?;
                debug!(path = %self.path.display(), "cache lock released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(path = %self.path.display(), error = %e, "failed to release cache lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("nested/cache");
        let lock = ProcessLock::acquire(&cache).unwrap();
        assert!(cache.join(LOCK_FILENAME).is_file());
        lock.release().unwrap();
    }

    #[test]
    fn second_holder_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().to_path_buf();
        let first = ProcessLock::acquire(&cache).unwrap();
        let released = Arc::new(AtomicBool::new(false));

        let waiter = {
            let cache = cache.clone();
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let lock = ProcessLock::acquire(&cache).unwrap();
                let saw_release = released.load(Ordering::SeqCst);
                drop(lock);
                saw_release
            })
        };

        thread::sleep(Duration::from_millis(150));
        released.store(true, Ordering::SeqCst);
        first.release().unwrap();

        assert!(waiter.join().unwrap(), "second lock was granted while the first was held");
    }
}
