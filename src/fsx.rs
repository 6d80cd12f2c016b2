//! Small filesystem helpers shared by the pipeline, the verifier and the
//! stale-file sweep.
//!
//! Timestamps are milliseconds since the Unix epoch so they round-trip through
//! the persisted record unchanged.

use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::NO_VALUE;

pub use std::fs::*;

/// Modification time of `path` in epoch milliseconds. Never returns
/// [`NO_VALUE`].
pub fn modified_millis(path: &Path) -> io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(never_no_value(system_time_millis(modified)))
}

fn system_time_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

fn never_no_value(v: i64) -> i64 {
    if v == NO_VALUE {
        v - 1
    } else {
        v
    }
}

/// Mark a file read-only for every user.
pub fn set_readonly(path: &Path) -> io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(path, perms)
}

/// Best-effort delete. Returns `true` when the file is gone afterwards.
pub fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete file");
            !path.exists()
        }
    }
}
