//! # Extraction Module
//!
//! Turns archive members into verified artifact files inside a cache
//! directory, and checks previously extracted artifacts against the
//! persisted record.
//!
//! - [`pipeline`]: per-member extract → verify state machine with retries.
//! - [`verify`]: rebuilds the artifact list from a valid record.
//! - [`sweep_stale`]: removes files that belong to no current artifact.

pub mod pipeline;
pub mod verify;

pub use pipeline::ExtractionPipeline;
pub use verify::LoadVerifier;

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::fsx;
use crate::lock::LOCK_FILENAME;

/// Appended to the archive file name to build the artifact prefix.
pub const EXTRACTED_NAME_EXT: &str = ".classes";

/// Temp files start with this so the sweep's prefix test never matches them.
pub const TEMP_PREFIX: &str = "tmp-";

/// Where artifacts of one archive live and how they are named.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    cache_dir: PathBuf,
    prefix: String,
    suffix: &'static str,
}

impl ArtifactLayout {
    pub fn new(archive: &Path, cache_dir: &Path, suffix: &'static str) -> Self {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            cache_dir: cache_dir.to_path_buf(),
            prefix: format!("{name}{EXTRACTED_NAME_EXT}"),
            suffix,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Every live artifact's file name starts with this.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &'static str {
        self.suffix
    }

    pub fn artifact_path(&self, index: u32) -> PathBuf {
        self.cache_dir
            .join(format!("{}{}{}", self.prefix, index, self.suffix))
    }

    pub fn temp_prefix(&self) -> String {
        format!("{TEMP_PREFIX}{}", self.prefix)
    }
}

/// Delete every file in the cache directory that is neither a current
/// artifact nor the lock file. Individual failures are logged and skipped.
///
/// Must only run while holding the process lock.
pub fn sweep_stale(layout: &ArtifactLayout) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(layout.cache_dir())
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(layout.prefix()) || name == LOCK_FILENAME {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        debug!(path = %entry.path().display(), size, "deleting stale file");
        if fsx::remove_quietly(entry.path()) {
            removed += 1;
        } else {
            warn!(path = %entry.path().display(), "failed to delete stale file");
        }
    }
    if removed > 0 {
        info!(removed, dir = %layout.cache_dir().display(), "stale files swept");
    }
    removed
}
