use std::path::PathBuf;

/// The primary error type for all operations in the `splitcache` crate.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The archive could not be opened or its directory could not be parsed.
    #[error("archive '{}' is unreadable: {source}", path.display())]
    ArchiveUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A member the catalog promised is no longer present in the archive.
    #[error("member #{index} is missing from archive '{}'", archive.display())]
    MemberMissing { index: u32, archive: PathBuf },

    /// Every extraction attempt for a member failed.
    #[error("could not extract member #{index} to '{}' after {attempts} attempts", path.display())]
    ExtractionFailed {
        index: u32,
        path: PathBuf,
        attempts: u32,
        #[source]
        last: Option<Box<CacheError>>,
    },

    /// An existing artifact no longer matches the persisted record.
    #[error(
        "invalid artifact '{}': expected modification time {expected_time}, \
         found {actual_time}; expected crc {expected_crc}, found {actual_crc}",
        path.display()
    )]
    ChecksumMismatch {
        index: u32,
        path: PathBuf,
        expected_crc: i64,
        actual_crc: i64,
        expected_time: i64,
        actual_time: i64,
    },

    /// A recorded artifact does not exist on disk.
    #[error("missing artifact for member #{index}: '{}'", path.display())]
    ArtifactMissing { index: u32, path: PathBuf },

    /// A checksum could not be computed.
    #[error("checksum of '{}' failed: {source}", path.display())]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not lock '{}': {source}", path.display())]
    LockAcquisitionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not release lock '{}': {source}", path.display())]
    LockReleaseFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache record could not be written durably.
    #[error("could not persist cache record to '{}': {source}", path.display())]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache record exists but cannot be decoded.
    #[error("corrupt cache record '{}': {reason}", path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    /// A worker thread panicked while processing its group.
    #[error("worker for group {group} panicked")]
    WorkerPanicked { group: usize },

    /// The artifact consumer rejected the artifacts it was handed.
    #[error("artifact consumer failed: {0}")]
    Consumer(String),

    /// An I/O error, including the path where it happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io { path: path.into(), source }
    }

    /// Failures that only mean "the cache is stale", which the loader answers
    /// with a fresh extraction instead of surfacing.
    pub fn is_validity_failure(&self) -> bool {
        matches!(
            self,
            CacheError::ChecksumMismatch { .. }
                | CacheError::ArtifactMissing { .. }
                | CacheError::Checksum { .. }
                | CacheError::Io { .. }
                | CacheError::WorkerPanicked { .. }
        )
    }
}
