//! Common types shared by the catalog, the pipeline and the cache record.

use std::path::PathBuf;

/// "No value" marker used by the persisted record, and the value a
/// checksum or timestamp is never allowed to take.
pub const NO_VALUE: i64 = -1;

/// Index of the first extra member. Index 1 is the archive's primary content.
pub const FIRST_MEMBER_INDEX: u32 = 2;

/// Maximum extraction attempts per member.
pub const MAX_EXTRACT_ATTEMPTS: u32 = 3;

/// Size of reading buffers.
pub const BUFFER_SIZE: usize = 0x4000;

/// One payload inside the archive.
#[derive(Debug, Clone)]
pub struct Member {
    pub index: u32,
    pub byte_size: u64,
    /// Entry name inside the archive, e.g. `classes2.dex`.
    pub name: String,
    /// Stored modification time of the entry, if the container keeps one.
    pub modified: Option<zip::DateTime>,
}

/// The standalone file produced by extracting and verifying one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub index: u32,
    pub path: PathBuf,
    /// `None` when checksum verification is disabled.
    pub checksum: Option<u32>,
    /// Milliseconds since the Unix epoch.
    pub mod_time: i64,
}

/// Anything the partitioner can weigh.
pub trait Weighted {
    fn weight(&self) -> u64;
}

impl Weighted for Member {
    fn weight(&self) -> u64 {
        self.byte_size
    }
}

impl Weighted for u64 {
    fn weight(&self) -> u64 {
        *self
    }
}

/// Persisted checksum encoding: `NO_VALUE` when absent.
pub fn checksum_to_stored(checksum: Option<u32>) -> i64 {
    checksum.map_or(NO_VALUE, i64::from)
}

/// Inverse of [`checksum_to_stored`]; out-of-range values read as absent.
pub fn checksum_from_stored(value: i64) -> Option<u32> {
    u32::try_from(value).ok()
}
