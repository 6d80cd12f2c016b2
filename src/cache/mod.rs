//! Persisted cache-validity record.
//!
//! The record is a flat key-value map:
//!
//! | key               | value                                        |
//! |-------------------|----------------------------------------------|
//! | `timestamp`       | archive modification time (epoch ms)         |
//! | `crc`             | archive checksum                             |
//! | `member.count`    | extra members + 1 for the primary content    |
//! | `member.crc.{i}`  | checksum of artifact `i`, `-1` if disabled   |
//! | `member.time.{i}` | modification time of artifact `i`            |
//!
//! Missing keys read as `-1` ("no value"), which never matches a real
//! timestamp or checksum, so a partial record is simply invalid. A
//! `member.count` claiming more members than the record has keys for is
//! rejected as corrupt.

mod backend;

pub use backend::{JsonFileBackend, RecordBackend, RecordMap};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::checksum::ChecksumProvider;
use crate::common::{
    checksum_from_stored, checksum_to_stored, Artifact, FIRST_MEMBER_INDEX, NO_VALUE,
};
use crate::error::{CacheError, Result};
use crate::fsx;

const KEY_TIME_STAMP: &str = "timestamp";
const KEY_CRC: &str = "crc";
const KEY_MEMBER_COUNT: &str = "member.count";
const KEY_MEMBER_CRC: &str = "member.crc.";
const KEY_MEMBER_TIME: &str = "member.time.";

/// Current identity of the archive on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveState {
    pub mod_time: i64,
    pub checksum: u32,
}

impl ArchiveState {
    pub fn read(path: &Path, checksum: &dyn ChecksumProvider) -> Result<Self> {
        let unreadable = |source| CacheError::ArchiveUnreadable {
            path: path.to_path_buf(),
            source,
        };
        let checksum = checksum.checksum_of_archive(path).map_err(unreadable)?;
        let mod_time = fsx::modified_millis(path).map_err(unreadable)?;
        Ok(Self { mod_time, checksum })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRecord {
    pub checksum: Option<u32>,
    pub mod_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub archive_mod_time: i64,
    pub archive_checksum: Option<u32>,
    /// Includes the primary content, so one more than `members.len()`.
    pub member_count: u32,
    pub members: BTreeMap<u32, MemberRecord>,
}

impl CacheRecord {
    pub fn from_artifacts(archive: &ArchiveState, artifacts: &[Artifact]) -> Self {
        let members = artifacts
            .iter()
            .map(|a| {
                (
                    a.index,
                    MemberRecord {
                        checksum: a.checksum,
                        mod_time: a.mod_time,
                    },
                )
            })
            .collect();
        Self {
            archive_mod_time: archive.mod_time,
            archive_checksum: Some(archive.checksum),
            member_count: artifacts.len() as u32 + 1,
            members,
        }
    }

    pub fn entry(&self, index: u32) -> Option<&MemberRecord> {
        self.members.get(&index)
    }

    /// One entry per member `2..=member_count`, nothing else.
    pub fn is_consistent(&self) -> bool {
        self.members.len() as u64 + 1 == u64::from(self.member_count)
            && self
                .members
                .keys()
                .copied()
                .eq(FIRST_MEMBER_INDEX..=self.member_count)
    }

    pub fn to_map(&self) -> RecordMap {
        let mut map = RecordMap::new();
        map.insert(KEY_TIME_STAMP.to_string(), self.archive_mod_time);
        map.insert(KEY_CRC.to_string(), checksum_to_stored(self.archive_checksum));
        map.insert(KEY_MEMBER_COUNT.to_string(), i64::from(self.member_count));
        for (index, m) in &self.members {
            map.insert(format!("{KEY_MEMBER_CRC}{index}"), checksum_to_stored(m.checksum));
            map.insert(format!("{KEY_MEMBER_TIME}{index}"), m.mod_time);
        }
        map
    }

    /// Decode a stored map. Fails with the reason when `member.count` names
    /// more members than there are per-member keys.
    pub fn from_map(map: &RecordMap) -> std::result::Result<Self, String> {
        let get = |key: &str| map.get(key).copied().unwrap_or(NO_VALUE);
        let member_count = u32::try_from(map.get(KEY_MEMBER_COUNT).copied().unwrap_or(1))
            .unwrap_or(1)
            .max(1);

        let member_keys = map
            .keys()
            .filter(|k| k.starts_with(KEY_MEMBER_CRC) || k.starts_with(KEY_MEMBER_TIME))
            .count();
        if (member_count - 1) as usize > member_keys {
            return Err(format!(
                "{KEY_MEMBER_COUNT} is {member_count} but only {member_keys} member keys exist"
            ));
        }

        let members = (FIRST_MEMBER_INDEX..=member_count)
            .map(|index| {
                (
                    index,
                    MemberRecord {
                        checksum: checksum_from_stored(get(&format!("{KEY_MEMBER_CRC}{index}"))),
                        mod_time: get(&format!("{KEY_MEMBER_TIME}{index}")),
                    },
                )
            })
            .collect();

        Ok(Self {
            archive_mod_time: get(KEY_TIME_STAMP),
            archive_checksum: checksum_from_stored(get(KEY_CRC)),
            member_count,
            members,
        })
    }
}

/// The persisted record plus the backend it lives in.
///
/// Read with [`CacheStore::refresh`] at the start of every load, replaced only
/// through [`CacheStore::commit`] after a fully successful extraction.
pub struct CacheStore {
    backend: Box<dyn RecordBackend>,
    record: Option<CacheRecord>,
}

impl CacheStore {
    pub fn new(backend: impl RecordBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            record: None,
        }
    }

    /// JSON record under `state_dir`, keyed by the archive's file name.
    pub fn json_file(state_dir: &Path, archive: &Path) -> Self {
        Self::new(JsonFileBackend::for_archive(state_dir, archive))
    }

    pub fn record(&self) -> Option<&CacheRecord> {
        self.record.as_ref()
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    /// Re-read the record. An unreadable or corrupt record is treated as absent.
    pub fn refresh(&mut self) {
        let decoded = self.backend.read().and_then(|map| match map {
            Some(map) => CacheRecord::from_map(&map)
                .map(Some)
                .map_err(|reason| CacheError::CorruptRecord {
                    path: PathBuf::from(self.backend.location()),
                    reason,
                }),
            None => Ok(None),
        });
        self.record = match decoded {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    location = %self.backend.location(),
                    error = %e,
                    "ignoring unreadable cache record"
                );
                None
            }
        };
    }

    pub fn is_valid(&self, archive: &ArchiveState) -> bool {
        match &self.record {
            Some(r) => {
                let valid = r.archive_mod_time == archive.mod_time
                    && r.archive_checksum == Some(archive.checksum);
                debug!(
                    valid,
                    stored_time = r.archive_mod_time,
                    current_time = archive.mod_time,
                    stored_crc = checksum_to_stored(r.archive_checksum),
                    current_crc = archive.checksum,
                    "cache record compared"
                );
                valid
            }
            None => false,
        }
    }

    /// Durably write `record`, then adopt it.
    pub fn commit(&mut self, record: CacheRecord) -> Result<()> {
        debug_assert!(record.is_consistent());
        self.backend.commit(&record.to_map())?;
        info!(
            location = %self.backend.location(),
            members = record.members.len(),
            "cache record persisted"
        );
        self.record = Some(record);
        Ok(())
    }
}
