//! Rebuilds the artifact list from a record that matched the archive.

use tracing::debug;

use crate::cache::{CacheRecord, MemberRecord};
use crate::checksum::ChecksumProvider;
use crate::common::{checksum_to_stored, Artifact};
use crate::error::{CacheError, Result};
use crate::extract::ArtifactLayout;
use crate::fsx;
use crate::workers::{balanced, group_count, run_groups, single, Weighed};

pub struct LoadVerifier<'a> {
    checksum: &'a dyn ChecksumProvider,
    layout: &'a ArtifactLayout,
    checksum_enabled: bool,
}

impl<'a> LoadVerifier<'a> {
    pub fn new(
        checksum: &'a dyn ChecksumProvider,
        layout: &'a ArtifactLayout,
        checksum_enabled: bool,
    ) -> Self {
        Self {
            checksum,
            layout,
            checksum_enabled,
        }
    }

    /// Check every recorded artifact and return them. Any single failure
    /// fails the whole reconstruction.
    ///
    /// With `concurrent` the checks are spread over at most `parallelism`
    /// balanced groups, weighted by artifact file size. Otherwise they run on
    /// the caller in index order.
    pub fn reconstruct(
        &self,
        record: &CacheRecord,
        concurrent: bool,
        parallelism: usize,
    ) -> Result<Vec<Artifact>> {
        let candidates: Vec<Weighed<(u32, MemberRecord)>> = record
            .members
            .iter()
            .map(|(&index, entry)| Weighed {
                item: (index, *entry),
                weight: fsx::metadata(self.layout.artifact_path(index))
                    .map(|m| m.len())
                    .unwrap_or(0),
            })
            .collect();

        let plan = if concurrent && candidates.len() > 1 {
            let k = group_count(parallelism, candidates.len());
            balanced(candidates, k)
        } else {
            single(candidates)
        };
        debug!(groups = plan.len(), members = record.members.len(), "verifying cached artifacts");

        run_groups(&plan, |_, items| {
            items
                .iter()
                .map(|w| self.check(w.item.0, &w.item.1))
                .collect()
        })
    }

    fn check(&self, index: u32, entry: &MemberRecord) -> Result<Artifact> {
        let path = self.layout.artifact_path(index);
        if !path.is_file() {
            return Err(CacheError::ArtifactMissing { index, path });
        }

        if !self.checksum_enabled {
            return Ok(Artifact {
                index,
                path,
                checksum: None,
                mod_time: entry.mod_time,
            });
        }

        let actual_crc = self
            .checksum
            .checksum_of_artifact(&path)
            .map_err(|source| CacheError::Checksum {
                path: path.clone(),
                source,
            })?;
        let actual_time = fsx::modified_millis(&path).map_err(|e| CacheError::io(&path, e))?;

        if entry.checksum != Some(actual_crc) || entry.mod_time != actual_time {
            return Err(CacheError::ChecksumMismatch {
                index,
                path,
                expected_crc: checksum_to_stored(entry.checksum),
                actual_crc: i64::from(actual_crc),
                expected_time: entry.mod_time,
                actual_time,
            });
        }

        Ok(Artifact {
            index,
            path,
            checksum: Some(actual_crc),
            mod_time: actual_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArchiveState;
    use crate::checksum::Crc32Checksum;
    use std::path::Path;

    struct Cached {
        _dir: tempfile::TempDir,
        layout: ArtifactLayout,
        record: CacheRecord,
    }

    /// Three artifacts on disk plus a matching record.
    fn cached() -> Cached {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(Path::new("app.apk"), dir.path(), ".dex");
        let artifacts: Vec<Artifact> = [(2u32, &b"aa"[..]), (3, &b"bbbb"[..]), (4, &b"c"[..])]
            .iter()
            .map(|(index, body)| {
                let path = layout.artifact_path(*index);
                std::fs::write(&path, body).unwrap();
                Artifact {
                    index: *index,
                    checksum: Some(crc32fast::hash(body)),
                    mod_time: fsx::modified_millis(&path).unwrap(),
                    path,
                }
            })
            .collect();
        let state = ArchiveState { mod_time: 1, checksum: 1 };
        let record = CacheRecord::from_artifacts(&state, &artifacts);
        Cached { _dir: dir, layout, record }
    }

    #[test]
    fn matching_artifacts_are_returned() {
        let c = cached();
        let verifier = LoadVerifier::new(&Crc32Checksum, &c.layout, true);
        for concurrent in [true, false] {
            let mut got = verifier.reconstruct(&c.record, concurrent, 4).unwrap();
            got.sort_by_key(|a| a.index);
            let indices: Vec<u32> = got.iter().map(|a| a.index).collect();
            assert_eq!(indices, vec![2, 3, 4]);
            assert_eq!(got[1].checksum, Some(crc32fast::hash(b"bbbb")));
        }
    }

    #[test]
    fn serial_reconstruction_keeps_index_order() {
        let c = cached();
        let verifier = LoadVerifier::new(&Crc32Checksum, &c.layout, true);
        let got = verifier.reconstruct(&c.record, false, 4).unwrap();
        let indices: Vec<u32> = got.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
    }

    #[test]
    fn missing_artifact_fails() {
        let c = cached();
        std::fs::remove_file(c.layout.artifact_path(3)).unwrap();
        let err = LoadVerifier::new(&Crc32Checksum, &c.layout, true)
            .reconstruct(&c.record, true, 4)
            .unwrap_err();
        assert!(matches!(err, CacheError::ArtifactMissing { index: 3, .. }));
    }

    #[test]
    fn tampered_artifact_fails() {
        let c = cached();
        let path = c.layout.artifact_path(4);
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::fs::write(&path, b"X").unwrap();
        // Same length, same mtime: only the checksum can tell.
        std::fs::File::options().write(true).open(&path).unwrap().set_modified(before).unwrap();

        let err = LoadVerifier::new(&Crc32Checksum, &c.layout, true)
            .reconstruct(&c.record, false, 1)
            .unwrap_err();
        match err {
            CacheError::ChecksumMismatch { index, expected_crc, actual_crc, .. } => {
                assert_eq!(index, 4);
                assert_eq!(expected_crc, i64::from(crc32fast::hash(b"c")));
                assert_eq!(actual_crc, i64::from(crc32fast::hash(b"X")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn disabled_checksum_only_requires_presence() {
        let c = cached();
        std::fs::write(c.layout.artifact_path(2), b"changed").unwrap();
        let got = LoadVerifier::new(&Crc32Checksum, &c.layout, false)
            .reconstruct(&c.record, false, 1)
            .unwrap();
        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|a| a.checksum.is_none()));
    }
}
