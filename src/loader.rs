//! The `load` entry point.
//!
//! Everything between acquiring and releasing the cache-directory lock runs in
//! `load_locked`: read the archive identity, consult the record, reuse or
//! re-extract, persist.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::archive::{ArchiveReader, MemberCatalog, ZipArchiveReader};
use crate::cache::{ArchiveState, CacheRecord, CacheStore};
use crate::checksum::{ChecksumProvider, Crc32Checksum};
use crate::common::{Artifact, Member};
use crate::config::{Config, OutputOrder};
use crate::error::Result;
use crate::extract::{sweep_stale, ArtifactLayout, ExtractionPipeline, LoadVerifier};
use crate::install::{install, ArtifactConsumer};
use crate::lock::ProcessLock;
use crate::workers::{balanced, group_count, single, PartitionPlan};

/// How the returned artifacts came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// The record matched and every artifact verified.
    Reused,
    /// No usable record, or a forced load.
    Extracted,
    /// The record matched but an artifact failed verification.
    Recovered,
}

impl fmt::Display for LoadOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadOrigin::Reused => "reused",
            LoadOrigin::Extracted => "extracted",
            LoadOrigin::Recovered => "recovered",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub artifacts: Vec<Artifact>,
    pub origin: LoadOrigin,
}

/// Extracts an archive's extra members into a cache directory, reusing a
/// previous extraction when the persisted record still matches.
pub struct Loader<R = ZipArchiveReader, C = Crc32Checksum> {
    config: Config,
    reader: R,
    checksum: C,
}

impl Loader {
    pub fn new(config: Config) -> Self {
        Self::with_collaborators(config, ZipArchiveReader, Crc32Checksum)
    }
}

impl<R: ArchiveReader, C: ChecksumProvider> Loader<R, C> {
    pub fn with_collaborators(config: Config, reader: R, checksum: C) -> Self {
        Self {
            config,
            reader,
            checksum,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Return the verified artifacts of `archive`, extracting them into
    /// `cache_dir` unless `store` holds a matching record. `force` always
    /// extracts.
    ///
    /// Serialised against other processes through the cache directory's
    /// lock. The record is persisted before the lock is released.
    pub fn load(
        &self,
        store: &mut CacheStore,
        archive: &Path,
        cache_dir: &Path,
        force: bool,
    ) -> Result<Loaded> {
        let start = Instant::now();
        let lock = ProcessLock::acquire(cache_dir)?;
        let outcome = self.load_locked(store, archive, cache_dir, force);
        let released = lock.release();

        match (outcome, released) {
            (Ok(loaded), Ok(())) => {
                info!(
                    archive = %archive.display(),
                    origin = %loaded.origin,
                    artifacts = loaded.artifacts.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "load finished"
                );
                Ok(loaded)
            }
            (Ok(_), Err(release)) => Err(release),
            (Err(e), Err(release)) => {
                warn!(error = %release, "lock release failed after an earlier error");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    /// [`load`](Self::load), then hand the artifacts to `consumer`.
    pub fn load_and_install<A: ArtifactConsumer>(
        &self,
        store: &mut CacheStore,
        archive: &Path,
        cache_dir: &Path,
        force: bool,
        consumer: &A,
    ) -> Result<(Loaded, Vec<A::Output>)> {
        let loaded = self.load(store, archive, cache_dir, force)?;
        let installed = install(&loaded.artifacts, consumer, self.config.parallel)?;
        Ok((loaded, installed))
    }

    /// Members of `archive` and the plan extraction would run them with.
    pub fn plan(&self, archive: &Path) -> Result<PartitionPlan<Member>> {
        let mut handle = self.reader.open(archive)?;
        let members = MemberCatalog::new(&self.config.naming).list(handle.as_mut())?;
        Ok(self.plan_members(members))
    }

    fn load_locked(
        &self,
        store: &mut CacheStore,
        archive: &Path,
        cache_dir: &Path,
        force: bool,
    ) -> Result<Loaded> {
        let state = ArchiveState::read(archive, &self.checksum)?;
        store.refresh();
        let layout = ArtifactLayout::new(archive, cache_dir, self.config.artifact_suffix());

        let mut origin = LoadOrigin::Extracted;
        if force {
            info!(archive = %archive.display(), "forced extraction");
        } else if let Some(record) = store.record().filter(|_| store.is_valid(&state)) {
            let verifier = LoadVerifier::new(&self.checksum, &layout, self.config.checksum_enabled);
            let concurrent = self.config.parallel && self.config.concurrent_reconstruction;
            match verifier.reconstruct(record, concurrent, self.config.parallelism()) {
                Ok(artifacts) => {
                    return Ok(Loaded {
                        artifacts: self.ordered(artifacts),
                        origin: LoadOrigin::Reused,
                    });
                }
                Err(e) => {
                    if e.is_validity_failure() {
                        info!(error = %e, "cached artifacts are stale, extracting again");
                    } else {
                        warn!(error = %e, "verifying cached artifacts failed, extracting again");
                    }
                    origin = LoadOrigin::Recovered;
                }
            }
        } else {
            debug!(location = %store.location(), "no matching cache record");
        }

        let artifacts = self.extract(archive, &layout)?;
        store.commit(CacheRecord::from_artifacts(&state, &artifacts))?;
        Ok(Loaded {
            artifacts: self.ordered(artifacts),
            origin,
        })
    }

    fn extract(&self, archive: &Path, layout: &ArtifactLayout) -> Result<Vec<Artifact>> {
        sweep_stale(layout);

        let plan = self.plan(archive)?;
        for (i, g) in plan.iter().enumerate() {
            debug!(group = i, plan = %g, "planned group");
        }

        let pipeline = ExtractionPipeline::new(
            archive,
            &self.reader,
            &self.checksum,
            &self.config.naming,
            layout,
            self.config.raw_format,
            self.config.checksum_enabled,
        );
        let artifacts = pipeline.extract_plan(&plan)?;
        info!(
            archive = %archive.display(),
            members = artifacts.len(),
            groups = plan.len(),
            "members extracted"
        );
        Ok(artifacts)
    }

    fn plan_members(&self, members: Vec<Member>) -> PartitionPlan<Member> {
        if self.config.parallel && members.len() > 1 {
            let k = group_count(self.config.parallelism(), members.len());
            balanced(members, k)
        } else {
            single(members)
        }
    }

    fn ordered(&self, mut artifacts: Vec<Artifact>) -> Vec<Artifact> {
        if self.config.output_order == OutputOrder::Index {
            artifacts.sort_by_key(|a| a.index);
        }
        artifacts
    }
}

impl<R, C> fmt::Debug for Loader<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::fs::File;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut w = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            w.start_file(*name, FileOptions::default()).unwrap();
            w.write_all(data).unwrap();
        }
        w.finish().unwrap();
    }

    #[test]
    fn plan_covers_every_member() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("app.apk");
        write_zip(
            &archive,
            &[
                ("classes.dex", b"m"),
                ("classes2.dex", b"aaaa"),
                ("classes3.dex", b"bb"),
                ("classes4.dex", b"c"),
            ],
        );

        let config = Config { max_parallelism: Some(2), ..Config::default() };
        let plan = Loader::new(config).plan(&archive).unwrap();
        assert_eq!(plan.len(), 2);
        let total: u64 = plan.iter().map(|g| g.aggregate_size).sum();
        assert_eq!(total, 7);

        let serial = Config { parallel: false, ..Config::default() };
        let plan = Loader::new(serial).plan(&archive).unwrap();
        assert_eq!(plan.len(), 1);
        let indices: Vec<u32> = plan[0].items.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
    }

    #[test]
    fn reuse_then_force() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("app.apk");
        write_zip(
            &archive,
            &[("classes.dex", b"m"), ("classes2.dex", b"two"), ("classes3.dex", b"three")],
        );
        let cache = dir.path().join("cache");
        let mut store = CacheStore::json_file(dir.path(), &archive);
        let loader = Loader::new(Config::default());

        let first = loader.load(&mut store, &archive, &cache, false).unwrap();
        assert_eq!(first.origin, LoadOrigin::Extracted);
        let indices: Vec<u32> = first.artifacts.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![2, 3]);

        let second = loader.load(&mut store, &archive, &cache, false).unwrap();
        assert_eq!(second.origin, LoadOrigin::Reused);
        assert_eq!(second.artifacts, first.artifacts);

        let forced = loader.load(&mut store, &archive, &cache, true).unwrap();
        assert_eq!(forced.origin, LoadOrigin::Extracted);
    }

    #[test]
    fn unreadable_archive_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::json_file(dir.path(), Path::new("gone.apk"));
        let err = Loader::new(Config::default())
            .load(&mut store, &dir.path().join("gone.apk"), &dir.path().join("cache"), false)
            .unwrap_err();
        assert!(matches!(err, CacheError::ArchiveUnreadable { .. }));
    }
}
