//! Per-member extract → verify state machine.
//!
//! ```text
//! Pending → Extracting → Verifying → Done
//!               │             │
//!               └──── Retry ◄─┘   (up to MAX_EXTRACT_ATTEMPTS, then Failed)
//! ```
//!
//! Extracting streams the member into a `tmp-` file in the cache directory,
//! marks it read-only and renames it over the artifact path. Verifying
//! records the artifact's checksum and modification time.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tempfile::Builder as TempBuilder;
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::archive::{zip_to_io, ArchiveHandle, ArchiveReader, MemberCatalog, MemberNaming};
use crate::checksum::ChecksumProvider;
use crate::common::{Artifact, Member, MAX_EXTRACT_ATTEMPTS};
use crate::error::{CacheError, Result};
use crate::extract::ArtifactLayout;
use crate::fsx;
use crate::workers::{run_groups, WorkGroup};

/// Entry name inside a zipped artifact.
pub const ZIPPED_ENTRY_NAME: &str = "classes.dex";

/// Extracts members of one archive into one cache directory.
///
/// Shared by reference across worker threads; every group opens its own
/// archive handle.
pub struct ExtractionPipeline<'a> {
    archive: &'a Path,
    reader: &'a dyn ArchiveReader,
    checksum: &'a dyn ChecksumProvider,
    catalog: MemberCatalog<'a>,
    layout: &'a ArtifactLayout,
    raw_format: bool,
    checksum_enabled: bool,
}

impl<'a> ExtractionPipeline<'a> {
    pub fn new(
        archive: &'a Path,
        reader: &'a dyn ArchiveReader,
        checksum: &'a dyn ChecksumProvider,
        naming: &'a MemberNaming,
        layout: &'a ArtifactLayout,
        raw_format: bool,
        checksum_enabled: bool,
    ) -> Self {
        Self {
            archive,
            reader,
            checksum,
            catalog: MemberCatalog::new(naming),
            layout,
            raw_format,
            checksum_enabled,
        }
    }

    /// Run every group of `plan` on the worker pool.
    pub fn extract_plan(&self, plan: &[WorkGroup<Member>]) -> Result<Vec<Artifact>> {
        run_groups(plan, |_, members| self.extract_group(members))
    }

    /// Extract one group in order on a freshly opened handle.
    pub fn extract_group(&self, members: &[Member]) -> Result<Vec<Artifact>> {
        let mut handle = self.reader.open(self.archive)?;
        let mut artifacts = Vec::with_capacity(members.len());
        for listed in members {
            let member = self
                .catalog
                .find(handle.as_mut(), listed.index)?
                .ok_or_else(|| self.missing(listed.index))?;
            artifacts.push(self.run(handle.as_mut(), &member)?);
        }
        Ok(artifacts)
    }

    /// Drive one member to `Done` or `Failed`.
    pub fn run(&self, handle: &mut dyn ArchiveHandle, member: &Member) -> Result<Artifact> {
        let path = self.layout.artifact_path(member.index);
        let mut last = None;

        for attempt in 1..=MAX_EXTRACT_ATTEMPTS {
            let outcome = self
                .extract_to(handle, member, &path)
                .and_then(|()| self.verify(member, &path));
            match outcome {
                Ok(artifact) => {
                    debug!(
                        index = member.index,
                        attempt,
                        size = member.byte_size,
                        path = %path.display(),
                        "member extracted"
                    );
                    return Ok(artifact);
                }
                Err(e @ CacheError::MemberMissing { .. }) => return Err(e),
                Err(e) => {
                    warn!(index = member.index, attempt, error = %e, "extraction attempt failed");
                    fsx::remove_quietly(&path);
                    last = Some(Box::new(e));
                }
            }
        }

        Err(CacheError::ExtractionFailed {
            index: member.index,
            path,
            attempts: MAX_EXTRACT_ATTEMPTS,
            last,
        })
    }

    fn extract_to(
        &self,
        handle: &mut dyn ArchiveHandle,
        member: &Member,
        path: &Path,
    ) -> Result<()> {
        let dir = self.layout.cache_dir();
        let mut tmp = TempBuilder::new()
            .prefix(&self.layout.temp_prefix())
            .suffix(self.layout.suffix())
            .tempfile_in(dir)
            .map_err(|e| CacheError::io(dir, e))?;

        let mut src = handle.read_member(member).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                self.missing(member.index)
            } else {
                CacheError::io(self.archive, e)
            }
        })?;

        let written = if self.raw_format {
            io::copy(&mut src, tmp.as_file_mut())
        } else {
            write_zipped(&mut src, tmp.as_file_mut(), member)
        }
        .map_err(|e| CacheError::io(tmp.path(), e))?;
        drop(src);

        if written != member.byte_size {
            let e = io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("truncated read: {written} of {} bytes", member.byte_size),
            );
            return Err(CacheError::io(tmp.path(), e));
        }

        fsx::set_readonly(tmp.path()).map_err(|e| CacheError::io(tmp.path(), e))?;
        // Dropping `tmp` on any earlier return removes the file.
        tmp.persist(path).map_err(|e| CacheError::io(path, e.error))?;
        Ok(())
    }

    fn verify(&self, member: &Member, path: &Path) -> Result<Artifact> {
        let checksum = if self.checksum_enabled {
            let crc = self
                .checksum
                .checksum_of_artifact(path)
                .map_err(|source| CacheError::Checksum {
                    path: path.to_path_buf(),
                    source,
                })?;
            Some(crc)
        } else {
            None
        };
        let mod_time = fsx::modified_millis(path).map_err(|e| CacheError::io(path, e))?;
        Ok(Artifact {
            index: member.index,
            path: path.to_path_buf(),
            checksum,
            mod_time,
        })
    }

    fn missing(&self, index: u32) -> CacheError {
        CacheError::MemberMissing {
            index,
            archive: self.archive.to_path_buf(),
        }
    }
}

/// Wrap the member's bytes in a single-entry ZIP. Returns the uncompressed
/// byte count.
fn write_zipped(src: &mut dyn Read, out: &mut File, member: &Member) -> io::Result<u64> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(member.modified.unwrap_or_default());
    let mut zip = ZipWriter::new(out);
    zip.start_file(ZIPPED_ENTRY_NAME, options).map_err(zip_to_io)?;
    let written = io::copy(src, &mut zip)?;
    zip.finish().map_err(zip_to_io)?;
    Ok(written)
}
