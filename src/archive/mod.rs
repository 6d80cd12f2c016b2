//! Archive access and member enumeration.
//!
//! The container format is a collaborator: the loader only talks to the
//! [`ArchiveReader`] / [`ArchiveHandle`] traits. [`ZipArchiveReader`] is the
//! stock implementation for ZIP-based containers.
//!
//! Every worker opens its own handle so that no reader state is shared
//! between threads.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::common::{Member, FIRST_MEMBER_INDEX};
use crate::error::{CacheError, Result};

/// Opens archives.
pub trait ArchiveReader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveHandle>>;
}

/// An open archive. Dropping the handle closes it.
pub trait ArchiveHandle {
    /// Look up the entry called `name`; `index` is stamped on the result.
    ///
    /// `Ok(None)` means the archive has no such entry. An entry that exists
    /// but cannot be read is an error, never a gap.
    fn find_member(&mut self, index: u32, name: &str) -> Result<Option<Member>>;

    /// Stream the bytes of a member previously returned by `find_member`.
    fn read_member<'a>(&'a mut self, member: &Member) -> io::Result<Box<dyn Read + 'a>>;
}

/// Naming convention for extra members: `{prefix}{index}{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberNaming {
    pub prefix: String,
    pub suffix: String,
}

impl Default for MemberNaming {
    fn default() -> Self {
        Self {
            prefix: "classes".to_string(),
            suffix: ".dex".to_string(),
        }
    }
}

impl MemberNaming {
    pub fn entry_name(&self, index: u32) -> String {
        format!("{}{}{}", self.prefix, index, self.suffix)
    }
}

/// Enumerates the extra members of an archive.
///
/// Members are looked up as index 2, 3, ... and enumeration stops at the
/// first index with no matching entry. A lookup error aborts the listing.
pub struct MemberCatalog<'n> {
    naming: &'n MemberNaming,
}

impl<'n> MemberCatalog<'n> {
    pub fn new(naming: &'n MemberNaming) -> Self {
        Self { naming }
    }

    pub fn list(&self, handle: &mut dyn ArchiveHandle) -> Result<Vec<Member>> {
        let mut members = Vec::new();
        let mut index = FIRST_MEMBER_INDEX;
        while let Some(member) = handle.find_member(index, &self.naming.entry_name(index))? {
            members.push(member);
            index += 1;
        }
        Ok(members)
    }

    /// Re-resolve one member on a fresh handle.
    pub fn find(&self, handle: &mut dyn ArchiveHandle, index: u32) -> Result<Option<Member>> {
        handle.find_member(index, &self.naming.entry_name(index))
    }
}

/// Reads members out of ZIP containers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiveReader;

impl ArchiveReader for ZipArchiveReader {
    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveHandle>> {
        let unreadable = |source: io::Error| CacheError::ArchiveUnreadable {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(unreadable)?;
        let zip = ZipArchive::new(BufReader::new(file)).map_err(|e| unreadable(zip_to_io(e)))?;
        Ok(Box::new(ZipHandle {
            path: path.to_path_buf(),
            zip,
        }))
    }
}

struct ZipHandle {
    path: PathBuf,
    zip: ZipArchive<BufReader<File>>,
}

impl ArchiveHandle for ZipHandle {
    fn find_member(&mut self, index: u32, name: &str) -> Result<Option<Member>> {
        match self.zip.by_name(name) {
            Ok(entry) => Ok(Some(Member {
                index,
                byte_size: entry.size(),
                name: name.to_string(),
                modified: Some(entry.last_modified()),
            })),
            Err(ZipError::FileNotFound) => Ok(None),
            Err(e) => {
                tracing::warn!(
                    archive = %self.path.display(),
                    entry = name,
                    error = %e,
                    "unreadable entry"
                );
                Err(CacheError::ArchiveUnreadable {
                    path: self.path.clone(),
                    source: zip_to_io(e),
                })
            }
        }
    }

    fn read_member<'a>(&'a mut self, member: &Member) -> io::Result<Box<dyn Read + 'a>> {
        let entry = self.zip.by_name(&member.name).map_err(zip_to_io)?;
        Ok(Box::new(entry))
    }
}

pub(crate) fn zip_to_io(e: ZipError) -> io::Error {
    match e {
        ZipError::Io(inner) => inner,
        ZipError::FileNotFound => io::Error::new(io::ErrorKind::NotFound, ZipError::FileNotFound),
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
