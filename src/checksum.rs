//! Checksum providers.
//!
//! The loader only needs two numbers per file: a 32-bit checksum and a
//! modification time. Both are persisted, so neither may collide with the
//! record's "no value" marker.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crc32fast::Hasher as Crc32Hasher;

use crate::common::BUFFER_SIZE;

/// The 32-bit pattern of the record's `-1` marker.
pub const NO_CHECKSUM: u32 = u32::MAX;

/// Computes checksums for archives and extracted artifacts.
///
/// Implementations must never return [`NO_CHECKSUM`]; use [`perturb`] on the
/// natural result.
pub trait ChecksumProvider: Send + Sync {
    fn checksum_of_archive(&self, path: &Path) -> io::Result<u32>;
    fn checksum_of_artifact(&self, path: &Path) -> io::Result<u32>;
}

/// Keep the sentinel unambiguous.
pub fn perturb(value: u32) -> u32 {
    if value == NO_CHECKSUM {
        value - 1
    } else {
        value
    }
}

/// CRC-32 (IEEE) over the full file contents.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc32Checksum;

impl Crc32Checksum {
    fn crc_of(path: &Path) -> io::Result<u32> {
        let file = File::open(path)?;
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
        let mut hasher = Crc32Hasher::new();
        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            let rd = reader.read(&mut buf)?;
            if rd == 0 {
                break;
            }
            hasher.update(&buf[..rd]);
        }
        Ok(perturb(hasher.finalize()))
    }
}

impl ChecksumProvider for Crc32Checksum {
    fn checksum_of_archive(&self, path: &Path) -> io::Result<u32> {
        Self::crc_of(path)
    }

    fn checksum_of_artifact(&self, path: &Path) -> io::Result<u32> {
        Self::crc_of(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perturbs_only_the_sentinel() {
        assert_eq!(perturb(u32::MAX), u32::MAX - 1);
        assert_eq!(perturb(0), 0);
        assert_eq!(perturb(0xDEAD_BEEF), 0xDEAD_BEEF);
    }

    #[test]
    fn crc_matches_reference() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("data");
        std::fs::write(&p, b"123456789")?;
        // Standard CRC-32 check value.
        assert_eq!(Crc32Checksum.checksum_of_artifact(&p)?, 0xCBF4_3926);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Crc32Checksum.checksum_of_archive(Path::new("/definitely/not/here"));
        assert!(err.is_err());
    }
}
