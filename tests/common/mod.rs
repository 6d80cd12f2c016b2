//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::{Rng, RngCore};
use splitcache::archive::{ArchiveHandle, ArchiveReader, ZipArchiveReader};
use splitcache::{Member, Result};
use zip::write::FileOptions;
use zip::ZipWriter;

/// Write `archive_name` into `dir` with a primary `classes.dex` followed by
/// one `classesN.dex` per body, starting at N = 2.
pub fn build_archive(dir: &Path, archive_name: &str, bodies: &[Vec<u8>]) -> PathBuf {
    let path = dir.join(archive_name);
    let mut w = ZipWriter::new(File::create(&path).unwrap());
    w.start_file("classes.dex", FileOptions::default()).unwrap();
    w.write_all(b"primary content").unwrap();
    for (i, body) in bodies.iter().enumerate() {
        w.start_file(format!("classes{}.dex", i + 2), FileOptions::default()).unwrap();
        w.write_all(body).unwrap();
    }
    w.start_file("resources.arsc", FileOptions::default()).unwrap();
    w.write_all(b"not a member").unwrap();
    w.finish().unwrap();
    path
}

/// `count` bodies of random bytes, each 1..=max_len long.
pub fn random_bodies(count: usize, max_len: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut body = vec![0u8; rng.gen_range(1..=max_len)];
            rng.fill_bytes(&mut body);
            body
        })
        .collect()
}

/// Make a read-only artifact writable again and replace its contents.
pub fn overwrite(path: &Path, contents: &[u8]) {
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(path, perms).unwrap();
    std::fs::write(path, contents).unwrap();
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Zip reader that counts member reads and can break the first few reads of
/// one member partway through.
#[derive(Clone, Default)]
pub struct InstrumentedReader {
    /// Every `read_member` call, by member index.
    pub reads: Arc<Mutex<Vec<u32>>>,
    faults: Arc<AtomicUsize>,
    fault_index: u32,
}

impl InstrumentedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Break the next `times` reads of member `index`.
    pub fn failing(index: u32, times: usize) -> Self {
        Self {
            reads: Arc::default(),
            faults: Arc::new(AtomicUsize::new(times)),
            fault_index: index,
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads.lock().unwrap().len()
    }

    pub fn reads_of(&self, index: u32) -> usize {
        self.reads.lock().unwrap().iter().filter(|&&i| i == index).count()
    }
}

impl ArchiveReader for InstrumentedReader {
    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveHandle>> {
        Ok(Box::new(InstrumentedHandle {
            inner: ZipArchiveReader.open(path)?,
            owner: self.clone(),
        }))
    }
}

struct InstrumentedHandle {
    inner: Box<dyn ArchiveHandle>,
    owner: InstrumentedReader,
}

impl ArchiveHandle for InstrumentedHandle {
    fn find_member(&mut self, index: u32, name: &str) -> Result<Option<Member>> {
        self.inner.find_member(index, name)
    }

    fn read_member<'a>(&'a mut self, member: &Member) -> io::Result<Box<dyn Read + 'a>> {
        self.owner.reads.lock().unwrap().push(member.index);
        let fail = member.index == self.owner.fault_index
            && self
                .owner
                .faults
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        let inner = self.inner.read_member(member)?;
        if fail {
            Ok(Box::new(BrokenRead {
                inner,
                left: member.byte_size / 2,
            }))
        } else {
            Ok(inner)
        }
    }
}

/// Yields `left` bytes, then fails.
struct BrokenRead<R> {
    inner: R,
    left: u64,
}

impl<R: Read> Read for BrokenRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.left == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read fault"));
        }
        let cap = buf.len().min(self.left as usize);
        let n = self.inner.read(&mut buf[..cap])?;
        self.left -= n as u64;
        Ok(n)
    }
}
