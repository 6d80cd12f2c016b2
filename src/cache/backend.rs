//! Storage backends for the cache record.

use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{CacheError, Result};

pub type RecordMap = BTreeMap<String, i64>;

/// Where the flat record lives. `commit` must be durable when it returns.
pub trait RecordBackend: Send {
    fn read(&self) -> Result<Option<RecordMap>>;
    fn commit(&self, map: &RecordMap) -> Result<()>;
    fn location(&self) -> String;
}

/// One JSON object per archive, replaced atomically on commit.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_archive(state_dir: &Path, archive: &Path) -> Self {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        Self::new(state_dir.join(format!("{name}.splitcache.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordBackend for JsonFileBackend {
    fn read(&self) -> Result<Option<RecordMap>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&self.path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::CorruptRecord {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn commit(&self, map: &RecordMap) -> Result<()> {
        let failed = |source: io::Error| CacheError::PersistFailed {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(failed)?;

        let tmp = NamedTempFile::new_in(dir).map_err(failed)?;
        {
            let mut out = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut out, map).map_err(|e| failed(e.into()))?;
            out.flush().map_err(failed)?;
        }
        tmp.as_file().sync_all().map_err(failed)?;
        tmp.persist(&self.path).map_err(|e| failed(e.error))?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
