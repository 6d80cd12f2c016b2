//! # splitcache
//!
//! Extracts the extra members of an archive (`classes2.dex`, `classes3.dex`,
//! ...) into a cache directory on several threads, verifies every artifact,
//! and remembers what it produced so the next load can reuse it.
//!
//! ## Key Modules
//!
//! - [`loader`]: the `load` entry point tying everything together.
//! - [`archive`]: archive access and member enumeration.
//! - [`workers`]: partitioning sized work and running it on scoped threads.
//! - [`extract`]: the per-member extraction pipeline and cached-artifact verification.
//! - [`cache`]: the persisted validity record.
//! - [`lock`]: the cross-process lock on a cache directory.
//! - [`install`]: handing the final artifacts to a consumer.
//!
//! ## Examples
//!
//! ```no_run
//! use splitcache::{CacheStore, Config, Loader};
//! use std::path::Path;
//!
//! let archive = Path::new("/data/app/base.apk");
//! let mut store = CacheStore::json_file(Path::new("/data/state"), archive);
//! let loaded = Loader::new(Config::default())
//!     .load(&mut store, archive, Path::new("/data/cache/base"), false)?;
//! for artifact in &loaded.artifacts {
//!     println!("{} {}", artifact.index, artifact.path.display());
//! }
//! # Ok::<(), splitcache::CacheError>(())
//! ```

pub mod archive;
pub mod cache;
pub mod checksum;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod config;
pub mod error;
pub mod extract;
pub mod install;
pub mod lock;
pub mod loader;
pub mod workers;

// Cross-platform filesystem wrapper
pub mod fsx;

pub use archive::{ArchiveHandle, ArchiveReader, MemberNaming, ZipArchiveReader};
pub use cache::{CacheRecord, CacheStore};
pub use checksum::{ChecksumProvider, Crc32Checksum};
pub use common::{Artifact, Member};
pub use config::{Config, OutputOrder};
pub use error::{CacheError, Result};
pub use install::ArtifactConsumer;
pub use loader::{LoadOrigin, Loaded, Loader};
