use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{Config, OutputOrder};
use crate::error::{CacheError, Result};
use crate::fsx;
use crate::workers::Policy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Extract an archive's extra members into a cache directory, or reuse a
    /// previous extraction, and print the resulting artifacts.
    #[command(alias = "l")]
    Load {
        #[arg(required = true)]
        archive: PathBuf,

        /// Directory that receives the extracted artifacts.
        #[arg(long)]
        cache_dir: PathBuf,

        /// Directory holding the cache record. Defaults to the parent of
        /// the cache directory; must not be the cache directory itself.
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Extract even if the cache record matches.
        #[arg(long)]
        force: bool,

        /// Extract and verify on the calling thread only.
        #[arg(long)]
        serial: bool,

        /// Wrap every member in a single-entry ZIP instead of writing raw bytes.
        #[arg(long)]
        zipped: bool,

        /// Skip artifact checksums.
        #[arg(long)]
        no_checksum: bool,

        /// Verify cached artifacts serially even when extracting in parallel.
        #[arg(long)]
        serial_verify: bool,

        /// Order of the printed artifacts.
        #[arg(long, value_enum, default_value_t = OrderArg::Index)]
        order: OrderArg,

        /// Maximum number of worker groups. [0 = derive from CPU count]
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },

    /// Show how an archive's members would be split across workers.
    #[command(alias = "p")]
    Plan {
        #[arg(required = true)]
        archive: PathBuf,

        /// Number of groups for the balanced policy. [0 = derive from CPU count]
        #[arg(long, default_value_t = 0)]
        threads: usize,

        #[arg(long, value_enum, default_value_t = PolicyArg::Balanced)]
        policy: PolicyArg,
    },

    /// Print the persisted cache record of an archive.
    #[command(alias = "i")]
    Inspect {
        #[arg(required = true)]
        archive: PathBuf,

        #[arg(long)]
        state_dir: PathBuf,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OrderArg {
    Index,
    Scheduled,
}

impl From<OrderArg> for OutputOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Index => OutputOrder::Index,
            OrderArg::Scheduled => OutputOrder::Scheduled,
        }
    }
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum PolicyArg {
    Balanced,
    Chunked,
}

impl From<PolicyArg> for Policy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Balanced => Policy::Balanced,
            PolicyArg::Chunked => Policy::Chunked,
        }
    }
}

/// Environment overrides first, then explicit flags on top.
pub fn load_config(
    serial: bool,
    zipped: bool,
    no_checksum: bool,
    serial_verify: bool,
    order: OrderArg,
    threads: usize,
) -> Config {
    let mut config = Config::default().with_env_overrides();
    if serial {
        config.parallel = false;
    }
    if zipped {
        config.raw_format = false;
    }
    if no_checksum {
        config.checksum_enabled = false;
    }
    if serial_verify {
        config.concurrent_reconstruction = false;
    }
    if threads > 0 {
        config.max_parallelism = Some(threads);
    }
    config.output_order = order.into();
    config
}

/// Where the record lives when `--state-dir` is not given.
pub fn default_state_dir(cache_dir: &Path) -> PathBuf {
    match cache_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// The stale sweep empties the cache directory, so the record must live
/// elsewhere. Paths are compared resolved when they exist.
pub fn ensure_distinct_state_dir(state_dir: &Path, cache_dir: &Path) -> Result<()> {
    let resolve = |p: &Path| fsx::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    if resolve(state_dir) == resolve(cache_dir) {
        return Err(CacheError::io(
            state_dir,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "state dir must not be the cache directory",
            ),
        ));
    }
    Ok(())
}
