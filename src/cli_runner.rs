//! Command dispatch for the `splitcache` binary, kept in the library so the
//! subcommands can be driven from tests without spawning a process.

use std::io::{self, Write};
use std::path::Path;

use crate::archive::{ArchiveReader, MemberCatalog, ZipArchiveReader};
use crate::cache::{CacheStore, JsonFileBackend, RecordBackend};
use crate::cli::{self, Commands, PolicyArg};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::loader::Loader;
use crate::workers::{desired_parallelism, group_count, partition};

pub fn run_cli_app(command: Commands) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Load {
            archive,
            cache_dir,
            state_dir,
            force,
            serial,
            zipped,
            no_checksum,
            serial_verify,
            order,
            threads,
        } => {
            let config =
                cli::load_config(serial, zipped, no_checksum, serial_verify, order, threads);
            let state_dir = state_dir.unwrap_or_else(|| cli::default_state_dir(&cache_dir));
            cli::ensure_distinct_state_dir(&state_dir, &cache_dir)?;
            let mut store = CacheStore::json_file(&state_dir, &archive);
            let loaded = Loader::new(config).load(&mut store, &archive, &cache_dir, force)?;

            for artifact in &loaded.artifacts {
                writeln!(out, "{}\t{}", artifact.index, artifact.path.display())
                    .map_err(stdout_err)?;
            }
            tracing::info!(origin = %loaded.origin, record = %store.location(), "done");
        }
        Commands::Plan { archive, threads, policy } => {
            print_plan(&mut out, &archive, threads, policy)?;
        }
        Commands::Inspect { archive, state_dir } => {
            let backend = JsonFileBackend::for_archive(&state_dir, &archive);
            match backend.read()? {
                Some(map) => {
                    for (key, value) in &map {
                        writeln!(out, "{key}={value}").map_err(stdout_err)?;
                    }
                }
                None => {
                    writeln!(out, "no cache record at {}", backend.location())
                        .map_err(stdout_err)?;
                }
            }
        }
    }
    Ok(())
}

fn print_plan(
    out: &mut impl Write,
    archive: &Path,
    threads: usize,
    policy: PolicyArg,
) -> Result<()> {
    let config = Config::default();
    let mut handle = ZipArchiveReader.open(archive)?;
    let members = MemberCatalog::new(&config.naming).list(handle.as_mut())?;
    drop(handle);

    let desired = if threads > 0 { threads } else { desired_parallelism(num_cpus::get()) };
    let k = group_count(desired, members.len());
    let plan = partition(policy.into(), members, k);

    writeln!(out, "{} group(s)", plan.len()).map_err(stdout_err)?;
    for (i, group) in plan.iter().enumerate() {
        let indices: Vec<String> = group.items.iter().map(|m| m.index.to_string()).collect();
        writeln!(out, "group {i}: members [{}] {group}", indices.join(",")).map_err(stdout_err)?;
    }
    Ok(())
}

fn stdout_err(e: io::Error) -> CacheError {
    CacheError::io("<stdout>", e)
}
