//! Main entry point for the splitcache CLI app

use clap::Parser;
use splitcache::cli::Args;
use splitcache::cli_runner;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = Args::parse();

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match args.verbose {
        0 => EnvFilter::new("splitcache=warn"),
        1 => EnvFilter::new("splitcache=info"),
        _ => EnvFilter::new("splitcache=debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli_runner::run_cli_app(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
