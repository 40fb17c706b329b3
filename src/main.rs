//! veto - authorization kernel for AI coding agents.
//!
//! Thin binary entry point that delegates to the CLI handlers.

use anyhow::Context;
use clap::Parser;

mod agents;
mod cli;

use cli::args::Cli;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    initialize_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Error: {error:#}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::run(cli)) {
        Ok(code) => code,
        Err(error) => {
            // Typed errors surface one human-readable line; exit code 1.
            eprintln!("Error: {error:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn initialize_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var(veto_core::config::constants::env::LOG_LEVEL)
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
