//! matrixvisor - remote-controlled app supervisor for an LED matrix display
//!
//! Watches the shared `apps` document of a state store and keeps at most
//! one display app running:
//! - `start-app` launches the named app from its recipe
//! - `stop-app` tears down the app's whole process group
//! - `update-app-state` forwards a payload to attached apps
//!
//! The running app is published back to the same document.

mod cli;
mod config;
mod core;
mod host;
mod logging;
mod store;
mod supervisor;

use clap::Parser;
use cli::{exit_codes, Cli, Commands};
use config::Config;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config.with_overrides(cli.overrides()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    // Initialize logging
    if let Err(e) = logging::init(&config.log_level, cli.verbose, cli.json_output) {
        eprintln!("Failed to initialize logging: {}", e);
        return exit_codes::UNEXPECTED_FAILURE;
    }

    // Create tokio runtime for the supervisor and store clients
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return exit_codes::UNEXPECTED_FAILURE;
        }
    };

    let result = rt.block_on(async {
        match cli.command {
            Some(Commands::Serve(args)) => cli::serve::run(args, config).await,
            Some(Commands::Send(args)) => cli::send::run(args, config).await,
            Some(Commands::Status) => cli::status::run(config).await,
            None => cli::serve::run(Default::default(), config).await,
        }
    });

    match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            categorize_error(&e)
        }
    }
}

/// Categorize an error into the appropriate exit code
fn categorize_error(e: &anyhow::Error) -> i32 {
    if e.chain().any(|cause| cause.is::<store::StoreError>()) {
        exit_codes::STORE_ERROR
    } else {
        exit_codes::UNEXPECTED_FAILURE
    }
}
