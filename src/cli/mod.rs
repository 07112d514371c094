//! Command-line interface

pub mod send;
pub mod serve;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Overrides;

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const UNEXPECTED_FAILURE: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const STORE_ERROR: i32 = 3;
}

#[derive(Debug, Parser)]
#[command(name = "matrixvisor", version, about = "Remote-controlled app supervisor for the LED matrix")]
pub struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true, env = "MATRIXVISOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON
    #[arg(long = "json", global = true)]
    pub json_output: bool,

    /// Launch the mock worker instead of real apps
    #[arg(long, global = true, env = "MOCK_RUNNING_APPS")]
    pub mock_apps: bool,

    /// Firebase Realtime Database URL; selects the Firebase backend
    #[arg(long, global = true, env = "FIREBASE_URL")]
    pub firebase_url: Option<String>,

    /// Firebase database secret or ID token
    #[arg(long, global = true, env = "FIREBASE_AUTH", hide_env_values = true)]
    pub firebase_auth: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            mock_running_apps: self.mock_apps,
            firebase_url: self.firebase_url.clone(),
            firebase_auth: self.firebase_auth.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the supervisor (default)
    Serve(serve::ServeArgs),

    /// Write a command into the shared state document
    Send(send::SendArgs),

    /// Print the currently published app status
    Status,
}
