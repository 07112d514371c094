//! `serve` - run the supervisor until interrupted

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::host::ProcessLauncher;
use crate::store::{field, StateStore};
use crate::supervisor::{AppSupervisor, APPS_DOC};

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Read JSON commands from stdin, one per line, into the local store
    #[arg(long)]
    pub stdin_commands: bool,
}

pub async fn run(args: ServeArgs, config: Config) -> anyhow::Result<()> {
    let store = config.store.open()?;

    if args.stdin_commands {
        if config.store.is_remote() {
            anyhow::bail!("--stdin-commands only works with the memory backend");
        }
        tokio::spawn(feed_stdin(store.clone()));
    }

    let mut supervisor = AppSupervisor::new(store, Box::new(ProcessLauncher), config.supervisor_settings());
    supervisor
        .init_state()
        .await
        .context("Failed to initialise the apps document")?;

    tracing::info!(
        backend = ?config.store.backend,
        mock_apps = config.mock_running_apps,
        "supervisor started"
    );

    let outcome = tokio::select! {
        result = supervisor.run() => result.context("Command subscription failed"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("shutdown requested");
            Ok(())
        }
    };

    if let Err(e) = supervisor.shutdown().await {
        tracing::warn!("Failed to publish shutdown status: {}", e);
    }

    outcome
}

/// Forward stdin lines into the `command` field of the local document
async fn feed_stdin(store: Arc<dyn StateStore>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command: Value = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Ignoring stdin line that is not JSON: {}", e);
                continue;
            }
        };

        if let Err(e) = store.update(APPS_DOC, field("command", command)).await {
            tracing::error!("Failed to write command: {}", e);
        }
    }
    tracing::debug!("stdin closed, no more local commands");
}
