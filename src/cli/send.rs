//! `send` - write a command into the remote state document

use anyhow::Context;
use clap::{Args, Subcommand};
use serde_json::Value;

use crate::config::Config;
use crate::core::Command;
use crate::store::{field, StateStore};
use crate::supervisor::APPS_DOC;

#[derive(Debug, Args)]
pub struct SendArgs {
    #[command(subcommand)]
    pub command: SendCommand,
}

#[derive(Debug, Subcommand)]
pub enum SendCommand {
    /// Launch an app
    StartApp {
        name: String,
        /// Arguments passed to the app
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Stop the running app
    StopApp,

    /// Forward a JSON payload to the running app
    UpdateAppState { payload: String },
}

impl SendArgs {
    pub fn to_command(&self) -> anyhow::Result<Command> {
        Ok(match &self.command {
            SendCommand::StartApp { name, args } => Command::start(name.clone(), args.clone()),
            SendCommand::StopApp => Command::stop(),
            SendCommand::UpdateAppState { payload } => {
                let payload: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;
                Command::update(payload)
            }
        })
    }
}

pub async fn run(args: SendArgs, config: Config) -> anyhow::Result<()> {
    if !config.store.is_remote() {
        anyhow::bail!("send needs a remote store; set FIREBASE_URL or [store] in the config file");
    }

    let command = args.to_command()?;
    let store = config.store.open()?;
    store
        .update(APPS_DOC, field("command", serde_json::to_value(&command)?))
        .await
        .context("Failed to write command")?;

    tracing::info!(kind = command.kind(), "command sent");
    Ok(())
}
