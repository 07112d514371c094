//! `status` - print the published app status

use anyhow::Context;

use crate::config::Config;
use crate::core::AppsState;
use crate::store::StateStore;
use crate::supervisor::APPS_DOC;

pub async fn run(config: Config) -> anyhow::Result<()> {
    if !config.store.is_remote() {
        anyhow::bail!("status needs a remote store; set FIREBASE_URL or [store] in the config file");
    }

    let store = config.store.open()?;
    let snapshot = store.get(APPS_DOC).await.context("Failed to read the apps document")?;
    let state = AppsState::from_snapshot(snapshot)?;

    match state.running_app {
        Some(app) => println!("{}", serde_json::to_string_pretty(&app)?),
        None => println!("no app running"),
    }

    if let Some(command) = state.command {
        println!("pending command: {}", command);
    }

    Ok(())
}
