//! Remote command model - one instruction written into the shared `apps` document

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command issued by a remote client
///
/// Serialized with an internal `kind` tag, e.g.
/// `{"kind": "start-app", "name": "debug", "args": []}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Command {
    /// Launch a named app with string arguments
    StartApp {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Terminate the running app, if any
    StopApp {},

    /// Forward an arbitrary payload to the running app
    UpdateAppState {
        #[serde(default)]
        payload: Value,
    },
}

impl Command {
    /// Parse a raw command value taken from the state document
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn start(name: impl Into<String>, args: Vec<String>) -> Self {
        Command::StartApp {
            name: name.into(),
            args,
        }
    }

    pub fn stop() -> Self {
        Command::StopApp {}
    }

    pub fn update(payload: Value) -> Self {
        Command::UpdateAppState { payload }
    }

    /// Wire name of the command kind
    pub fn kind(&self) -> &'static str {
        match self {
            Command::StartApp { .. } => "start-app",
            Command::StopApp {} => "stop-app",
            Command::UpdateAppState { .. } => "update-app-state",
        }
    }
}
