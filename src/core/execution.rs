//! Execution status model - the public record of what the supervisor is running

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state reported for the managed app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Running,
}

/// Status published to the `runningApp` field
///
/// `null` on the wire means no app is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppExecution {
    pub name: String,
    pub status: ExecutionState,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub error: String,
}

impl AppExecution {
    /// Status for a freshly launched app
    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ExecutionState::Running,
            stdout: String::new(),
            stderr: String::new(),
            error: String::new(),
        }
    }
}

/// The shared `apps` state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppsState {
    /// Pending command, kept raw until the supervisor parses it
    #[serde(default)]
    pub command: Option<Value>,

    #[serde(default)]
    pub running_app: Option<AppExecution>,
}

impl AppsState {
    /// Read the document from a store snapshot; a missing document is the empty state
    pub fn from_snapshot(snapshot: Option<Value>) -> Result<Self, serde_json::Error> {
        match snapshot {
            Some(Value::Null) | None => Ok(Self::default()),
            Some(value) => serde_json::from_value(value),
        }
    }
}
