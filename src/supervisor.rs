//! App Supervisor
//!
//! Single-slot state machine driven by the `apps` document of the state
//! store. Each command is validated against the slot, applied, acknowledged
//! by clearing `command`, and followed by a separate `runningApp` write.
//!
//! ```text
//!  store ──command──▶ AppSupervisor ──launch/stop/send──▶ RunningApp
//!    ▲                    │
//!    └──ack + runningApp──┘
//! ```

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::{mock_recipe, AppExecution, AppName, AppPaths, AppsState, Command, RecipeError, MOCK_APP};
use crate::host::{Launcher, RunningApp};
use crate::store::{field, StateStore, StoreError};

/// Path of the shared state document
pub const APPS_DOC: &str = "apps";

/// Errors raised while handling a command
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Invalid command: {0}")]
    InvalidCommand(#[source] serde_json::Error),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error("Cannot start '{requested}', '{running}' is already running")]
    AlreadyRunning { requested: String, running: AppName },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

/// Supervisor settings taken from the configuration
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Launch the mock worker instead of the real app
    pub mock_apps: bool,
    pub paths: AppPaths,
}

/// The occupant of the slot
struct Slot {
    app: AppName,
    handle: Box<dyn RunningApp>,
}

/// Supervisor owning at most one running app
pub struct AppSupervisor {
    store: Arc<dyn StateStore>,
    launcher: Box<dyn Launcher>,
    settings: SupervisorSettings,
    slot: Option<Slot>,
    /// Last acknowledged command, until a snapshot without it is observed
    pending_ack: Option<Value>,
}

impl AppSupervisor {
    pub fn new(store: Arc<dyn StateStore>, launcher: Box<dyn Launcher>, settings: SupervisorSettings) -> Self {
        Self {
            store,
            launcher,
            settings,
            slot: None,
            pending_ack: None,
        }
    }

    /// App currently occupying the slot
    pub fn running(&self) -> Option<AppName> {
        self.slot.as_ref().map(|slot| slot.app)
    }

    /// Reset the shared document to `{command: null, runningApp: null}`
    pub async fn init_state(&self) -> Result<(), StoreError> {
        let initial = serde_json::to_value(AppsState::default())?;
        self.store.set(APPS_DOC, initial).await
    }

    /// Process commands until the subscription ends
    ///
    /// A bad command is logged and skipped; only store failures end the loop.
    pub async fn run(&mut self) -> Result<(), StoreError> {
        tracing::debug!("listening for snapshots");
        let mut snapshots = self.store.subscribe(APPS_DOC).await?;

        while let Some(snapshot) = snapshots.recv().await {
            // Only `command` is read; `runningApp` belongs to whoever wrote it last.
            let command = snapshot
                .as_ref()
                .and_then(|doc| doc.get("command"))
                .filter(|command| !command.is_null())
                .cloned();

            let Some(command) = command else {
                self.pending_ack = None;
                continue;
            };

            // The acknowledgement may not have been observed yet.
            if self.pending_ack.as_ref() == Some(&command) {
                continue;
            }

            match self.handle_command(command).await {
                Ok(()) => {}
                Err(SupervisorError::Store(e)) => return Err(e),
                Err(e) => tracing::error!("Command failed: {}", e),
            }
        }

        Err(StoreError::Closed(APPS_DOC.to_string()))
    }

    /// Apply one raw command from the state document
    pub async fn handle_command(&mut self, raw: Value) -> Result<(), SupervisorError> {
        tracing::debug!(command = %raw, "handling command");

        let command = match Command::from_value(raw.clone()) {
            Ok(command) => command,
            Err(e) => {
                self.acknowledge(raw).await?;
                return Err(SupervisorError::InvalidCommand(e));
            }
        };

        match command {
            Command::StartApp { name, args } => {
                let started = self.start_app(&name, &args);
                self.acknowledge(raw).await?;
                let app = started?;
                self.publish(Some(AppExecution::running(app.as_str()))).await?;
            }
            Command::StopApp {} => {
                self.stop_app();
                self.acknowledge(raw).await?;
                self.publish(None).await?;
            }
            Command::UpdateAppState { payload } => {
                let Some(slot) = self.slot.as_mut() else {
                    tracing::debug!("no app running, ignoring update");
                    return Ok(());
                };
                slot.handle.send(&payload);
                self.acknowledge(raw).await?;
            }
        }

        Ok(())
    }

    /// Stop whatever is running and publish the empty status
    pub async fn shutdown(&mut self) -> Result<(), StoreError> {
        if let Some(app) = self.running() {
            tracing::info!(app = %app, "stopping app before exit");
            self.stop_app();
            self.publish(None).await?;
        }
        Ok(())
    }

    fn start_app(&mut self, name: &str, args: &[String]) -> Result<AppName, SupervisorError> {
        let app = AppName::from_name(name)?;

        if let Some(slot) = &self.slot {
            return Err(SupervisorError::AlreadyRunning {
                requested: name.to_string(),
                running: slot.app,
            });
        }

        let handle = if self.settings.mock_apps {
            tracing::info!(app = %app, "mock apps enabled, starting mock worker");
            self.launcher.launch(MOCK_APP, &mock_recipe(&self.settings.paths))
        } else {
            let recipe = app.recipe(args, &self.settings.paths)?;
            self.launcher.launch(app.as_str(), &recipe)
        };

        tracing::info!(app = %app, "app started");
        self.slot = Some(Slot { app, handle });
        Ok(app)
    }

    fn stop_app(&mut self) {
        let Some(mut slot) = self.slot.take() else {
            tracing::debug!("no app running, nothing to stop");
            return;
        };

        match slot.handle.stop() {
            Ok(()) => tracing::info!(app = %slot.app, "app stopped"),
            Err(e) => tracing::warn!(app = %slot.app, "failed to stop app, releasing slot anyway: {}", e),
        }
    }

    async fn acknowledge(&mut self, command: Value) -> Result<(), StoreError> {
        self.store.update(APPS_DOC, field("command", Value::Null)).await?;
        self.pending_ack = Some(command);
        Ok(())
    }

    async fn publish(&self, status: Option<AppExecution>) -> Result<(), StoreError> {
        let value = serde_json::to_value(status)?;
        self.store.update(APPS_DOC, field("runningApp", value)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::core::{LaunchMode, Recipe};
    use crate::host::process::ProcessError;
    use crate::store::MemoryStore;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Launch { name: String, mode: LaunchMode },
        Send { name: String, payload: Value },
        Stop { name: String },
    }

    type CallLog = Arc<Mutex<Vec<Call>>>;

    struct FakeApp {
        name: String,
        calls: CallLog,
        fail_stop: bool,
    }

    impl RunningApp for FakeApp {
        fn send(&mut self, payload: &Value) {
            self.calls.lock().unwrap().push(Call::Send {
                name: self.name.clone(),
                payload: payload.clone(),
            });
        }

        fn stop(&mut self) -> Result<(), ProcessError> {
            self.calls.lock().unwrap().push(Call::Stop { name: self.name.clone() });
            if self.fail_stop {
                return Err(ProcessError::Launch {
                    program: self.name.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            Ok(())
        }
    }

    struct FakeLauncher {
        calls: CallLog,
        fail_stop: bool,
    }

    impl Launcher for FakeLauncher {
        fn launch(&self, name: &str, recipe: &Recipe) -> Box<dyn RunningApp> {
            self.calls.lock().unwrap().push(Call::Launch {
                name: name.to_string(),
                mode: recipe.mode,
            });
            Box::new(FakeApp {
                name: name.to_string(),
                calls: self.calls.clone(),
                fail_stop: self.fail_stop,
            })
        }
    }

    struct Harness {
        supervisor: AppSupervisor,
        store: Arc<MemoryStore>,
        calls: CallLog,
    }

    impl Harness {
        async fn new(mock_apps: bool, fail_stop: bool) -> Self {
            let store = Arc::new(MemoryStore::new());
            let calls = CallLog::default();
            let launcher = FakeLauncher {
                calls: calls.clone(),
                fail_stop,
            };
            let settings = SupervisorSettings {
                mock_apps,
                paths: AppPaths {
                    node: PathBuf::from("/usr/bin/node"),
                    apps_dir: PathBuf::from("/srv/apps"),
                    matrix_dir: PathBuf::from("/opt/matrix"),
                    mock_script: PathBuf::from("/srv/mock/index.js"),
                },
            };
            let supervisor = AppSupervisor::new(store.clone(), Box::new(launcher), settings);
            supervisor.init_state().await.unwrap();
            Self { supervisor, store, calls }
        }

        async fn idle() -> Self {
            Self::new(false, false).await
        }

        /// Write a command into the document, then hand it to the supervisor
        async fn command(&mut self, command: Value) -> Result<(), SupervisorError> {
            self.store.update(APPS_DOC, field("command", command.clone())).await.unwrap();
            self.supervisor.handle_command(command).await
        }

        async fn state(&self) -> AppsState {
            AppsState::from_snapshot(self.store.get(APPS_DOC).await.unwrap()).unwrap()
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_start_on_idle_publishes_running_status() {
        let mut h = Harness::idle().await;
        h.command(json!({"kind": "start-app", "name": "debug"})).await.unwrap();

        assert_eq!(h.supervisor.running(), Some(AppName::Debug));
        let state = h.state().await;
        assert_eq!(state.command, None);
        assert_eq!(
            serde_json::to_value(state.running_app).unwrap(),
            json!({"name": "debug", "status": "running", "error": "", "stdout": "", "stderr": ""})
        );
        assert_eq!(
            h.calls(),
            vec![Call::Launch {
                name: "debug".to_string(),
                mode: LaunchMode::Detached
            }]
        );
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let mut h = Harness::idle().await;
        h.command(json!({"kind": "start-app", "name": "debug"})).await.unwrap();
        let before = h.state().await;

        let err = h
            .command(json!({"kind": "start-app", "name": "maze"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning { running: AppName::Debug, .. }));

        assert_eq!(h.supervisor.running(), Some(AppName::Debug));
        assert_eq!(h.calls().len(), 1);
        let after = h.state().await;
        assert_eq!(after.running_app, before.running_app);
        assert_eq!(after.command, None);
    }

    #[tokio::test]
    async fn test_stop_terminates_once_and_clears_status() {
        let mut h = Harness::idle().await;
        h.command(json!({"kind": "start-app", "name": "debug"})).await.unwrap();
        h.command(json!({"kind": "stop-app"})).await.unwrap();

        assert_eq!(h.supervisor.running(), None);
        let stops = h
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Stop { .. }))
            .count();
        assert_eq!(stops, 1);
        assert_eq!(h.state().await, AppsState::default());
    }

    #[tokio::test]
    async fn test_stop_on_idle_publishes_null() {
        let mut h = Harness::idle().await;
        h.store
            .update(APPS_DOC, field("runningApp", json!({"name": "stale", "status": "running"})))
            .await
            .unwrap();

        h.command(json!({"kind": "stop-app"})).await.unwrap();

        assert!(h.calls().is_empty());
        assert_eq!(h.state().await, AppsState::default());
    }

    #[tokio::test]
    async fn test_failed_stop_still_releases_slot() {
        let mut h = Harness::new(false, true).await;
        h.command(json!({"kind": "start-app", "name": "tilt"})).await.unwrap();
        h.command(json!({"kind": "stop-app"})).await.unwrap();

        assert_eq!(h.supervisor.running(), None);
        assert_eq!(h.state().await.running_app, None);
    }

    #[tokio::test]
    async fn test_unknown_app_leaves_state_untouched() {
        let mut h = Harness::idle().await;
        let writes_before = h.store.writes();

        let err = h
            .command(json!({"kind": "start-app", "name": "unknown-name"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Recipe(RecipeError::UnknownApp(_))));
        assert!(err.to_string().contains("unknown-name"));

        assert_eq!(h.supervisor.running(), None);
        assert!(h.calls().is_empty());
        // One write for the command itself, one for the acknowledgement.
        assert_eq!(h.store.writes(), writes_before + 2);
        assert_eq!(h.state().await, AppsState::default());
    }

    #[tokio::test]
    async fn test_missing_video_argument_does_not_occupy_slot() {
        let mut h = Harness::idle().await;
        let err = h
            .command(json!({"kind": "start-app", "name": "video"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Recipe(RecipeError::MissingArgument { .. })));
        assert_eq!(h.supervisor.running(), None);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_acknowledged_and_reported() {
        let mut h = Harness::idle().await;
        let err = h.command(json!({"kind": "reboot"})).await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidCommand(_)));
        assert_eq!(h.state().await.command, None);
    }

    #[tokio::test]
    async fn test_update_forwards_payload_to_attached_app() {
        let mut h = Harness::idle().await;
        h.command(json!({"kind": "start-app", "name": "paint"})).await.unwrap();
        let status_before = h.state().await.running_app;

        h.command(json!({"kind": "update-app-state", "payload": {"x": 1}}))
            .await
            .unwrap();

        let sends: Vec<Call> = h
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Send { .. }))
            .collect();
        assert_eq!(
            sends,
            vec![Call::Send {
                name: "paint".to_string(),
                payload: json!({"x": 1})
            }]
        );
        assert_eq!(
            h.calls()[0],
            Call::Launch {
                name: "paint".to_string(),
                mode: LaunchMode::Attached
            }
        );

        let state = h.state().await;
        assert_eq!(state.command, None);
        assert_eq!(state.running_app, status_before);
    }

    #[tokio::test]
    async fn test_update_on_idle_is_ignored() {
        let mut h = Harness::idle().await;
        let command = json!({"kind": "update-app-state", "payload": {"x": 1}});
        h.command(command.clone()).await.unwrap();

        assert!(h.calls().is_empty());
        assert_eq!(h.supervisor.running(), None);
        // Not acknowledged either.
        assert_eq!(h.state().await.command, Some(command));
    }

    #[tokio::test]
    async fn test_mock_mode_substitutes_mock_worker() {
        let mut h = Harness::new(true, false).await;
        h.command(json!({"kind": "start-app", "name": "sparkle"})).await.unwrap();

        assert_eq!(
            h.calls(),
            vec![Call::Launch {
                name: MOCK_APP.to_string(),
                mode: LaunchMode::Attached
            }]
        );
        assert_eq!(h.supervisor.running(), Some(AppName::Sparkle));
        assert_eq!(h.state().await.running_app, Some(AppExecution::running("sparkle")));

        let err = h
            .command(json!({"kind": "start-app", "name": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Recipe(RecipeError::UnknownApp(_))));
    }

    #[tokio::test]
    async fn test_slot_tracks_last_effective_transition() {
        let mut h = Harness::idle().await;
        let sequence = [
            (json!({"kind": "stop-app"}), None),
            (json!({"kind": "start-app", "name": "maze"}), Some(AppName::Maze)),
            (json!({"kind": "start-app", "name": "tilt"}), Some(AppName::Maze)),
            (json!({"kind": "update-app-state", "payload": 3}), Some(AppName::Maze)),
            (json!({"kind": "stop-app"}), None),
            (json!({"kind": "stop-app"}), None),
            (json!({"kind": "start-app", "name": "tilt"}), Some(AppName::Tilt)),
        ];

        for (command, expected) in sequence {
            let _ = h.command(command).await;
            assert_eq!(h.supervisor.running(), expected);
        }
    }

    #[tokio::test]
    async fn test_run_processes_commands_from_subscription() {
        let h = Harness::idle().await;
        let Harness { mut supervisor, store, calls } = h;

        let task = tokio::spawn(async move {
            let _ = supervisor.run().await;
            supervisor
        });

        store
            .update(APPS_DOC, field("command", json!({"kind": "start-app", "name": "cubemap"})))
            .await
            .unwrap();

        // Wait for the status write that follows the acknowledgement.
        let mut snapshots = store.subscribe(APPS_DOC).await.unwrap();
        while let Some(snapshot) = snapshots.recv().await {
            let state = AppsState::from_snapshot(snapshot).unwrap();
            if state.running_app.is_some() {
                break;
            }
        }

        // A bad command must not end the loop.
        store
            .update(APPS_DOC, field("command", json!({"kind": "start-app", "name": "bogus"})))
            .await
            .unwrap();
        store
            .update(APPS_DOC, field("command", json!({"kind": "stop-app"})))
            .await
            .unwrap();

        while let Some(snapshot) = snapshots.recv().await {
            let state = AppsState::from_snapshot(snapshot).unwrap();
            if state.running_app.is_none() && state.command.is_none() {
                break;
            }
        }

        task.abort();
        let launches = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Launch { .. }))
            .count();
        assert_eq!(launches, 1);
        assert_eq!(
            calls.lock().unwrap().last(),
            Some(&Call::Stop {
                name: "cubemap".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_run_ignores_foreign_running_app() {
        let Harness { mut supervisor, store, .. } = Harness::idle().await;
        store
            .update(APPS_DOC, field("runningApp", json!({"name": "debug", "status": "stopped"})))
            .await
            .unwrap();

        let task = tokio::spawn(async move {
            let _ = supervisor.run().await;
        });

        let mut snapshots = store.subscribe(APPS_DOC).await.unwrap();
        store
            .update(APPS_DOC, field("command", json!({"kind": "stop-app"})))
            .await
            .unwrap();

        let done = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(snapshot) = snapshots.recv().await {
                if snapshot.is_none() {
                    break;
                }
            }
        })
        .await;
        task.abort();

        assert!(done.is_ok(), "stop-app was never handled");
        assert_eq!(store.get(APPS_DOC).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_app() {
        let mut h = Harness::idle().await;
        h.command(json!({"kind": "start-app", "name": "particles"})).await.unwrap();
        h.supervisor.shutdown().await.unwrap();

        assert_eq!(h.supervisor.running(), None);
        assert_eq!(h.state().await.running_app, None);
        assert_eq!(
            h.calls().last(),
            Some(&Call::Stop {
                name: "particles".to_string()
            })
        );
    }
}
