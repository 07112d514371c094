//! Configuration file handling
//!
//! Settings come from a TOML file (explicit `--config`, else the per-user
//! config directory when present, else defaults) and are then overridden by
//! command-line flags and their environment variables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppPaths;
use crate::store::{FirebaseStore, MemoryStore, StateStore};
use crate::supervisor::SupervisorSettings;

/// Which state store the supervisor talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, commands fed locally
    #[default]
    Memory,
    /// Firebase Realtime Database
    Firebase,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database URL, e.g. `https://my-project.firebaseio.com`
    pub url: Option<String>,
    /// Database secret or ID token appended as `auth=`
    pub auth_token: Option<String>,
}

impl StoreConfig {
    /// Connect to the configured backend
    pub fn open(&self) -> anyhow::Result<Arc<dyn StateStore>> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Firebase => {
                let url = self
                    .url
                    .as_deref()
                    .context("Firebase backend requires a database URL")?;
                let store = FirebaseStore::new(url, self.auth_token.clone())
                    .with_context(|| format!("Invalid Firebase URL '{}'", url))?;
                Ok(Arc::new(store))
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        self.backend != StoreBackend::Memory
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Start the mock worker instead of real apps (no display attached)
    pub mock_running_apps: bool,
    /// Default log filter when `RUST_LOG` is not set
    pub log_level: String,
    pub paths: AppPaths,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mock_running_apps: false,
            log_level: "info".to_string(),
            paths: AppPaths::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mock_running_apps: bool,
    pub firebase_url: Option<String>,
    pub firebase_auth: Option<String>,
}

impl Config {
    /// Per-user config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("matrixvisor").join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply command-line and environment overrides
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if overrides.mock_running_apps {
            self.mock_running_apps = true;
        }
        if let Some(url) = overrides.firebase_url {
            self.store.backend = StoreBackend::Firebase;
            self.store.url = Some(url);
        }
        if let Some(auth) = overrides.firebase_auth {
            self.store.auth_token = Some(auth);
        }
        self
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            mock_apps: self.mock_running_apps,
            paths: self.paths.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.mock_running_apps);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.paths.apps_dir.ends_with("apps"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            mock_running_apps = true

            [paths]
            matrix_dir = "/opt/matrix"

            [store]
            backend = "firebase"
            url = "https://matrix-demo.firebaseio.com"
            "#,
        )
        .unwrap();

        assert!(config.mock_running_apps);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.paths.matrix_dir, PathBuf::from("/opt/matrix"));
        assert_eq!(config.paths.apps_dir, AppPaths::default().apps_dir);
        assert!(config.store.is_remote());
        assert!(config.store.open().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"debug\"").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.log_level, "debug");

        let missing = file.path().with_extension("missing");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        assert!(Config::from_toml("[store]\nbackend = \"redis\"").is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_overrides(Overrides {
            mock_running_apps: true,
            firebase_url: Some("https://matrix-demo.firebaseio.com".to_string()),
            firebase_auth: Some("token".to_string()),
        });

        assert!(config.supervisor_settings().mock_apps);
        assert_eq!(config.store.backend, StoreBackend::Firebase);
        assert_eq!(config.store.auth_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_firebase_without_url_fails_to_open() {
        let store = StoreConfig {
            backend: StoreBackend::Firebase,
            url: None,
            auth_token: None,
        };
        assert!(store.open().is_err());
    }
}
