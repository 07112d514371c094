//! Launch recipes - how each known app is started on the device

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flags shared by every binary driving the 64x64 x2 x3 panel layout
const LED_MATRIX_FLAGS: [&str; 5] = [
    "--led-rows=64",
    "--led-cols=64",
    "--led-chain=2",
    "--led-parallel=3",
    "--led-slowdown-gpio=2",
];

/// Name of the mock worker substituted when real apps are disabled
pub const MOCK_APP: &str = "mock";

/// Errors resolving an app into a recipe
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecipeError {
    #[error("Cannot start unknown app '{0}'")]
    UnknownApp(String),

    #[error("App '{app}' requires argument: {argument}")]
    MissingArgument { app: AppName, argument: &'static str },
}

/// How the supervisor talks to a launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Own process group, no message channel
    Detached,
    /// Own process group plus a Node IPC message channel
    Attached,
}

impl LaunchMode {
    pub fn accepts_messages(&self) -> bool {
        matches!(self, LaunchMode::Attached)
    }
}

/// Everything needed to start one app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub mode: LaunchMode,
}

impl Recipe {
    fn detached(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            mode: LaunchMode::Detached,
        }
    }

    fn attached(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            mode: LaunchMode::Attached,
        }
    }
}

/// Install locations the recipes are built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppPaths {
    /// Node.js binary used for the script apps
    pub node: PathBuf,
    /// Root of the built apps package (`dist/` and `videos/` live here)
    pub apps_dir: PathBuf,
    /// Checkout of the rpi-rgb-led-matrix library
    pub matrix_dir: PathBuf,
    /// Entry point of the mock worker
    pub mock_script: PathBuf,
}

impl Default for AppPaths {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            node: which::which("node").unwrap_or_else(|_| PathBuf::from("node")),
            apps_dir: cwd.join("apps"),
            matrix_dir: PathBuf::from("/home/pi/rpi-rgb-led-matrix"),
            mock_script: cwd.join("mock").join("dist").join("mock").join("src").join("index.js"),
        }
    }
}

/// The fixed set of apps the supervisor knows how to launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppName {
    RpiDemos,
    Video,
    Cubemap,
    Sparkle,
    Debug,
    Paint,
    Sprinkles,
    Particles,
    ParticleFlow,
    Maze,
    Tilt,
}

impl AppName {
    pub const ALL: [AppName; 11] = [
        AppName::RpiDemos,
        AppName::Video,
        AppName::Cubemap,
        AppName::Sparkle,
        AppName::Debug,
        AppName::Paint,
        AppName::Sprinkles,
        AppName::Particles,
        AppName::ParticleFlow,
        AppName::Maze,
        AppName::Tilt,
    ];

    /// Name used in commands and in the published status
    pub fn as_str(&self) -> &'static str {
        match self {
            AppName::RpiDemos => "rpiDemos",
            AppName::Video => "video",
            AppName::Cubemap => "cubemap",
            AppName::Sparkle => "sparkle",
            AppName::Debug => "debug",
            AppName::Paint => "paint",
            AppName::Sprinkles => "sprinkles",
            AppName::Particles => "particles",
            AppName::ParticleFlow => "particleFlow",
            AppName::Maze => "maze",
            AppName::Tilt => "tilt",
        }
    }

    /// Look up an app by its command name
    pub fn from_name(name: &str) -> Result<Self, RecipeError> {
        Self::ALL
            .into_iter()
            .find(|app| app.as_str() == name)
            .ok_or_else(|| RecipeError::UnknownApp(name.to_string()))
    }

    /// Build the launch recipe for this app
    pub fn recipe(&self, args: &[String], paths: &AppPaths) -> Result<Recipe, RecipeError> {
        match self {
            AppName::RpiDemos => {
                let program = paths.matrix_dir.join("examples-api-use").join("demo");
                Ok(Recipe::detached(program, matrix_args(args.iter().cloned())))
            }
            AppName::Video => {
                let file = args.first().ok_or(RecipeError::MissingArgument {
                    app: *self,
                    argument: "video file name",
                })?;
                let video = paths.apps_dir.join("videos").join(file);
                let extra = ["-f".to_string(), "-F".to_string(), video.display().to_string()];
                let program = paths.matrix_dir.join("utils").join("video-viewer");
                Ok(Recipe::detached(program, matrix_args(extra.into_iter())))
            }
            AppName::Paint => {
                let script = paths.apps_dir.join("dist").join("apps").join("src").join("paint.js");
                Ok(Recipe::attached(&paths.node, vec![script.display().to_string()]))
            }
            _ => {
                let script = paths
                    .apps_dir
                    .join("dist")
                    .join("apps")
                    .join("src")
                    .join(self.as_str())
                    .join("index.js");
                let mut node_args = vec![script.display().to_string()];
                node_args.extend(args.iter().cloned());
                Ok(Recipe::detached(&paths.node, node_args))
            }
        }
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recipe for the stand-in worker used on machines without the display
///
/// The worker is a Node script reading updates from its IPC channel.
pub fn mock_recipe(paths: &AppPaths) -> Recipe {
    Recipe::attached(&paths.node, vec![paths.mock_script.display().to_string()])
}

fn matrix_args(extra: impl Iterator<Item = String>) -> Vec<String> {
    LED_MATRIX_FLAGS
        .iter()
        .map(|flag| flag.to_string())
        .chain(extra)
        .collect()
}
