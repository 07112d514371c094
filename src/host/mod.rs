//! Host module for launching and controlling app processes

pub mod process;

pub use process::{Launcher, ProcessLauncher, RunningApp};
