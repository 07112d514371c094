//! Core data models: remote commands, published status and launch recipes

mod command;
mod execution;
mod recipe;

pub use command::*;
pub use execution::*;
pub use recipe::*;
