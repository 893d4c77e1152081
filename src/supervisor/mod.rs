//! Supervisor module: server lifecycle, console commands and metadata.

mod command;
mod inject;
mod runner;
mod state;

pub use command::*;
pub use inject::metadata_commands;
pub use runner::*;
pub use state::*;
