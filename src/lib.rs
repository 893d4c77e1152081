//! FX Supervisor - launches, monitors and controls a long-running game server.

pub mod config;
pub mod console;
pub mod display;
pub mod process;
pub mod stream;
pub mod supervisor;
