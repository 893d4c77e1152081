//! Server output handling: stream wiring, hitch detection and capture.

mod bridge;
mod capture;
mod hitch;

pub use bridge::*;
pub use capture::*;
pub use hitch::*;
