//! Server process launching, process tree inspection and priority control.

mod child;
mod launch;
mod priority;
mod tree;

pub use child::*;
pub use launch::*;
pub use priority::*;
pub use tree::*;
