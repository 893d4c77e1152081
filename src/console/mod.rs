//! Console collaborators: output sinks and operator input.

mod operator;
mod sink;

pub use operator::*;
pub use sink::*;
