//! Request batches: building them, and joining their results back.

mod builder;
mod correlator;

pub use builder::*;
pub use correlator::*;
