//! Worker pool for executing request batches.

mod worker;

pub use worker::*;
