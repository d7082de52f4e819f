//! Judgment aggregation and best-of-k selection.

mod best_of;
mod judgment;

pub use best_of::*;
pub use judgment::*;
