//! Core data models for verisynth.
//!
//! - `record`: query records, the tagged `Query` variant, training records
//! - `batch`: completion request/result wire types and manifest lines
//! - `config`: TOML configuration
//! - `error`: stage-level and per-record errors
//! - `stats`: end-of-stage counters

mod batch;
mod config;
mod error;
mod record;
mod stats;

pub use batch::*;
pub use config::*;
pub use error::*;
pub use record::*;
pub use stats::*;
