//! verisynth - Constraint-verified SFT/DPO dataset synthesis.
//!
//! ## Architecture
//!
//! Offline batch stages joined by JSONL artifacts:
//! - **Request building**: queries → prompts → `request-N` batches plus a
//!   manifest naming each request's source record
//! - **Completion**: any OpenAI-compatible batch service, or `run-batch`
//! - **Correlation**: results joined back through the manifest
//! - **Verification**: judge replies reduced to "every constraint satisfied"
//! - **Selection**: best-of-k into SFT records or DPO preference pairs
//!
//! Per-record failures never abort a stage; they are tallied in
//! [`StageStats`].

pub mod artifact;
pub mod batch;
pub mod client;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod pool;
pub mod prompt;
pub mod selection;

// Re-exports for convenience
pub use batch::{BatchRequestBuilder, Manifest, ResultSet, manifest_path};
pub use client::{CompletionService, LLMClient};
pub use models::{Config, RecordError, Result, StageStats, VerisynthError};
pub use parse::parse_structured;
pub use pool::WorkerPool;
pub use selection::{Judgment, is_satisfied, select_dpo, select_sft};
