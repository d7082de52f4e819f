//! Completion client module.

mod llm_client;

pub use llm_client::*;
