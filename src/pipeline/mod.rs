//! Pipeline stages.
//!
//! Each stage reads its input artifacts in full, builds requests or training
//! records, and writes new artifacts. Per-record failures are tallied in the
//! returned [`StageStats`]; only I/O and input decoding abort a stage.
//!
//! Stage flow:
//! queries → resample → (completion service) → evaluate → (completion
//! service) → merge-sft / merge-dpo

mod augment;
mod dpo;
mod evaluate;
mod extract;
mod resample;
mod sft;

pub use augment::*;
pub use dpo::*;
pub use evaluate::*;
pub use extract::*;
pub use resample::*;
pub use sft::*;

use crate::artifact::read_jsonl;
use crate::batch::{Manifest, ResultSet};
use crate::models::{ManifestEntry, QueryRecord, RecordError, Result, StageStats};
use crate::selection::Judgment;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{debug, info};

/// Progress bar in the house style.
pub(crate) fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

/// Look up the source record a manifest group points at.
pub(crate) fn source_record<T>(records: &[T], index: usize) -> std::result::Result<&T, RecordError> {
    records.get(index).ok_or_else(|| {
        RecordError::schema(format!(
            "manifest references record {index}, input has {}",
            records.len()
        ))
    })
}

/// Log the end-of-run counters of a stage.
pub(crate) fn log_stats(stats: &StageStats) {
    info!(
        stage = %stats.stage,
        total = stats.total,
        skipped = stats.skipped,
        errors = stats.errors,
        missing = stats.missing,
        unresolved = stats.unresolved,
        emitted = stats.emitted,
        requests = stats.requests,
        malformed = stats.malformed,
        runtime_secs = format!("{:.2}", stats.runtime_secs),
        "Stage complete"
    );
}

/// Artifact paths consumed by the merge stages.
#[derive(Debug, Clone)]
pub struct MergePaths {
    /// Query records the resample requests were built from
    pub records: PathBuf,
    /// Manifest written beside the resample requests
    pub manifest: PathBuf,
    /// Results of the resample requests
    pub responses: PathBuf,
    /// Results of the evaluation requests
    pub evaluations: PathBuf,
}

/// Everything needed to select among one batch's judged replicas.
#[derive(Debug)]
pub struct JudgedBatch {
    pub records: Vec<QueryRecord>,
    pub manifest: Manifest,
    pub responses: ResultSet,
    pub evaluations: ResultSet,
}

impl JudgedBatch {
    pub fn load(paths: &MergePaths) -> Result<Self> {
        Ok(Self {
            records: read_jsonl(&paths.records)?,
            manifest: Manifest::load(&paths.manifest)?,
            responses: ResultSet::load(&paths.responses)?,
            evaluations: ResultSet::load(&paths.evaluations)?,
        })
    }

    /// Undecodable lines across both result files.
    pub fn malformed(&self) -> usize {
        self.responses.malformed() + self.evaluations.malformed()
    }

    /// The query and every replica's response for one manifest group.
    ///
    /// Any missing response fails the whole group.
    pub(crate) fn responses<'a>(
        &'a self,
        index: usize,
        entries: &'a [ManifestEntry],
    ) -> std::result::Result<(&'a QueryRecord, Vec<&'a str>), RecordError> {
        let record = source_record(&self.records, index)?;
        let texts = self
            .responses
            .ordered(entries)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((record, texts))
    }

    /// Judgment for one replica. A missing or unparseable evaluation is
    /// tallied and yields [`Judgment::Unparseable`].
    pub(crate) fn judge(&self, entry: &ManifestEntry, stats: &mut StageStats) -> Judgment {
        match self.evaluations.text(&entry.custom_id) {
            Ok(raw) => {
                let judgment = Judgment::from_reply(raw);
                if judgment == Judgment::Unparseable {
                    debug!(custom_id = %entry.custom_id, "Unparseable judgment");
                    stats.record(&RecordError::ParseFailure);
                }
                judgment
            }
            Err(e) => {
                debug!(custom_id = %entry.custom_id, error = %e, "No usable evaluation");
                stats.record(&e);
                Judgment::Unparseable
            }
        }
    }
}
