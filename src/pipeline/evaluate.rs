//! Evaluation stage: one judge request per sampled response.
//!
//! Judge requests reuse the resample manifest's ids, so the evaluation
//! results join back onto the same manifest.

use super::{log_stats, source_record};
use crate::artifact::read_jsonl;
use crate::batch::{Batch, BatchRequestBuilder, Manifest, ResultSet};
use crate::models::{Config, QueryRecord, Result, SamplingParams, StageStats};
use crate::prompt::evaluation_messages;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Evaluate {
    sampling: SamplingParams,
}

impl Evaluate {
    pub fn new(sampling: SamplingParams) -> Self {
        Self { sampling }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sampling.evaluate.clone())
    }

    pub fn build(
        &self,
        records: &[QueryRecord],
        manifest: &Manifest,
        responses: &ResultSet,
        stats: &mut StageStats,
    ) -> Batch {
        let mut builder = BatchRequestBuilder::new(self.sampling.clone());

        for (index, entries) in manifest.groups() {
            stats.total += 1;
            let record = match source_record(records, *index) {
                Ok(record) => record,
                Err(e) => {
                    stats.record(&e);
                    continue;
                }
            };

            for entry in entries {
                match responses.text(&entry.custom_id) {
                    Ok(response) => builder.push_correlated(
                        entry.clone(),
                        evaluation_messages(&record.query, response, &record.eval_question),
                    ),
                    Err(e) => {
                        debug!(custom_id = %entry.custom_id, error = %e, "No response to evaluate");
                        stats.record(&e);
                    }
                }
            }
        }

        stats.requests = builder.len();
        builder.finish()
    }

    pub fn run(
        &self,
        records: &Path,
        manifest: &Path,
        responses: &Path,
        output: &Path,
    ) -> Result<StageStats> {
        let mut stats = StageStats::new("evaluate");
        let records: Vec<QueryRecord> = read_jsonl(records)?;
        let manifest = Manifest::load(manifest)?;
        let responses = ResultSet::load(responses)?;
        stats.malformed = responses.malformed();

        info!(
            manifest = manifest.len(),
            responses = responses.len(),
            "Building evaluation requests"
        );

        let batch = self.build(&records, &manifest, &responses, &mut stats);
        batch.write(output)?;
        stats.emitted = batch.len();
        stats.finalize();
        log_stats(&stats);
        Ok(stats)
    }
}
