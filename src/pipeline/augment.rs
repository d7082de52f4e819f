//! Query augmentation rounds.
//!
//! The composer model adds one constraint to a query and returns the
//! augmented query with an evaluation question for the new constraint.
//! Running request/merge repeatedly accumulates constraints.

use super::{log_stats, progress_bar, source_record};
use crate::artifact::{read_jsonl, write_jsonl};
use crate::batch::{Batch, BatchRequestBuilder, Manifest, ResultSet};
use crate::models::{Config, QueryRecord, RecordError, Result, SamplingParams, Shard, StageStats};
use crate::parse::{AugmentedQuery, parse_augmented};
use crate::prompt::augment_messages;
use std::path::Path;
use tracing::debug;

/// Phrases that mark a reply as prompt leakage rather than a query.
const LEAKED_INSTRUCTIONS: &[&str] = &["human evaluator", "provide the response in JSON format"];

#[derive(Debug, Clone)]
pub struct AugmentRequests {
    sampling: SamplingParams,
    shard: Shard,
}

impl AugmentRequests {
    pub fn new(sampling: SamplingParams, shard: Shard) -> Self {
        Self { sampling, shard }
    }

    pub fn from_config(config: &Config, index: Option<usize>) -> Self {
        Self::new(config.sampling.augment.clone(), config.shard(index))
    }

    pub fn build(&self, records: &[QueryRecord], stats: &mut StageStats) -> Batch {
        let window = self.shard.window(records.len());
        let mut builder = BatchRequestBuilder::new(self.sampling.clone());
        for index in window {
            stats.total += 1;
            builder.push(index, &augment_messages(&records[index]), 1);
        }
        stats.requests = builder.len();
        builder.finish()
    }

    pub fn run(&self, input: &Path, output: &Path) -> Result<StageStats> {
        let mut stats = StageStats::new("augment-requests");
        let records: Vec<QueryRecord> = read_jsonl(input)?;
        let batch = self.build(&records, &mut stats);
        batch.write(output)?;
        stats.emitted = batch.len();
        stats.finalize();
        log_stats(&stats);
        Ok(stats)
    }
}

/// Accept a composer reply for `record`, or explain why not.
fn accept(record: &QueryRecord, reply: &str) -> std::result::Result<AugmentedQuery, RecordError> {
    let parsed = parse_augmented(reply).ok_or(RecordError::ParseFailure)?;
    let augmented = parsed.value;
    if LEAKED_INSTRUCTIONS
        .iter()
        .any(|phrase| augmented.augmented_query.contains(phrase))
    {
        return Err(RecordError::schema("augmented query echoes the instructions"));
    }
    if augmented.augmented_query == record.query {
        return Err(RecordError::schema("augmented query is unchanged"));
    }
    Ok(augmented)
}

/// Apply one augmentation round to `record`.
///
/// A rejected reply leaves the query as it was and adds no questions; the
/// record still carries forward so later rounds can retry it.
pub fn augment_record(
    record: &QueryRecord,
    reply: std::result::Result<&str, RecordError>,
) -> (QueryRecord, Option<RecordError>) {
    let mut next = record.clone();
    next.initial_query = Some(
        record
            .initial_query
            .clone()
            .unwrap_or_else(|| record.query.clone()),
    );

    match reply.and_then(|reply| accept(record, reply)) {
        Ok(augmented) => {
            next.query = augmented.augmented_query;
            next.eval_question.extend(augmented.question);
            (next, None)
        }
        Err(e) => (next, Some(e)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AugmentMerge;

impl AugmentMerge {
    pub fn merge(
        &self,
        records: &[QueryRecord],
        manifest: &Manifest,
        results: &ResultSet,
        stats: &mut StageStats,
    ) -> Vec<QueryRecord> {
        let pb = progress_bar(manifest.len());
        let mut augmented = Vec::with_capacity(manifest.len());

        for entry in manifest.entries() {
            stats.total += 1;
            pb.inc(1);

            let record = match source_record(records, entry.record) {
                Ok(record) => record,
                Err(e) => {
                    stats.record(&e);
                    continue;
                }
            };

            let (next, rejected) = augment_record(record, results.text(&entry.custom_id));
            match rejected {
                Some(e) => {
                    debug!(custom_id = %entry.custom_id, error = %e, "Keeping query unchanged");
                    stats.record(&e);
                }
                None => stats.emitted += 1,
            }
            augmented.push(next);
        }

        pb.finish_and_clear();
        augmented
    }

    pub fn run(
        &self,
        records: &Path,
        manifest: &Path,
        results: &Path,
        output: &Path,
    ) -> Result<StageStats> {
        let mut stats = StageStats::new("augment-merge");
        let records: Vec<QueryRecord> = read_jsonl(records)?;
        let manifest = Manifest::load(manifest)?;
        let results = ResultSet::load(results)?;
        stats.malformed = results.malformed();

        let augmented = self.merge(&records, &manifest, &results, &mut stats);
        write_jsonl(output, &augmented)?;

        stats.finalize();
        log_stats(&stats);
        Ok(stats)
    }
}
