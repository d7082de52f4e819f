//! Resampling stage: k candidate responses per query.

use super::{log_stats, progress_bar};
use crate::artifact::read_jsonl;
use crate::batch::{Batch, BatchRequestBuilder};
use crate::models::{Config, QueryRecord, Result, SamplingParams, Shard, StageStats};
use crate::prompt::resample_messages;
use std::path::Path;
use tracing::{debug, info};

/// Builds the resampling batch for one shard of query records.
#[derive(Debug, Clone)]
pub struct Resample {
    sampling: SamplingParams,
    replicas: usize,
    shard: Shard,
}

impl Resample {
    pub fn new(sampling: SamplingParams, replicas: usize, shard: Shard) -> Self {
        Self {
            sampling,
            replicas,
            shard,
        }
    }

    pub fn from_config(config: &Config, index: Option<usize>) -> Self {
        Self::new(
            config.sampling.resample.clone(),
            config.selection.replicas,
            config.shard(index),
        )
    }

    /// Requests for every well-formed record inside the shard window.
    ///
    /// Records with odd-length history are skipped before any id is drawn,
    /// so later records keep the ids they would have had.
    pub fn build(&self, records: &[QueryRecord], stats: &mut StageStats) -> Batch {
        let window = self.shard.window(records.len());
        let mut builder = BatchRequestBuilder::new(self.sampling.clone());
        let pb = progress_bar(window.len());

        for index in window {
            stats.total += 1;
            match resample_messages(&records[index]) {
                Ok(messages) => builder.push(index, &messages, self.replicas),
                Err(e) => {
                    debug!(record = index, error = %e, "Skipping record");
                    stats.record(&e);
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        stats.requests = builder.len();
        builder.finish()
    }

    pub fn run(&self, input: &Path, output: &Path) -> Result<StageStats> {
        let mut stats = StageStats::new("resample");
        let records: Vec<QueryRecord> = read_jsonl(input)?;

        info!(
            records = records.len(),
            replicas = self.replicas,
            shard = ?self.shard.index,
            "Building resample requests"
        );

        let batch = self.build(&records, &mut stats);
        batch.write(output)?;
        stats.emitted = batch.len();
        stats.finalize();
        log_stats(&stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Turn;

    fn stage(k: usize, shard: Shard) -> Resample {
        Resample::new(SamplingParams::greedy("m"), k, shard)
    }

    #[test]
    fn test_malformed_history_does_not_shift_ids() {
        let records = vec![
            QueryRecord::new("a"),
            QueryRecord::new("b").with_history(vec![
                Turn::new("human", "x"),
                Turn::new("gpt", "y"),
                Turn::new("human", "z"),
            ]),
            QueryRecord::new("c"),
        ];
        let mut stats = StageStats::new("resample");
        let batch = stage(2, Shard::all()).build(&records, &mut stats);

        assert_eq!(batch.len(), 4);
        assert_eq!(stats.skipped, 1);
        let third: Vec<_> = batch
            .manifest
            .iter()
            .filter(|e| e.record == 2)
            .map(|e| e.custom_id.as_str())
            .collect();
        assert_eq!(third, ["request-3", "request-4"]);
    }

    #[test]
    fn test_shard_window_keeps_global_indices() {
        let records: Vec<_> = (0..5).map(|i| QueryRecord::new(format!("q{i}"))).collect();
        let mut stats = StageStats::new("resample");
        let batch = stage(1, Shard::new(Some(1), 2)).build(&records, &mut stats);

        assert_eq!(stats.total, 2);
        let indices: Vec<_> = batch.manifest.iter().map(|e| e.record).collect();
        assert_eq!(indices, [2, 3]);
        assert_eq!(batch.requests[0].custom_id, "request-1");
    }

    #[test]
    fn test_shard_past_end_is_empty() {
        let records = vec![QueryRecord::new("q")];
        let mut stats = StageStats::new("resample");
        let batch = stage(5, Shard::new(Some(3), 10)).build(&records, &mut stats);
        assert!(batch.is_empty());
        assert_eq!(stats.total, 0);
    }
}
