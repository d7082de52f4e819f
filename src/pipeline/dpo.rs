//! DPO merge stage.
//!
//! Pairs the last satisfying replica of each query with its last violating
//! replica. Queries whose replicas all agree produce nothing.

use super::{JudgedBatch, MergePaths, log_stats, progress_bar};
use crate::artifact::RecordWriter;
use crate::models::{DpoRecord, QueryRecord, Result, StageStats};
use crate::selection::{DpoChoice, Replica, select_dpo};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeDpo;

impl MergeDpo {
    fn record_for(query: &QueryRecord, choice: &DpoChoice<'_>) -> DpoRecord {
        DpoRecord {
            prompt: query.query.clone(),
            chosen: choice.chosen.response.to_string(),
            rejected: choice.rejected.response.to_string(),
            history: query.history.clone(),
        }
    }

    pub fn merge(
        &self,
        batch: &JudgedBatch,
        output: &mut RecordWriter,
        stats: &mut StageStats,
    ) -> Result<()> {
        let pb = progress_bar(batch.manifest.groups().len());
        let mut no_signal = 0usize;

        for (index, entries) in batch.manifest.groups() {
            stats.total += 1;
            pb.inc(1);

            let (query, texts) = match batch.responses(*index, entries) {
                Ok(group) => group,
                Err(e) => {
                    debug!(record = index, error = %e, "Skipping query");
                    stats.record(&e);
                    continue;
                }
            };

            let replicas: Vec<_> = entries
                .iter()
                .zip(texts)
                .map(|(entry, response)| Replica {
                    index: entry.replica,
                    response,
                    judgment: batch.judge(entry, stats),
                })
                .collect();

            match select_dpo(replicas) {
                Some(choice) => {
                    output.write(&Self::record_for(query, &choice))?;
                    stats.emitted += 1;
                }
                None => no_signal += 1,
            }
            pb.set_message(format!("pairs: {}", stats.emitted));
        }

        pb.finish_and_clear();
        if no_signal > 0 {
            info!(queries = no_signal, "Queries without a chosen/rejected pair");
        }
        Ok(())
    }

    pub fn run(&self, paths: &MergePaths, output: &Path) -> Result<StageStats> {
        let mut stats = StageStats::new("merge-dpo");
        let batch = JudgedBatch::load(paths)?;
        stats.malformed = batch.malformed();

        info!(
            queries = batch.manifest.groups().len(),
            "Starting DPO merge"
        );

        let mut writer = RecordWriter::append(output)?;
        self.merge(&batch, &mut writer, &mut stats)?;
        writer.finish()?;

        stats.finalize();
        log_stats(&stats);
        info!(output = %output.display(), "DPO records written");
        Ok(stats)
    }
}
