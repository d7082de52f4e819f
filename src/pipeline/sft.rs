//! SFT merge stage.
//!
//! Pipeline flow:
//! manifest groups → responses + judgments → best-of-k → SFT records (append)

use super::{JudgedBatch, MergePaths, log_stats, progress_bar};
use crate::artifact::RecordWriter;
use crate::models::{Config, OnUnresolved, QueryRecord, Result, SftRecord, StageStats};
use crate::selection::{Replica, SftChoice, select_sft};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A query none of whose replicas satisfied every constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedQuery {
    pub record: usize,
    pub query: String,
    #[serde(rename = "eval question")]
    pub eval_question: Vec<String>,
    /// Response of the last replica scanned
    pub response: String,
}

/// Side file for unresolved queries: `sft.jsonl` -> `sft.unresolved.jsonl`.
pub fn unresolved_path(output: &Path) -> PathBuf {
    output.with_extension("unresolved.jsonl")
}

/// Selects one response per query for supervised fine-tuning.
#[derive(Debug, Clone, Copy)]
pub struct MergeSft {
    on_unresolved: OnUnresolved,
}

impl MergeSft {
    pub fn new(on_unresolved: OnUnresolved) -> Self {
        Self { on_unresolved }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.selection.on_unresolved)
    }

    /// Training record for a selection, or `None` when the policy drops it.
    pub fn record_for(&self, query: &QueryRecord, choice: &SftChoice<'_>) -> Option<SftRecord> {
        let constraints_satisfied = match (choice.resolved, self.on_unresolved) {
            (false, OnUnresolved::Drop) => return None,
            (resolved, OnUnresolved::EmitFlagged) => Some(resolved),
            _ => None,
        };
        Some(SftRecord {
            instruction: query.query.clone(),
            output: choice.replica.response.to_string(),
            history: query.history.clone(),
            constraints_satisfied,
        })
    }

    /// Select over every manifest group and write the results.
    pub fn merge(
        &self,
        batch: &JudgedBatch,
        output: &mut RecordWriter,
        unresolved: &mut RecordWriter,
        stats: &mut StageStats,
    ) -> Result<()> {
        let pb = progress_bar(batch.manifest.groups().len());

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

            let replicas = entries.iter().zip(texts).map(|(entry, response)| Replica {
                index: entry.replica,
                response,
                judgment: batch.judge(entry, stats),
            });
            let Some(choice) = select_sft(replicas) else {
                continue;
            };

            if !choice.resolved {
                stats.unresolved += 1;
                unresolved.write(&UnresolvedQuery {
                    record: *index,
                    query: query.query.clone(),
                    eval_question: query.eval_question.clone(),
                    response: choice.replica.response.to_string(),
                })?;
            }

            if let Some(record) = self.record_for(query, &choice) {
                output.write(&record)?;
                stats.emitted += 1;
            }
            pb.set_message(format!(
                "emitted: {}, unresolved: {}",
                stats.emitted, stats.unresolved
            ));
        }

        pb.finish_and_clear();
        Ok(())
    }

    pub fn run(&self, paths: &MergePaths, output: &Path) -> Result<StageStats> {
        let mut stats = StageStats::new("merge-sft");
        let batch = JudgedBatch::load(paths)?;
        stats.malformed = batch.malformed();

        info!(
            queries = batch.manifest.groups().len(),
            policy = ?self.on_unresolved,
            "Starting SFT merge"
        );

        let side_path = unresolved_path(output);
        let mut writer = RecordWriter::append(output)?;
        let mut side = RecordWriter::append(&side_path)?;
        self.merge(&batch, &mut writer, &mut side, &mut stats)?;
        writer.finish()?;
        side.finish()?;

        stats.finalize();
        log_stats(&stats);
        info!(
            output = %output.display(),
            unresolved = %side_path.display(),
            "SFT records written"
        );
        Ok(stats)
    }
}
