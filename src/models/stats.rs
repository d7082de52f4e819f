//! End-of-stage counters.
//!
//! These are the only failure signal a stage reports for per-record problems.

use super::RecordError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics for one stage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStats {
    /// Stage name
    pub stage: String,

    /// Source records inside the shard window
    pub total: usize,

    /// Records skipped before any request was built (malformed history)
    pub skipped: usize,

    /// Per-record failures (parse, schema, missing correlation)
    pub errors: usize,

    /// Missing-correlation failures, also counted in `errors`
    pub missing: usize,

    /// SFT queries where no replica satisfied every constraint
    pub unresolved: usize,

    /// Records or requests written
    pub emitted: usize,

    /// Requests built (request-building stages)
    pub requests: usize,

    /// Result-file lines that did not decode
    pub malformed: usize,

    pub started_at: DateTime<Utc>,

    /// Total runtime in seconds
    pub runtime_secs: f64,
}

impl StageStats {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            total: 0,
            skipped: 0,
            errors: 0,
            missing: 0,
            unresolved: 0,
            emitted: 0,
            requests: 0,
            malformed: 0,
            started_at: Utc::now(),
            runtime_secs: 0.0,
        }
    }

    /// Tally a per-record failure under the right counter.
    pub fn record(&mut self, error: &RecordError) {
        if error.is_skip() {
            self.skipped += 1;
            return;
        }
        if matches!(error, RecordError::MissingCorrelation { .. }) {
            self.missing += 1;
        }
        self.errors += 1;
    }

    /// Stamp the runtime.
    pub fn finalize(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.runtime_secs = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tally() {
        let mut stats = StageStats::new("merge-sft");
        stats.record(&RecordError::MalformedHistory { len: 1 });
        stats.record(&RecordError::ParseFailure);
        stats.record(&RecordError::MissingCorrelation {
            custom_id: "request-3".into(),
        });

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.missing, 1);
    }

    #[test]
    fn test_finalize_non_negative() {
        let mut stats = StageStats::new("resample");
        stats.finalize();
        assert!(stats.runtime_secs >= 0.0);
    }
}
