//! Constraint extraction and evaluation-question generation.
//!
//! Three stages feed the query composer's training data:
//! 1. `ExtractRequests`: one extraction request per query.
//! 2. `QuestionRequests`: parse extraction replies into [`Query`] values and
//!    ask for one evaluation question per constraint.
//! 3. `ComposerData`: pair each constraint's simplified query with the
//!    original query and its generated question.

use super::{log_stats, progress_bar, source_record};
use crate::artifact::{RecordWriter, read_jsonl, write_jsonl};
use crate::batch::{Batch, BatchRequestBuilder, Manifest, ResultSet};
use crate::models::{
    ComposerRecord, Config, ExtractedQuery, Query, QueryRecord, RecordError, Result,
    SamplingParams, Shard, StageStats,
};
use crate::parse::parse_structured;
use crate::prompt::{extraction_messages, question_messages};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Constraint-extraction requests for one shard of queries.
#[derive(Debug, Clone)]
pub struct ExtractRequests {
    sampling: SamplingParams,
    shard: Shard,
}

impl ExtractRequests {
    pub fn new(sampling: SamplingParams, shard: Shard) -> Self {
        Self { sampling, shard }
    }

    pub fn from_config(config: &Config, index: Option<usize>) -> Self {
        Self::new(config.sampling.extract.clone(), config.shard(index))
    }

    pub fn build(&self, records: &[QueryRecord], stats: &mut StageStats) -> Batch {
        let window = self.shard.window(records.len());
        let mut builder = BatchRequestBuilder::new(self.sampling.clone());
        for index in window {
            stats.total += 1;
            builder.push(index, &extraction_messages(&records[index].query), 1);
        }
        stats.requests = builder.len();
        builder.finish()
    }

    pub fn run(&self, input: &Path, output: &Path) -> Result<StageStats> {
        let mut stats = StageStats::new("extract-requests");
        let records: Vec<QueryRecord> = read_jsonl(input)?;
        let batch = self.build(&records, &mut stats);
        batch.write(output)?;
        stats.emitted = batch.len();
        stats.finalize();
        log_stats(&stats);
        Ok(stats)
    }
}

/// Interpret one raw extraction reply.
pub fn parse_extraction(text: &str) -> std::result::Result<Query, RecordError> {
    let value = parse_structured(text).ok_or(RecordError::ParseFailure)?;
    Query::from_extraction(&value)
}

/// Parsed constraints plus the question-generation batch built from them.
#[derive(Debug, Clone, Default)]
pub struct QuestionBatch {
    pub extracted: Vec<ExtractedQuery>,
    pub batch: Batch,
}

/// Question-generation requests, one per extracted constraint.
///
/// Manifest `replica` is the constraint's ordinal within its query.
#[derive(Debug, Clone)]
pub struct QuestionRequests {
    sampling: SamplingParams,
}

impl QuestionRequests {
    pub fn new(sampling: SamplingParams) -> Self {
        Self { sampling }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sampling.questions.clone())
    }

    pub fn build(
        &self,
        records: &[QueryRecord],
        manifest: &Manifest,
        results: &ResultSet,
        stats: &mut StageStats,
    ) -> QuestionBatch {
        let mut builder = BatchRequestBuilder::new(self.sampling.clone());
        let mut extracted = Vec::new();

        for (index, entries) in manifest.groups() {
            for entry in entries {
                stats.total += 1;
                let parsed = source_record(records, *index).and_then(|record| {
                    let text = results.text(&entry.custom_id)?;
                    Ok((record, parse_extraction(text)?))
                });
                let (record, query) = match parsed {
                    Ok(ok) => ok,
                    Err(e) => {
                        debug!(custom_id = %entry.custom_id, error = %e, "Unusable extraction");
                        stats.record(&e);
                        continue;
                    }
                };

                for (ordinal, constraint) in query.constraints().iter().enumerate() {
                    builder.push_replica(
                        *index,
                        ordinal,
                        question_messages(&record.query, &constraint.text),
                    );
                }
                extracted.push(ExtractedQuery {
                    record: *index,
                    query: record.query.clone(),
                    parsed: query,
                });
            }
        }

        stats.requests = builder.len();
        QuestionBatch {
            extracted,
            batch: builder.finish(),
        }
    }

    pub fn run(
        &self,
        records: &Path,
        manifest: &Path,
        results: &Path,
        constraints_out: &Path,
        requests_out: &Path,
    ) -> Result<StageStats> {
        let mut stats = StageStats::new("question-requests");
        let records: Vec<QueryRecord> = read_jsonl(records)?;
        let manifest = Manifest::load(manifest)?;
        let results = ResultSet::load(results)?;
        stats.malformed = results.malformed();

        let built = self.build(&records, &manifest, &results, &mut stats);
        stats.emitted = write_jsonl(constraints_out, &built.extracted)?;
        built.batch.write(requests_out)?;

        let complex = built
            .extracted
            .iter()
            .filter(|q| matches!(q.parsed, Query::Complex { .. }))
            .count();
        info!(
            parsed = built.extracted.len(),
            complex,
            constraints = built.batch.len(),
            path = %constraints_out.display(),
            "Wrote extracted constraints"
        );

        stats.finalize();
        log_stats(&stats);
        Ok(stats)
    }
}

/// Read the `question` field of a question-generation reply.
///
/// Returns `Ok(None)` for the deliberate empty answer given to constraints
/// that are part of the content rather than a restriction.
pub fn parse_question(text: &str) -> std::result::Result<Option<String>, RecordError> {
    let value = parse_structured(text).ok_or(RecordError::ParseFailure)?;
    let question = value
        .get("question")
        .and_then(|q| q.as_str())
        .ok_or_else(|| RecordError::schema("reply has no string 'question'"))?
        .trim();
    Ok((!question.is_empty()).then(|| question.to_string()))
}

/// Composer training records from generated questions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposerData;

impl ComposerData {
    pub fn merge(
        &self,
        extracted: &[ExtractedQuery],
        manifest: &Manifest,
        results: &ResultSet,
        output: &mut RecordWriter,
        stats: &mut StageStats,
    ) -> Result<()> {
        let by_record: HashMap<usize, &ExtractedQuery> =
            extracted.iter().map(|q| (q.record, q)).collect();
        let pb = progress_bar(manifest.len());

        for entry in manifest.entries() {
            stats.total += 1;
            pb.inc(1);

            let found = by_record
                .get(&entry.record)
                .and_then(|q| Some((*q, q.parsed.constraints().get(entry.replica)?)));
            let Some((query, constraint)) = found else {
                stats.record(&RecordError::schema(format!(
                    "no constraint {} for record {}",
                    entry.replica, entry.record
                )));
                continue;
            };

            let question = match results
                .text(&entry.custom_id)
                .and_then(parse_question)
            {
                Ok(Some(question)) => question,
                Ok(None) => {
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => {
                    debug!(custom_id = %entry.custom_id, error = %e, "Unusable question");
                    stats.record(&e);
                    continue;
                }
            };

            if constraint.simplified_text == query.query {
                stats.skipped += 1;
                continue;
            }

            output.write(&ComposerRecord {
                simplified_query: constraint.simplified_text.clone(),
                query: query.query.clone(),
                tool: json!({ "question": [question] }).to_string(),
            })?;
            stats.emitted += 1;
        }

        pb.finish_and_clear();
        Ok(())
    }

    pub fn run(
        &self,
        constraints: &Path,
        manifest: &Path,
        results: &Path,
        output: &Path,
    ) -> Result<StageStats> {
        let mut stats = StageStats::new("composer-data");
        let extracted: Vec<ExtractedQuery> = read_jsonl(constraints)?;
        let manifest = Manifest::load(manifest)?;
        let results = ResultSet::load(results)?;
        stats.malformed = results.malformed();

        let mut writer = RecordWriter::append(output)?;
        self.merge(&extracted, &manifest, &results, &mut writer, &mut stats)?;
        writer.finish()?;

        stats.finalize();
        log_stats(&stats);
        Ok(stats)
    }
}
