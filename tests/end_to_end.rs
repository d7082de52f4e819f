//! Drives resample → evaluate → merge over temp files with canned results.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use verisynth::artifact::{read_jsonl, write_jsonl};
use verisynth::models::{
    CompletionRequest, CompletionResult, DpoRecord, ManifestEntry, OnUnresolved, QueryRecord,
    RequestBody, SamplingParams, SftRecord, Shard, Turn,
};
use verisynth::pipeline::{Evaluate, MergeDpo, MergePaths, MergeSft, Resample, unresolved_path};
use verisynth::{CompletionService, WorkerPool, manifest_path};

const HAIKU: &str = "Write a haiku about rain. Use exactly 3 lines.";

fn judgment(score: &str) -> String {
    format!("```json\n{{\"Question 1\": {{\"explanation\": \"...\", \"score\": \"{score}\"}}}}\n```")
}

struct Workspace {
    _dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        Self { _dir: dir, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Results for every request in `requests`, content chosen per id.
fn answer(requests: &Path, output: &Path, content: impl Fn(&CompletionRequest) -> Option<String>) {
    let requests: Vec<CompletionRequest> = read_jsonl(requests).unwrap();
    let results: Vec<_> = requests
        .iter()
        .filter_map(|r| content(r).map(|c| CompletionResult::success(r.custom_id.clone(), c)))
        .collect();
    write_jsonl(output, &results).unwrap();
}

/// Runs resample and evaluate; `respond` and `judge` see `(custom_id)`.
fn run_through_evaluate(
    ws: &Workspace,
    records: &[QueryRecord],
    k: usize,
    respond: impl Fn(&str) -> Option<String>,
    judge: impl Fn(&str) -> Option<String>,
) -> MergePaths {
    let input = ws.path("queries.jsonl");
    write_jsonl(&input, records).unwrap();

    let resample_requests = ws.path("resample_requests.jsonl");
    Resample::new(SamplingParams::greedy("responder"), k, Shard::all())
        .run(&input, &resample_requests)
        .unwrap();

    let responses = ws.path("resample_results.jsonl");
    answer(&resample_requests, &responses, |r| respond(&r.custom_id));

    let eval_requests = ws.path("evaluate_requests.jsonl");
    Evaluate::new(SamplingParams::greedy("judge"))
        .run(&input, &manifest_path(&resample_requests), &responses, &eval_requests)
        .unwrap();

    let evaluations = ws.path("evaluate_results.jsonl");
    answer(&eval_requests, &evaluations, |r| judge(&r.custom_id));

    MergePaths {
        records: input,
        manifest: manifest_path(&resample_requests),
        responses,
        evaluations,
    }
}

#[test]
fn test_haiku_selects_satisfying_replica() {
    let ws = Workspace::new();
    let records =
        vec![QueryRecord::new(HAIKU).with_questions(["Does the haiku have exactly 3 lines?"])];

    let paths = run_through_evaluate(
        &ws,
        &records,
        2,
        |id| {
            Some(match id {
                "request-1" => "Rain falls on the roof\nsoftly\ndrumming\nall night long".into(),
                _ => "Soft rain on the roof\ndrumming a patient rhythm\nthe gutters listen".into(),
            })
        },
        |id| Some(judgment(if id == "request-1" { "NO" } else { "YES" })),
    );

    let output = ws.path("sft.jsonl");
    let stats = MergeSft::new(OnUnresolved::EmitLast).run(&paths, &output).unwrap();

    let rows: Vec<SftRecord> = read_jsonl(&output).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].instruction, HAIKU);
    assert!(rows[0].output.starts_with("Soft rain on the roof"));
    assert_eq!(stats.emitted, 1);
    assert_eq!(stats.unresolved, 0);
    assert_eq!(stats.errors, 0);
}

#[test]
fn test_evaluation_reuses_resample_ids() {
    let ws = Workspace::new();
    let records = vec![QueryRecord::new("a").with_questions(["q"])];
    let paths = run_through_evaluate(&ws, &records, 3, |id| Some(id.to_string()), |_| None);

    let eval_manifest: Vec<ManifestEntry> =
        read_jsonl(&ws.path("evaluate_requests.manifest.jsonl")).unwrap();
    let resample_manifest: Vec<ManifestEntry> = read_jsonl(&paths.manifest).unwrap();
    assert_eq!(eval_manifest, resample_manifest);
}

#[test]
fn test_malformed_history_keeps_ids_aligned() {
    let ws = Workspace::new();
    let records = vec![
        QueryRecord::new("first").with_questions(["q"]),
        QueryRecord::new("broken").with_history(vec![
            Turn::new("human", "a"),
            Turn::new("gpt", "b"),
            Turn::new("human", "c"),
        ]),
        QueryRecord::new("third").with_questions(["q"]),
    ];

    let paths = run_through_evaluate(
        &ws,
        &records,
        2,
        |id| Some(format!("response {id}")),
        |_| Some(judgment("YES")),
    );

    let manifest: Vec<ManifestEntry> = read_jsonl(&paths.manifest).unwrap();
    let third: Vec<_> = manifest
        .iter()
        .filter(|e| e.record == 2)
        .map(|e| e.custom_id.as_str())
        .collect();
    assert_eq!(third, ["request-3", "request-4"]);

    let output = ws.path("sft.jsonl");
    MergeSft::new(OnUnresolved::EmitLast).run(&paths, &output).unwrap();
    let rows: Vec<SftRecord> = read_jsonl(&output).unwrap();
    let instructions: Vec<_> = rows.iter().map(|r| r.instruction.as_str()).collect();
    assert_eq!(instructions, ["first", "third"]);
    assert_eq!(rows[1].output, "response request-3");
}

#[test]
fn test_unresolved_queries_follow_policy() {
    let ws = Workspace::new();
    let records = vec![QueryRecord::new("hard").with_questions(["q"])];
    let paths = run_through_evaluate(
        &ws,
        &records,
        2,
        |id| Some(format!("try {id}")),
        |_| Some(judgment("NO")),
    );

    let output = ws.path("sft.jsonl");
    let stats = MergeSft::new(OnUnresolved::EmitFlagged).run(&paths, &output).unwrap();
    assert_eq!(stats.unresolved, 1);

    let rows: Vec<SftRecord> = read_jsonl(&output).unwrap();
    assert_eq!(rows[0].output, "try request-2");
    assert_eq!(rows[0].constraints_satisfied, Some(false));

    let side: Vec<serde_json::Value> = read_jsonl(&unresolved_path(&output)).unwrap();
    assert_eq!(side.len(), 1);
    assert_eq!(side[0]["query"], "hard");

    let dropped = ws.path("sft_drop.jsonl");
    let stats = MergeSft::new(OnUnresolved::Drop).run(&paths, &dropped).unwrap();
    assert_eq!(stats.emitted, 0);
    assert!(read_jsonl::<SftRecord>(&dropped).unwrap().is_empty());
}

#[test]
fn test_missing_response_skips_query() {
    let ws = Workspace::new();
    let records = vec![
        QueryRecord::new("one").with_questions(["q"]),
        QueryRecord::new("two").with_questions(["q"]),
    ];
    let paths = run_through_evaluate(
        &ws,
        &records,
        2,
        |id| (id != "request-2").then(|| format!("r {id}")),
        |_| Some(judgment("YES")),
    );

    let output = ws.path("sft.jsonl");
    let stats = MergeSft::new(OnUnresolved::EmitLast).run(&paths, &output).unwrap();
    let rows: Vec<SftRecord> = read_jsonl(&output).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].instruction, "two");
    assert_eq!(stats.missing, 1);
}

#[test]
fn test_dpo_pairs_last_of_each_side() {
    let ws = Workspace::new();
    let records = vec![
        QueryRecord::new("mixed").with_questions(["q"]),
        QueryRecord::new("agreeing").with_questions(["q"]),
    ];
    // mixed: request-1..3 → YES, NO, YES; agreeing: request-4..6 → all YES
    let paths = run_through_evaluate(
        &ws,
        &records,
        3,
        |id| Some(format!("answer {id}")),
        |id| Some(judgment(if id == "request-2" { "NO" } else { "YES" })),
    );

    let output = ws.path("dpo.jsonl");
    let stats = MergeDpo.run(&paths, &output).unwrap();

    let rows: Vec<DpoRecord> = read_jsonl(&output).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].prompt, "mixed");
    assert_eq!(rows[0].chosen, "answer request-3");
    assert_eq!(rows[0].rejected, "answer request-2");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.emitted, 1);
}

#[test]
fn test_merge_appends_across_runs() {
    let ws = Workspace::new();
    let records = vec![QueryRecord::new("again").with_questions(["q"])];
    let paths = run_through_evaluate(
        &ws,
        &records,
        1,
        |_| Some("ok".into()),
        |_| Some(judgment("YES")),
    );

    let output = ws.path("sft.jsonl");
    let stage = MergeSft::new(OnUnresolved::EmitLast);
    stage.run(&paths, &output).unwrap();
    stage.run(&paths, &output).unwrap();
    assert_eq!(read_jsonl::<SftRecord>(&output).unwrap().len(), 2);
}

#[test]
fn test_merge_counts_malformed_result_lines() {
    let ws = Workspace::new();
    let records = vec![QueryRecord::new("noisy").with_questions(["q"])];
    let paths = run_through_evaluate(
        &ws,
        &records,
        1,
        |_| Some("ok".into()),
        |_| Some(judgment("YES")),
    );
    let mut evaluations = std::fs::read_to_string(&paths.evaluations).unwrap();
    evaluations.push_str("not a result line\n");
    std::fs::write(&paths.evaluations, evaluations).unwrap();

    let stats = MergeSft::new(OnUnresolved::EmitLast)
        .run(&paths, &ws.path("sft.jsonl"))
        .unwrap();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.emitted, 1);
}

/// Answers as the responder or the judge depending on the requested model.
struct CannedService;

#[async_trait]
impl CompletionService for CannedService {
    async fn complete(&self, body: &RequestBody) -> verisynth::Result<String> {
        if body.model == "judge" {
            return Ok(judgment("YES"));
        }
        let query = body.messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(format!("answer to {query}"))
    }
}

#[tokio::test]
async fn test_pool_runs_both_batches() {
    let ws = Workspace::new();
    let input = ws.path("queries.jsonl");
    let records = vec![QueryRecord::new("pooled").with_questions(["q"])];
    write_jsonl(&input, &records).unwrap();
    let pool = WorkerPool::new(Arc::new(CannedService), 2);

    let resample_requests = ws.path("resample_requests.jsonl");
    Resample::new(SamplingParams::greedy("responder"), 2, Shard::all())
        .run(&input, &resample_requests)
        .unwrap();
    let responses = ws.path("resample_results.jsonl");
    let stats = pool.run_file(&resample_requests, &responses).await.unwrap();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.emitted, 2);
    assert_eq!(stats.errors, 0);

    let eval_requests = ws.path("evaluate_requests.jsonl");
    Evaluate::new(SamplingParams::greedy("judge"))
        .run(&input, &manifest_path(&resample_requests), &responses, &eval_requests)
        .unwrap();
    let evaluations = ws.path("evaluate_results.jsonl");
    pool.run_file(&eval_requests, &evaluations).await.unwrap();

    let paths = MergePaths {
        records: input,
        manifest: manifest_path(&resample_requests),
        responses,
        evaluations,
    };
    let output = ws.path("sft.jsonl");
    MergeSft::new(OnUnresolved::EmitLast).run(&paths, &output).unwrap();

    let rows: Vec<SftRecord> = read_jsonl(&output).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].output.starts_with("answer to "));
    assert!(rows[0].output.ends_with("[Query] pooled"));
}
