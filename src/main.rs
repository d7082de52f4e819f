//! verisynth CLI - Constraint-verified SFT/DPO dataset synthesis.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;
use verisynth::pipeline::{
    AugmentMerge, AugmentRequests, ComposerData, Evaluate, ExtractRequests, MergeDpo, MergePaths,
    MergeSft, QuestionRequests, Resample, unresolved_path,
};
use verisynth::{Config, LLMClient, StageStats, WorkerPool, manifest_path};

#[derive(Parser)]
#[command(name = "verisynth")]
#[command(author = "Infernet <dev@infernet.org>")]
#[command(version)]
#[command(about = "Constraint-verified SFT/DPO dataset synthesis via best-of-k rejection sampling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, global = true, default_value = "verisynth.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Process only this fixed-size shard of the input records
    #[arg(long, global = true)]
    index: Option<usize>,

    /// Suffix `_<N>` added to derived artifact names
    #[arg(long, global = true)]
    split: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build constraint-extraction requests from query records
    ExtractRequests {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse extraction results and build question-generation requests
    QuestionRequests {
        /// Query records the extraction requests were built from
        #[arg(short, long)]
        input: PathBuf,

        /// Extraction request file (its manifest sits beside it)
        #[arg(long)]
        requests: PathBuf,

        /// Extraction result file
        #[arg(long)]
        results: PathBuf,

        /// Parsed-constraints artifact to write
        #[arg(long)]
        constraints: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build query-composer training records from generated questions
    ComposerData {
        /// Parsed-constraints artifact from `question-requests`
        #[arg(long)]
        constraints: PathBuf,

        /// Question request file (its manifest sits beside it)
        #[arg(long)]
        requests: PathBuf,

        /// Question result file
        #[arg(long)]
        results: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build composer requests that add one constraint per query
    AugmentRequests {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply composer results to query records
    AugmentMerge {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        requests: PathBuf,

        #[arg(long)]
        results: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build k resampling requests per query record
    Resample {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build one judge request per sampled response
    Evaluate {
        #[arg(short, long)]
        input: PathBuf,

        /// Resample request file (its manifest sits beside it)
        #[arg(long)]
        requests: PathBuf,

        /// Resample result file
        #[arg(long)]
        results: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Select one response per query into SFT records (appends)
    MergeSft {
        #[command(flatten)]
        merge: MergeArgs,
    },

    /// Pair satisfying and violating responses into DPO records (appends)
    MergeDpo {
        #[command(flatten)]
        merge: MergeArgs,
    },

    /// Execute a request file against the configured endpoint
    RunBatch {
        #[arg(long)]
        requests: PathBuf,

        /// Result file (default: `<requests>.results.jsonl`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration file
    ValidateConfig,

    /// Show example configuration
    ExampleConfig,
}

#[derive(clap::Args)]
struct MergeArgs {
    /// Query records the resample requests were built from
    #[arg(short, long)]
    input: PathBuf,

    /// Resample request file (its manifest sits beside it)
    #[arg(long)]
    requests: PathBuf,

    /// Resample result file
    #[arg(long)]
    responses: PathBuf,

    /// Evaluation result file
    #[arg(long)]
    evaluations: PathBuf,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl MergeArgs {
    fn paths(&self) -> MergePaths {
        MergePaths {
            records: self.input.clone(),
            manifest: manifest_path(&self.requests),
            responses: self.responses.clone(),
            evaluations: self.evaluations.clone(),
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

/// `stem.jsonl`, or `stem_<split>.jsonl` when a split is given.
fn artifact(stem: &str, split: Option<usize>) -> PathBuf {
    match split {
        Some(n) => PathBuf::from(format!("{stem}_{n}.jsonl")),
        None => PathBuf::from(format!("{stem}.jsonl")),
    }
}

fn print_stats(title: &str, stats: &StageStats, artifacts: &[&Path]) {
    println!("\n=== {title} Complete ===");
    println!("Total:       {}", stats.total);
    println!("Skipped:     {}", stats.skipped);
    println!("Errors:      {}", stats.errors);
    if stats.missing > 0 {
        println!("  missing:   {}", stats.missing);
    }
    println!("Unresolved:  {}", stats.unresolved);
    println!("Emitted:     {}", stats.emitted);
    println!("Requests:    {}", stats.requests);
    if stats.malformed > 0 {
        println!("Malformed:   {}", stats.malformed);
    }
    println!("Runtime:     {:.1}s", stats.runtime_secs);
    for path in artifacts {
        println!("Wrote:       {}", path.display());
    }
}

fn print_example_config() {
    let example = r#"# verisynth configuration file

[endpoint]
# OpenAI-compatible endpoint used by `run-batch`
base_url = "http://localhost:8000/v1"
# api_key = "${VERISYNTH_API_KEY}"
api_key_env = "VERISYNTH_API_KEY"
timeout_secs = 600
max_retries = 3
concurrency = 64

[selection]
replicas = 5                 # k responses sampled per query
on_unresolved = "emit_last"  # emit_last | drop | emit_flagged

[shard]
size = 10000                 # records per --index shard

[sampling.resample]
model = "meta-llama/Llama-3.1-8B-Instruct"
max_tokens = 4096
temperature = 1.0
top_p = 0.95
stop = ["<|eot_id|>", "<|end_of_text|>"]

[sampling.evaluate]
model = "meta-llama/Llama-3.1-8B-Instruct"
temperature = 0.0
top_p = 1.0

[sampling.extract]
model = "meta-llama/Meta-Llama-3.1-70B-Instruct"
temperature = 0.0

[sampling.questions]
model = "meta-llama/Meta-Llama-3.1-70B-Instruct"
temperature = 0.0

[sampling.augment]
model = "ultracomposer"
temperature = 0.7
stop = ["<|eot_id|>"]
"#;
    println!("{example}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let split = cli.split;
    let index = cli.index;

    if let Commands::ExampleConfig = cli.command {
        print_example_config();
        return Ok(());
    }

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    match cli.command {
        Commands::ExampleConfig => {}

        Commands::ValidateConfig => {
            config
                .validate()
                .with_context(|| format!("Invalid config {:?}", cli.config))?;
            info!("Configuration is valid");
            info!("  Endpoint: {}", config.endpoint.base_url);
            info!(
                "  API key: {}",
                if config.resolve_api_key().is_some() { "set" } else { "none" }
            );
            info!(
                "  Replicas: {} ({:?} when unresolved)",
                config.selection.replicas, config.selection.on_unresolved
            );
            info!("  Shard size: {}", config.shard.size);
        }

        Commands::ExtractRequests { input, output } => {
            let output = output.unwrap_or_else(|| artifact("extract_requests", split));
            let stats = ExtractRequests::from_config(&config, index).run(&input, &output)?;
            print_stats("Extraction Requests", &stats, &[&output, &manifest_path(&output)]);
        }

        Commands::QuestionRequests {
            input,
            requests,
            results,
            constraints,
            output,
        } => {
            let constraints = constraints.unwrap_or_else(|| artifact("constraints", split));
            let output = output.unwrap_or_else(|| artifact("question_requests", split));
            let stats = QuestionRequests::from_config(&config).run(
                &input,
                &manifest_path(&requests),
                &results,
                &constraints,
                &output,
            )?;
            print_stats(
                "Question Requests",
                &stats,
                &[&constraints, &output, &manifest_path(&output)],
            );
        }

        Commands::ComposerData {
            constraints,
            requests,
            results,
            output,
        } => {
            let output = output.unwrap_or_else(|| artifact("composer_data", split));
            let stats =
                ComposerData.run(&constraints, &manifest_path(&requests), &results, &output)?;
            print_stats("Composer Data", &stats, &[&output]);
        }

        Commands::AugmentRequests { input, output } => {
            let output = output.unwrap_or_else(|| artifact("augment_requests", split));
            let stats = AugmentRequests::from_config(&config, index).run(&input, &output)?;
            print_stats("Augment Requests", &stats, &[&output, &manifest_path(&output)]);
        }

        Commands::AugmentMerge {
            input,
            requests,
            results,
            output,
        } => {
            let output = output.unwrap_or_else(|| artifact("augmented_queries", split));
            let stats = AugmentMerge.run(&input, &manifest_path(&requests), &results, &output)?;
            print_stats("Augment Merge", &stats, &[&output]);
        }

        Commands::Resample { input, output } => {
            let output = output.unwrap_or_else(|| artifact("resample_requests", split));
            let stats = Resample::from_config(&config, index).run(&input, &output)?;
            print_stats("Resample", &stats, &[&output, &manifest_path(&output)]);
        }

        Commands::Evaluate {
            input,
            requests,
            results,
            output,
        } => {
            let output = output.unwrap_or_else(|| artifact("evaluate_requests", split));
            let stats = Evaluate::from_config(&config).run(
                &input,
                &manifest_path(&requests),
                &results,
                &output,
            )?;
            print_stats("Evaluate", &stats, &[&output, &manifest_path(&output)]);
        }

        Commands::MergeSft { merge } => {
            let output = merge.output.clone().unwrap_or_else(|| artifact("sft", split));
            let stats = MergeSft::from_config(&config).run(&merge.paths(), &output)?;
            print_stats("SFT Merge", &stats, &[&output, &unresolved_path(&output)]);
        }

        Commands::MergeDpo { merge } => {
            let output = merge.output.clone().unwrap_or_else(|| artifact("dpo", split));
            let stats = MergeDpo.run(&merge.paths(), &output)?;
            print_stats("DPO Merge", &stats, &[&output]);
        }

        Commands::RunBatch { requests, output } => {
            let output = output.unwrap_or_else(|| requests.with_extension("results.jsonl"));
            let client = LLMClient::from_config(&config.endpoint, config.resolve_api_key())
                .context("Failed to create completion client")?;
            info!(endpoint = %client.base_url(), "Using completion endpoint");

            let client = Arc::new(client);
            let pool = WorkerPool::new(client.clone(), config.endpoint.concurrency);
            let stats = pool.run_file(&requests, &output).await?;
            print_stats("Batch Run", &stats, &[&output]);

            let (prompt_tokens, completion_tokens) = client.total_tokens();
            println!("Tokens:      {prompt_tokens} prompt, {completion_tokens} completion");
        }
    }

    Ok(())
}
