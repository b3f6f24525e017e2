//! chainbench CLI
//!
//! Thin shell over the library: loads the dataset and the candidate
//! outputs, wires one chain session through the evaluator, and writes
//! result records. Dataset load failure and an unreachable fork are the
//! only conditions that abort the process; per-task failures come back
//! as `failed` result records.

use anyhow::{Context, Result};
use chainbench::fixture::NativeBalanceObserver;
use chainbench::scoring::{write_csv, write_json};
use chainbench::task::load_agent_outputs;
use chainbench::{
    Evaluator, FixtureRegistry, HarnessConfig, HttpChainSession, OpenAiJudge, ReplayEngine,
    SetupContext, TaskRegistry,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chainbench", version, about = "Forked-chain benchmark harness for DeFi transaction agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate candidate agent outputs against the benchmark dataset
    Evaluate {
        /// Benchmark dataset (JSON array of tasks)
        #[arg(long)]
        dataset: PathBuf,
        /// Candidate agent outputs (JSON array)
        #[arg(long)]
        outputs: PathBuf,
        /// Harness config file (JSON); defaults + env when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where to write the JSON result records
        #[arg(long, default_value = "results.json")]
        out: PathBuf,
        /// Optionally also write a CSV summary
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// List the tasks in a benchmark dataset
    Tasks {
        #[arg(long)]
        dataset: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Evaluate {
            dataset,
            outputs,
            config,
            out,
            csv,
        } => evaluate(dataset, outputs, config, out, csv).await,
        Command::Tasks { dataset } => {
            let registry = TaskRegistry::load(&dataset)?;
            for task in registry.tasks() {
                println!(
                    "{}  level={} category={} question={}",
                    task.task_id, task.level, task.category, task.question
                );
            }
            Ok(())
        }
    }
}

async fn evaluate(
    dataset: PathBuf,
    outputs: PathBuf,
    config: Option<PathBuf>,
    out: PathBuf,
    csv: Option<PathBuf>,
) -> Result<()> {
    let config = match config {
        Some(path) => HarnessConfig::load(&path)?,
        None => HarnessConfig::from_env(),
    };

    let registry = TaskRegistry::load(&dataset).context("loading benchmark dataset")?;
    let submissions = load_agent_outputs(&outputs).context("loading agent outputs")?;

    let session: Arc<HttpChainSession> = Arc::new(
        HttpChainSession::connect(&config.rpc_url).context("connecting to fork node")?,
    );
    let engine = ReplayEngine::from_keys(&config.private_key, config.bind_private_key.as_deref())
        .context("building replay engine")?;
    let default_signer = engine.default_signer();

    // The CLI has no channel for per-task fixture programs; every task
    // gets the native-balance observer. Embedders with protocol-aware
    // observers use the library directly.
    let mut fixtures = FixtureRegistry::new();
    for task in registry.tasks() {
        let session = session.clone();
        fixtures.register_observer(&task.task_id, move || {
            Arc::new(NativeBalanceObserver::new(default_signer, session.clone()))
        });
    }

    let model = Arc::new(OpenAiJudge::new(&config.judge));
    let model_name = config.judge.model.clone();
    let max_turns = config.judge.max_turns;
    let evaluator = Evaluator::new(
        registry,
        fixtures,
        session,
        engine,
        model,
        model_name,
        max_turns,
        SetupContext::Inline,
    );

    let results = evaluator.evaluate_batch(&submissions).await;

    let passed = results
        .iter()
        .filter(|r| r.answer_score() == Some(chainbench::scoring::PASS_SCORE))
        .count();
    let failed = results.iter().filter(|r| !r.is_success()).count();
    println!(
        "{} evaluated: {} passed, {} scored zero, {} harness failures",
        results.len(),
        passed,
        results.len() - passed - failed,
        failed
    );

    write_json(&out, &results)?;
    println!("wrote {}", out.display());
    if let Some(csv_path) = csv {
        write_csv(&csv_path, &results)?;
        println!("wrote {}", csv_path.display());
    }
    Ok(())
}
