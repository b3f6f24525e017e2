//! Benchmark task catalogue and candidate submissions
//!
//! Tasks are loaded once from a JSON dataset file at registry
//! construction and are immutable afterwards. A malformed record rejects
//! the entire load; the harness never runs against a partial catalogue.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Fork parameters carried per task. The harness does not manage the
/// fork node itself; these are passed through to whoever does.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnvilConfig {
    /// Upstream RPC endpoint the fork was taken from
    pub fork_url: String,
    /// Block the fork is pinned at
    pub fork_block_number: String,
    /// Starting balance granted to the test signer
    pub balance: String,
    /// Local port the fork node listens on
    pub port: u16,
}

/// One unit of evaluation from the benchmark dataset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkTask {
    /// Unique opaque identifier
    pub task_id: String,
    /// Natural-language DeFi instruction given to the candidate agent
    pub question: String,
    /// Difficulty level, >= 1
    #[serde(default = "default_level")]
    pub level: u32,
    /// Free-text category tag (swap, lending, staking, ...)
    pub category: String,
    /// Grading rubric handed verbatim to the judge
    pub criteria: String,
    /// When present, transactions execute as a separate pre-funded signer
    /// instead of the default test signer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    /// Optional fork parameters for this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anvil_config: Option<AnvilConfig>,
}

fn default_level() -> u32 {
    1
}

/// Token/time accounting reported by the candidate agent, passed through
/// into result records untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time_ms: Option<u64>,
}

/// A candidate agent's submission for one task.
///
/// Exactly one of `task_id`/`question` must resolve to a known
/// `BenchmarkTask`; resolution failure produces a failed result, never a
/// silent pass-through.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Free text expected to embed a JSON list of transaction objects
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl AgentOutput {
    /// Seed text handed to the judge loop for this submission.
    pub fn to_question(&self) -> String {
        format!(
            "Agent output: {}\nNow validate the answer TXs are correct, executable and result in the right balance change",
            self.answer
        )
    }
}

/// Load a list of candidate submissions from a JSON file.
pub fn load_agent_outputs(path: &Path) -> Result<Vec<AgentOutput>, HarnessError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| HarnessError::Dataset(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| HarnessError::Dataset(format!("malformed agent output file: {}", e)))
}

/// Immutable catalogue of benchmark tasks, indexed by id.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: Vec<BenchmarkTask>,
    by_id: HashMap<String, usize>,
}

impl TaskRegistry {
    /// Load the catalogue from a JSON array file. Fails fast on the first
    /// malformed record.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Dataset(format!("cannot read {}: {}", path.display(), e)))?;
        let tasks: Vec<BenchmarkTask> = serde_json::from_str(&content)
            .map_err(|e| HarnessError::Dataset(format!("malformed dataset record: {}", e)))?;
        tracing::info!(count = tasks.len(), path = %path.display(), "loaded benchmark dataset");
        Ok(Self::from_tasks(tasks))
    }

    /// Build a registry from already-validated tasks (tests, embedders).
    pub fn from_tasks(tasks: Vec<BenchmarkTask>) -> Self {
        let by_id = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task_id.clone(), i))
            .collect();
        Self { tasks, by_id }
    }

    pub fn find_by_id(&self, task_id: &str) -> Result<&BenchmarkTask, HarnessError> {
        self.by_id
            .get(task_id)
            .map(|&i| &self.tasks[i])
            .ok_or_else(|| HarnessError::NoSuchTask(task_id.to_string()))
    }

    /// Exact question-text match. Distinct error from `find_by_id` so
    /// callers can tell "unknown id" from "no task asks this question".
    pub fn find_by_question(&self, question: &str) -> Result<&BenchmarkTask, HarnessError> {
        self.tasks
            .iter()
            .find(|t| t.question == question)
            .ok_or_else(|| HarnessError::NoTaskForQuestion(question.to_string()))
    }

    pub fn tasks(&self) -> &[BenchmarkTask] {
        &self.tasks
    }

    pub fn count(&self) -> usize {
        self.tasks.len()
    }
}
