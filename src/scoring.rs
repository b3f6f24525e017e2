//! Verdict scoring and result records
//!
//! Scoring is deliberately trivial: the judge's terminal text containing
//! "PASS" (any casing) is full credit, anything else is zero. All the
//! nondeterminism lives upstream in the judge loop; this stays pure.
//!
//! `EvaluateResult` is a sum type: a success variant always carries a
//! score and a failure variant always carries an error, so the invalid
//! combinations cannot be constructed at all.

use crate::error::HarnessError;
use crate::task::BenchmarkTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full credit awarded for a PASS verdict.
pub const PASS_SCORE: f64 = 10.0;

/// Binary verdict scoring: PASS substring, case-insensitive.
pub fn score_verdict(verdict: &str) -> f64 {
    if verdict.to_uppercase().contains("PASS") {
        PASS_SCORE
    } else {
        0.0
    }
}

/// Score block of a successful evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluateScore {
    pub answer_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluate_detail: Option<String>,
    pub model_name: String,
    pub level: u32,
    pub category: String,
}

/// Transcript statistics from the judge loop.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JudgeMetadata {
    pub turns: usize,
    pub tool_calls: usize,
}

/// Outcome of one evaluation. `success` means the harness ran the task
/// to a verdict (even a zero-score one); `failed` is reserved for
/// harness malfunction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EvaluateOutcome {
    Success {
        score: EvaluateScore,
        /// Raw verdict text from the judge
        result: String,
        metadata: JudgeMetadata,
    },
    Failed {
        error: String,
    },
}

/// One result record, serialized as
/// `{task_id, status, score?, result?, metadata?, error?}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluateResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub outcome: EvaluateOutcome,
    #[serde(default = "Utc::now")]
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluateResult {
    /// Build a success record from a judge verdict. A missing verdict
    /// (turn cap exhausted) scores zero but is still a success: the
    /// harness worked, the candidate did not.
    pub fn scored(
        task: &BenchmarkTask,
        model_name: &str,
        verdict: Option<String>,
        metadata: JudgeMetadata,
    ) -> Self {
        let result = verdict
            .unwrap_or_else(|| "no final answer within the judge turn limit".to_string());
        let answer_score = score_verdict(&result);
        Self {
            task_id: Some(task.task_id.clone()),
            outcome: EvaluateOutcome::Success {
                score: EvaluateScore {
                    answer_score,
                    evaluate_detail: Some(result.clone()),
                    model_name: model_name.to_string(),
                    level: task.level,
                    category: task.category.clone(),
                },
                result,
                metadata,
            },
            evaluated_at: Utc::now(),
        }
    }

    pub fn failed(task_id: Option<String>, error: String) -> Self {
        Self {
            task_id,
            outcome: EvaluateOutcome::Failed { error },
            evaluated_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, EvaluateOutcome::Success { .. })
    }

    pub fn answer_score(&self) -> Option<f64> {
        match &self.outcome {
            EvaluateOutcome::Success { score, .. } => Some(score.answer_score),
            EvaluateOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            EvaluateOutcome::Success { .. } => None,
            EvaluateOutcome::Failed { error } => Some(error),
        }
    }
}

/// Flat row shape for the CSV report.
#[derive(Serialize)]
struct CsvRow<'a> {
    task_id: &'a str,
    status: &'a str,
    answer_score: Option<f64>,
    error: Option<&'a str>,
}

/// Write results as a JSON array.
pub fn write_json(path: &Path, results: &[EvaluateResult]) -> Result<(), HarnessError> {
    let content = serde_json::to_string_pretty(results)
        .map_err(|e| HarnessError::Dataset(format!("result serialization failed: {}", e)))?;
    std::fs::write(path, content)
        .map_err(|e| HarnessError::Dataset(format!("cannot write {}: {}", path.display(), e)))
}

/// Write results as CSV (task_id, status, answer_score, error).
pub fn write_csv(path: &Path, results: &[EvaluateResult]) -> Result<(), HarnessError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| HarnessError::Dataset(format!("cannot write {}: {}", path.display(), e)))?;
    for result in results {
        let row = CsvRow {
            task_id: result.task_id.as_deref().unwrap_or(""),
            status: if result.is_success() { "success" } else { "failed" },
            answer_score: result.answer_score(),
            error: result.error(),
        };
        writer
            .serialize(row)
            .map_err(|e| HarnessError::Dataset(format!("csv write failed: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| HarnessError::Dataset(format!("csv flush failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> BenchmarkTask {
        serde_json::from_str(
            r#"{"task_id": "t1", "question": "wrap 1 ETH", "level": 2,
                "category": "swap", "criteria": "WETH +1"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_scoring_determinism_across_casings() {
        assert_eq!(score_verdict("... FINAL ANSWER: PASS"), 10.0);
        assert_eq!(score_verdict("final answer: pass"), 10.0);
        assert_eq!(score_verdict("Final Answer: Pass"), 10.0);
        assert_eq!(score_verdict("FINAL ANSWER: FAIL"), 0.0);
        assert_eq!(score_verdict("no verdict line"), 0.0);
        assert_eq!(score_verdict(""), 0.0);
    }

    #[test]
    fn test_scored_result_carries_task_metadata() {
        let result = EvaluateResult::scored(
            &task(),
            "gpt-4.1",
            Some("FINAL ANSWER: PASS".into()),
            JudgeMetadata { turns: 4, tool_calls: 3 },
        );
        assert!(result.is_success());
        assert_eq!(result.answer_score(), Some(10.0));
        match &result.outcome {
            EvaluateOutcome::Success { score, .. } => {
                assert_eq!(score.level, 2);
                assert_eq!(score.category, "swap");
                assert_eq!(score.model_name, "gpt-4.1");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_turn_cap_scores_zero_but_is_success() {
        let result = EvaluateResult::scored(&task(), "gpt-4.1", None, JudgeMetadata::default());
        assert!(result.is_success());
        assert_eq!(result.answer_score(), Some(0.0));
    }

    #[test]
    fn test_wire_shape_is_tagged_union() {
        let success = EvaluateResult::scored(
            &task(),
            "gpt-4.1",
            Some("FINAL ANSWER: PASS".into()),
            JudgeMetadata::default(),
        );
        let value = serde_json::to_value(&success).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["score"]["answer_score"], 10.0);
        assert!(value.get("error").is_none());

        let failed = EvaluateResult::failed(Some("t1".into()), "fork unavailable".into());
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "fork unavailable");
        assert!(value.get("score").is_none());
    }

    #[test]
    fn test_invalid_combinations_fail_deserialization() {
        // success without a score block
        let err = serde_json::from_str::<EvaluateResult>(
            r#"{"task_id": "t1", "status": "success", "result": "PASS"}"#,
        );
        assert!(err.is_err());
        // failed without an error
        let err = serde_json::from_str::<EvaluateResult>(r#"{"task_id": "t1", "status": "failed"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_csv_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let results = vec![
            EvaluateResult::scored(
                &task(),
                "gpt-4.1",
                Some("FINAL ANSWER: PASS".into()),
                JudgeMetadata::default(),
            ),
            EvaluateResult::failed(Some("t2".into()), "no observer".into()),
        ];
        write_csv(&path, &results).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("t1,success,10.0,"));
        assert!(content.contains("t2,failed,,no observer"));
    }
}
