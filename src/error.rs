//! Error taxonomy for the evaluation harness
//!
//! Task-level failures never propagate out of the evaluator as errors;
//! they are folded into `EvaluateResult` records. These variants exist so
//! the fold can distinguish configuration problems from chain problems
//! from judge problems.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Dataset file could not be read or a record failed validation.
    /// Fatal at load time: a partial catalogue is never used.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Lookup by task id found nothing.
    #[error("no task with id '{0}'")]
    NoSuchTask(String),

    /// Lookup by question text found nothing.
    #[error("no evaluate data found for question : '{0}'")]
    NoTaskForQuestion(String),

    /// The task has no registered observer fixture. Unlike a missing
    /// setup fixture, this is a configuration error: without an observer
    /// the judge cannot inspect balances at all.
    #[error("no observer fixture registered for task '{0}'")]
    MissingObserver(String),

    /// Transaction normalization or submission failed.
    #[error("replay error: {0}")]
    Replay(String),

    /// Chain session RPC failure (snapshot, revert, nonce, receipt, balance).
    #[error("chain session error: {0}")]
    Chain(String),

    /// Judge model call failed (HTTP error, malformed response).
    #[error("judge error: {0}")]
    Judge(String),

    /// Judge model is rate limited.
    #[error("judge rate limited")]
    JudgeRateLimited,
}
