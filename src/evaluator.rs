//! Evaluation orchestrator
//!
//! Runs one (task, candidate-answer) pair through the full state
//! machine: resolve task, open a fork snapshot, run the setup fixture,
//! drive the judge loop, and revert the snapshot exactly once no matter
//! which way the run went. Task-level failures never escape as errors;
//! callers only ever see `EvaluateResult` values.
//!
//! Batch evaluation is strictly sequential. The snapshot/revert
//! discipline is the only isolation between tasks on the shared fork,
//! and it does not survive concurrent use.

use crate::chain::ChainSession;
use crate::error::HarnessError;
use crate::fixture::{run_setup, FixtureRegistry, ResolvedFixtures, SetupContext};
use crate::judge::{JudgeModel, JudgeOutcome, JudgeSession};
use crate::replay::ReplayEngine;
use crate::scoring::{EvaluateResult, JudgeMetadata};
use crate::task::{AgentOutput, BenchmarkTask, TaskRegistry};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Orchestrates snapshot/setup/judge/revert for every task in a run.
pub struct Evaluator {
    registry: TaskRegistry,
    fixtures: FixtureRegistry,
    session: Arc<dyn ChainSession>,
    engine: ReplayEngine,
    model: Arc<dyn JudgeModel>,
    model_name: String,
    max_turns: usize,
    setup_context: SetupContext,
}

impl Evaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: TaskRegistry,
        fixtures: FixtureRegistry,
        session: Arc<dyn ChainSession>,
        engine: ReplayEngine,
        model: Arc<dyn JudgeModel>,
        model_name: String,
        max_turns: usize,
        setup_context: SetupContext,
    ) -> Self {
        Self {
            registry,
            fixtures,
            session,
            engine,
            model,
            model_name,
            max_turns,
            setup_context,
        }
    }

    pub fn task_registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Evaluate one candidate submission. Infallible by contract: every
    /// outcome, including harness malfunction, comes back as an
    /// `EvaluateResult`.
    pub async fn evaluate_single(&self, output: &AgentOutput) -> EvaluateResult {
        // Task resolution failure opens no snapshot: nothing to clean up.
        let task = match self.resolve_task(output) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "could not resolve task for submission");
                return EvaluateResult::failed(output.task_id.clone(), e.to_string());
            }
        };
        info!(task_id = %task.task_id, category = %task.category, "evaluating task");

        let snapshot_id = match self.session.snapshot().await {
            Ok(id) => id,
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "could not open fork snapshot");
                return EvaluateResult::failed(Some(task.task_id.clone()), e.to_string());
            }
        };

        // Everything fallible runs inside judged(); the snapshot opened
        // above is reverted exactly once, on every path out of it.
        let outcome = self.judged(task, output).await;
        let reverted = self.session.revert(&snapshot_id).await;

        match (outcome, reverted) {
            (Ok(judge_outcome), Ok(true)) => EvaluateResult::scored(
                task,
                &self.model_name,
                judge_outcome.verdict,
                JudgeMetadata {
                    turns: judge_outcome.turns,
                    tool_calls: judge_outcome.tool_calls,
                },
            ),
            (Ok(_), Ok(false)) => {
                // The fork kept our state; the next task would start
                // dirty. The verdict cannot be trusted as a run result.
                error!(task_id = %task.task_id, "fork rejected snapshot revert after evaluation");
                EvaluateResult::failed(
                    Some(task.task_id.clone()),
                    "snapshot revert rejected by fork; evaluation state is dirty".to_string(),
                )
            }
            (Ok(_), Err(e)) => {
                error!(task_id = %task.task_id, error = %e, "snapshot revert failed after evaluation");
                EvaluateResult::failed(Some(task.task_id.clone()), e.to_string())
            }
            (Err(e), reverted) => {
                if let Err(revert_err) = reverted {
                    // Keep the original failure as the surfaced error.
                    error!(task_id = %task.task_id, error = %revert_err, "snapshot revert also failed");
                }
                warn!(task_id = %task.task_id, error = %e, "evaluation failed");
                EvaluateResult::failed(Some(task.task_id.clone()), e.to_string())
            }
        }
    }

    /// Evaluate a batch strictly in order, one result per input. Always
    /// completes; a failed item never takes the rest of the batch down.
    pub async fn evaluate_batch(&self, outputs: &[AgentOutput]) -> Vec<EvaluateResult> {
        let mut results = Vec::with_capacity(outputs.len());
        for (index, output) in outputs.iter().enumerate() {
            info!(item = index + 1, total = outputs.len(), "evaluating batch item");
            results.push(self.evaluate_single(output).await);
        }
        results
    }

    fn resolve_task(&self, output: &AgentOutput) -> Result<&BenchmarkTask, HarnessError> {
        if let Some(task_id) = output.task_id.as_deref() {
            return self.registry.find_by_id(task_id);
        }
        match output.question.as_deref() {
            Some(question) => self.registry.find_by_question(question),
            None => Err(HarnessError::NoTaskForQuestion(
                "<submission carried neither task_id nor question>".to_string(),
            )),
        }
    }

    /// SETUP_RUN and JUDGING, between snapshot and revert.
    async fn judged(
        &self,
        task: &BenchmarkTask,
        output: &AgentOutput,
    ) -> Result<JudgeOutcome, HarnessError> {
        let ResolvedFixtures { setup, observer } = self.fixtures.resolve(&task.task_id)?;

        let mut setup_note = String::new();
        if let Some(setup) = setup {
            // Setup failure does not fail the task; judging proceeds
            // against whatever state the fork is in, and the judge is
            // told about it so a wrong starting state surfaces in the
            // verdict instead of slipping through.
            if !run_setup(setup, self.setup_context).await {
                warn!(task_id = %task.task_id, "setup fixture failed, judging proceeds anyway");
                setup_note =
                    "\nNote: the task's setup fixture failed; chain state may not match the intended starting condition.".to_string();
            }
        }

        let task_context = format!(
            "{}\nEvaluate criteria: {}{}",
            task.question, task.criteria, setup_note
        );
        let judge = JudgeSession::new(
            self.model.as_ref(),
            &self.engine,
            self.session.as_ref(),
            observer.as_ref(),
            task.bind_address.as_deref(),
            self.max_turns,
        );
        judge.run(&task_context, &output.to_question()).await
    }
}
