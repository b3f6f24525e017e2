//! Per-task fixture resolution and setup execution
//!
//! Each task may ship two fixture programs: a *setup* that mutates the
//! fork into the task's starting condition, and an *observer* that reads
//! balances/positions back as text for the judge. Fixtures are supplied
//! by the embedding program through a registry of factory closures; the
//! harness never loads code by path convention.
//!
//! A missing setup is normal (many tasks need no preconditions). A
//! missing observer is a configuration error: without it the judge is
//! blind.

use crate::chain::ChainSession;
use crate::error::HarnessError;
use async_trait::async_trait;
use ethers::core::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Task-specific program that mutates chain state into the task's
/// starting condition. Success is "it didn't error"; there is no return
/// value contract.
#[async_trait]
pub trait SetupFixture: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Task-specific program that reports current balances/positions as
/// human-readable text. The observer owns its own signer identity and
/// chain access; the harness only ever asks for the report.
#[async_trait]
pub trait ObserverFixture: Send + Sync {
    /// Human-readable balance/position report.
    async fn report(&self) -> anyhow::Result<String>;
}

pub type SetupBuilder = Arc<dyn Fn() -> Arc<dyn SetupFixture> + Send + Sync>;
pub type ObserverBuilder = Arc<dyn Fn() -> Arc<dyn ObserverFixture> + Send + Sync>;

/// Fixtures resolved for one task.
pub struct ResolvedFixtures {
    pub setup: Option<Arc<dyn SetupFixture>>,
    pub observer: Arc<dyn ObserverFixture>,
}

/// Mapping from task id to fixture factories, populated by the embedding
/// program before evaluation starts.
#[derive(Default)]
pub struct FixtureRegistry {
    setups: HashMap<String, SetupBuilder>,
    observers: HashMap<String, ObserverBuilder>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_setup<F>(&mut self, task_id: &str, builder: F)
    where
        F: Fn() -> Arc<dyn SetupFixture> + Send + Sync + 'static,
    {
        self.setups.insert(task_id.to_string(), Arc::new(builder));
    }

    pub fn register_observer<F>(&mut self, task_id: &str, builder: F)
    where
        F: Fn() -> Arc<dyn ObserverFixture> + Send + Sync + 'static,
    {
        self.observers.insert(task_id.to_string(), Arc::new(builder));
    }

    /// Resolve both fixtures for a task. Missing observer is an error;
    /// missing setup is recorded and tolerated.
    pub fn resolve(&self, task_id: &str) -> Result<ResolvedFixtures, HarnessError> {
        let observer = self
            .observers
            .get(task_id)
            .ok_or_else(|| HarnessError::MissingObserver(task_id.to_string()))?;
        let setup = self.setups.get(task_id);
        if setup.is_none() {
            info!(task_id, "task has no setup fixture, starting from bare fork state");
        }
        Ok(ResolvedFixtures {
            setup: setup.map(|b| b()),
            observer: observer(),
        })
    }
}

/// Observer that reports the signer's native ETH balance.
///
/// The CLI registers this for tasks whose embedder supplied no richer
/// observer; protocol-aware observers (WETH, aToken, stETH positions)
/// come from per-task fixture programs.
pub struct NativeBalanceObserver {
    signer: Address,
    session: Arc<dyn ChainSession>,
}

impl NativeBalanceObserver {
    pub fn new(signer: Address, session: Arc<dyn ChainSession>) -> Self {
        Self { signer, session }
    }
}

#[async_trait]
impl ObserverFixture for NativeBalanceObserver {
    async fn report(&self) -> anyhow::Result<String> {
        let balance = self.session.balance(self.signer).await?;
        Ok(format!("account {:?}\nETH balance (wei): {}", self.signer, balance))
    }
}

/// Where a setup fixture's entry point runs relative to the caller.
///
/// Callers state their concurrency context up front instead of the
/// harness introspecting for an active runtime: `Inline` awaits the
/// setup on the current task, `Worker` hands it to a dedicated thread
/// with its own single-threaded runtime so the setup's blocking calls
/// cannot deadlock against the caller's executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SetupContext {
    #[default]
    Inline,
    Worker,
}

/// Execute a setup fixture, converting any error into a logged `false`.
///
/// A failed setup must produce a failed-looking evaluation, not crash
/// the batch, so nothing propagates from here.
pub async fn run_setup(fixture: Arc<dyn SetupFixture>, context: SetupContext) -> bool {
    let result = match context {
        SetupContext::Inline => fixture.run().await,
        SetupContext::Worker => {
            let handle = tokio::task::spawn_blocking(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(fixture.run())
            });
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(anyhow::anyhow!("setup worker panicked: {}", join_err)),
            }
        }
    };
    match result {
        Ok(()) => {
            debug!("setup fixture completed");
            true
        }
        Err(e) => {
            error!(error = ?e, "setup fixture failed");
            false
        }
    }
}
