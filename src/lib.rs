//! Chainbench: a forked-chain benchmark harness for DeFi agents
//!
//! Evaluates AI agents that must produce executable blockchain
//! transactions (swaps, lending, staking, liquidity) against a local
//! mainnet fork. A candidate agent answers a natural-language task with
//! a list of transaction objects; the harness replays them on the fork
//! and asks a judge model to decide PASS/FAIL from the balance deltas.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌───────────────────┐
//! │ TaskRegistry │──▶│ FixtureRegistry │──▶│     Evaluator     │
//! │ (dataset)    │   │ (setup/observer)│   │  snapshot ─ setup │
//! └──────────────┘   └─────────────────┘   │  ─ judge ─ revert │
//!                                          └─────────┬─────────┘
//!                    ┌──────────────┐                │
//!                    │ ReplayEngine │◀── tool calls ─┤
//!                    │ (sign+submit)│                │
//!                    └──────┬───────┘      ┌─────────▼─────────┐
//!                           │              │    JudgeModel     │
//!                    ┌──────▼───────┐      │ (LLM, black box)  │
//!                    │ ChainSession │      └───────────────────┘
//!                    │ (anvil fork) │
//!                    └──────────────┘
//! ```
//!
//! One task at a time, one fork snapshot per task, reverted exactly once
//! per evaluation. That revert discipline is the only isolation between
//! tasks and the single most important invariant in this crate.

pub mod chain;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod fixture;
pub mod judge;
pub mod replay;
pub mod scoring;
pub mod task;

pub use chain::{ChainSession, HttpChainSession};
pub use config::{HarnessConfig, JudgeConfig};
pub use error::HarnessError;
pub use evaluator::Evaluator;
pub use fixture::{FixtureRegistry, ObserverFixture, SetupContext, SetupFixture};
pub use judge::{JudgeModel, JudgeStep, OpenAiJudge};
pub use replay::{BatchReport, ReplayEngine, TxDescriptor};
pub use scoring::{EvaluateOutcome, EvaluateResult};
pub use task::{AgentOutput, BenchmarkTask, TaskRegistry};
