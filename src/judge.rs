//! Judge loop: tool-using PASS/FAIL verdict over a candidate answer
//!
//! The reasoning model is a black box behind `JudgeModel`: given the
//! transcript so far it either asks for a tool call or emits a final
//! text. `JudgeSession` drives the loop, binding exactly two tools,
//! `validate_tx_execution` (replay engine) and `get_balances` (observer
//! fixture), and enforcing a hard turn cap. Exceeding the cap is a
//! no-verdict outcome, not an error: the harness worked, the judge just
//! never concluded.

use crate::chain::ChainSession;
use crate::error::HarnessError;
use crate::fixture::ObserverFixture;
use crate::replay::{extract_tx_list, ReplayEngine, TxDescriptor};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

/// Instruction template seeding every judge session. `{question}` is the
/// task's natural-language instruction plus its grading criteria.
const INSTRUCTIONS_PROMPT: &str = r#"You are a validator for a transaction execution. You will be given a list of transactions and you need to validate if they are executed successfully.

## How to validate
1. Check current balances by using the `get_balances` tool
2. Extract the transaction list from the agent output
3. Validate the transaction json by using the `validate_tx_execution` tool to execute the transaction
4. According to the task and evaluate criteria, identify whether the transactions generated are all correct.
5. Check current balances by using the `get_balances` tool to check the current balance state satisfies the criteria.

If the agent output contains no transactions at all, answer "FINAL ANSWER: FAIL" immediately.

Your final answer should be "FINAL ANSWER: PASS" or "FINAL ANSWER: FAIL"

Task: {question}
"#;

/// One entry in the judge transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum JudgeMessage {
    System(String),
    User(String),
    /// Model turn: either commentary, a tool request, or both.
    Assistant {
        content: Option<String>,
        tool_call: Option<ToolCall>,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
}

/// A tool request produced by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// What the model produced for one turn.
#[derive(Clone, Debug)]
pub enum JudgeStep {
    ToolCall(ToolCall),
    Final(String),
}

/// Black-box reasoning capability: transcript in, next step out.
#[async_trait]
pub trait JudgeModel: Send + Sync {
    async fn next_step(&self, transcript: &[JudgeMessage]) -> Result<JudgeStep, HarnessError>;
}

/// Outcome of one judge session.
#[derive(Clone, Debug, Default)]
pub struct JudgeOutcome {
    /// Final verdict text; `None` when the turn cap was exhausted
    /// without one.
    pub verdict: Option<String>,
    pub turns: usize,
    pub tool_calls: usize,
}

/// Drives one judging session for one (task, answer) pair.
pub struct JudgeSession<'a> {
    model: &'a dyn JudgeModel,
    engine: &'a ReplayEngine,
    session: &'a dyn ChainSession,
    observer: &'a dyn ObserverFixture,
    bind_address: Option<&'a str>,
    max_turns: usize,
}

impl<'a> JudgeSession<'a> {
    pub fn new(
        model: &'a dyn JudgeModel,
        engine: &'a ReplayEngine,
        session: &'a dyn ChainSession,
        observer: &'a dyn ObserverFixture,
        bind_address: Option<&'a str>,
        max_turns: usize,
    ) -> Self {
        Self {
            model,
            engine,
            session,
            observer,
            bind_address,
            max_turns,
        }
    }

    /// Run the loop to a verdict or the turn cap.
    ///
    /// `task_context` is the task question + criteria; `submission` is
    /// the candidate's answer wrapped by `AgentOutput::to_question`.
    pub async fn run(
        &self,
        task_context: &str,
        submission: &str,
    ) -> Result<JudgeOutcome, HarnessError> {
        let mut transcript = vec![
            JudgeMessage::System(INSTRUCTIONS_PROMPT.replace("{question}", task_context)),
            JudgeMessage::User(submission.to_string()),
        ];
        let mut tool_calls = 0usize;

        for turn in 1..=self.max_turns {
            match self.model.next_step(&transcript).await? {
                JudgeStep::Final(verdict) => {
                    info!(turn, tool_calls, "judge reached a verdict");
                    return Ok(JudgeOutcome {
                        verdict: Some(verdict),
                        turns: turn,
                        tool_calls,
                    });
                }
                JudgeStep::ToolCall(call) => {
                    tool_calls += 1;
                    debug!(turn, tool = %call.name, "judge requested tool call");
                    let output = self.dispatch(&call).await;
                    transcript.push(JudgeMessage::Assistant {
                        content: None,
                        tool_call: Some(call.clone()),
                    });
                    transcript.push(JudgeMessage::ToolResult {
                        call_id: call.id,
                        content: output,
                    });
                }
            }
        }

        warn!(
            max_turns = self.max_turns,
            "judge exhausted turn cap without a final answer"
        );
        Ok(JudgeOutcome {
            verdict: None,
            turns: self.max_turns,
            tool_calls,
        })
    }

    /// Execute one tool call. Tool failures become result strings the
    /// model can reason about, never errors.
    async fn dispatch(&self, call: &ToolCall) -> String {
        match call.name.as_str() {
            "validate_tx_execution" => self.run_tx_tool(&call.arguments).await,
            "get_balances" => match self.observer.report().await {
                Ok(report) => report,
                Err(e) => format!("get_balances failed: {}", e),
            },
            other => format!("unknown tool '{}'", other),
        }
    }

    async fn run_tx_tool(&self, arguments: &serde_json::Value) -> String {
        let txs: Vec<TxDescriptor> = match arguments.get("tx_list") {
            Some(list) => match serde_json::from_value(list.clone()) {
                Ok(txs) => txs,
                Err(e) => return format!("invalid tx_list argument: {}", e),
            },
            // Some models pass the raw answer text instead of the
            // extracted array; extract it for them.
            None => match arguments
                .get("answer")
                .and_then(|v| v.as_str())
                .map(extract_tx_list)
            {
                Some(Ok(txs)) => txs,
                Some(Err(e)) => return e.to_string(),
                None => return "missing tx_list argument".to_string(),
            },
        };
        if txs.is_empty() {
            return "No transaction provided".to_string();
        }
        let report = self
            .engine
            .submit_batch(&txs, self.session, self.bind_address)
            .await;
        if report.succeeded {
            format!(
                "Transaction executed successfully, total gas used: {}",
                report.total_gas_used
            )
        } else {
            format!(
                "Transaction execution failed: {}",
                report.failure.unwrap_or_else(|| "unknown failure".to_string())
            )
        }
    }
}

/// JSON schemas for the two judge tools, OpenAI function-calling format.
fn tool_schemas() -> serde_json::Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": "validate_tx_execution",
                "description": "Validate the transactions by executing them against the fork",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "tx_list": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "to": {"type": "string", "description": "The address of the contract to interact with"},
                                    "value": {"type": "integer", "description": "The value of the transaction in wei"},
                                    "data": {"type": "string", "description": "The data of the transaction, hex encoded"}
                                },
                                "required": ["to", "value", "data"]
                            },
                            "description": "The list of transactions to validate"
                        }
                    },
                    "required": ["tx_list"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "get_balances",
                "description": "Get the current balances of the account",
                "parameters": {"type": "object", "properties": {}}
            }
        }
    ])
}

/// `JudgeModel` over an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiJudge {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout_secs: u64,
}

impl OpenAiJudge {
    pub fn new(config: &crate::config::JudgeConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        }
    }

    fn wire_messages(transcript: &[JudgeMessage]) -> Vec<serde_json::Value> {
        transcript
            .iter()
            .map(|message| match message {
                JudgeMessage::System(content) => json!({"role": "system", "content": content}),
                JudgeMessage::User(content) => json!({"role": "user", "content": content}),
                JudgeMessage::Assistant { content, tool_call } => {
                    let mut value = json!({"role": "assistant", "content": content});
                    if let Some(call) = tool_call {
                        value["tool_calls"] = json!([{
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string()
                            }
                        }]);
                    }
                    value
                }
                JudgeMessage::ToolResult { call_id, content } => {
                    json!({"role": "tool", "tool_call_id": call_id, "content": content})
                }
            })
            .collect()
    }
}

#[async_trait]
impl JudgeModel for OpenAiJudge {
    async fn next_step(&self, transcript: &[JudgeMessage]) -> Result<JudgeStep, HarnessError> {
        let request_body = json!({
            "model": self.model,
            "messages": Self::wire_messages(transcript),
            "tools": tool_schemas(),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| HarnessError::Judge(format!("request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(HarnessError::JudgeRateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::Judge(format!("HTTP {}: {}", status, body)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HarnessError::Judge(format!("invalid response body: {}", e)))?;
        let message = &body["choices"][0]["message"];

        if let Some(calls) = message["tool_calls"].as_array() {
            if let Some(call) = calls.first() {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call["function"]["name"].as_str().unwrap_or_default().to_string();
                let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments = serde_json::from_str(raw_args)
                    .map_err(|e| HarnessError::Judge(format!("malformed tool arguments: {}", e)))?;
                return Ok(JudgeStep::ToolCall(ToolCall { id, name, arguments }));
            }
        }

        match message["content"].as_str() {
            Some(content) => Ok(JudgeStep::Final(content.to_string())),
            None => Err(HarnessError::Judge(
                "response carried neither content nor tool calls".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainSession;
    use crate::replay::ReplayEngine;
    use ethers::core::types::{Address, Bytes, TransactionReceipt, U256};
    use parking_lot::Mutex;

    /// Model that replays a fixed script of steps.
    struct ScriptedModel {
        steps: Mutex<Vec<JudgeStep>>,
    }

    impl ScriptedModel {
        fn new(mut steps: Vec<JudgeStep>) -> Self {
            steps.reverse();
            Self {
                steps: Mutex::new(steps),
            }
        }
    }

    #[async_trait]
    impl JudgeModel for ScriptedModel {
        async fn next_step(&self, _: &[JudgeMessage]) -> Result<JudgeStep, HarnessError> {
            self.steps
                .lock()
                .pop()
                .ok_or_else(|| HarnessError::Judge("script exhausted".to_string()))
        }
    }

    struct StubSession;

    #[async_trait]
    impl ChainSession for StubSession {
        async fn snapshot(&self) -> Result<String, HarnessError> {
            Ok("0x1".into())
        }
        async fn revert(&self, _: &str) -> Result<bool, HarnessError> {
            Ok(true)
        }
        async fn chain_id(&self) -> Result<u64, HarnessError> {
            Ok(1)
        }
        async fn transaction_count(&self, _: Address) -> Result<U256, HarnessError> {
            Ok(U256::zero())
        }
        async fn send_raw_transaction(
            &self,
            _: Bytes,
        ) -> Result<TransactionReceipt, HarnessError> {
            Err(HarnessError::Chain("stub".into()))
        }
        async fn balance(&self, _: Address) -> Result<U256, HarnessError> {
            Ok(U256::zero())
        }
    }

    struct StubObserver;

    #[async_trait]
    impl crate::fixture::ObserverFixture for StubObserver {
        async fn report(&self) -> anyhow::Result<String> {
            Ok("ETH: 10000, WETH: 0".to_string())
        }
    }

    fn engine() -> ReplayEngine {
        ReplayEngine::from_keys(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_immediate_verdict() {
        let model = ScriptedModel::new(vec![JudgeStep::Final("FINAL ANSWER: PASS".into())]);
        let engine = engine();
        let session = StubSession;
        let observer = StubObserver;
        let judge = JudgeSession::new(&model, &engine, &session, &observer, None, 10);
        let outcome = judge.run("wrap 1 ETH", "Agent output: []").await.unwrap();
        assert_eq!(outcome.verdict.as_deref(), Some("FINAL ANSWER: PASS"));
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.tool_calls, 0);
    }

    #[tokio::test]
    async fn test_balance_tool_then_verdict() {
        let model = ScriptedModel::new(vec![
            JudgeStep::ToolCall(ToolCall {
                id: "call_1".into(),
                name: "get_balances".into(),
                arguments: json!({}),
            }),
            JudgeStep::Final("FINAL ANSWER: FAIL".into()),
        ]);
        let engine = engine();
        let session = StubSession;
        let observer = StubObserver;
        let judge = JudgeSession::new(&model, &engine, &session, &observer, None, 10);
        let outcome = judge.run("wrap 1 ETH", "Agent output: none").await.unwrap();
        assert_eq!(outcome.verdict.as_deref(), Some("FINAL ANSWER: FAIL"));
        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.tool_calls, 1);
    }

    #[tokio::test]
    async fn test_turn_cap_yields_no_verdict_not_error() {
        let tool_step = || {
            JudgeStep::ToolCall(ToolCall {
                id: "call_x".into(),
                name: "get_balances".into(),
                arguments: json!({}),
            })
        };
        let model = ScriptedModel::new(vec![tool_step(), tool_step(), tool_step(), tool_step()]);
        let engine = engine();
        let session = StubSession;
        let observer = StubObserver;
        let judge = JudgeSession::new(&model, &engine, &session, &observer, None, 3);
        let outcome = judge.run("wrap 1 ETH", "Agent output: none").await.unwrap();
        assert!(outcome.verdict.is_none());
        assert_eq!(outcome.turns, 3);
        assert_eq!(outcome.tool_calls, 3);
    }

    #[tokio::test]
    async fn test_empty_tx_list_tool_result() {
        let model = ScriptedModel::new(vec![
            JudgeStep::ToolCall(ToolCall {
                id: "call_1".into(),
                name: "validate_tx_execution".into(),
                arguments: json!({"tx_list": []}),
            }),
            JudgeStep::Final("FINAL ANSWER: FAIL".into()),
        ]);
        let engine = engine();
        let session = StubSession;
        let observer = StubObserver;
        let judge = JudgeSession::new(&model, &engine, &session, &observer, None, 10);
        let outcome = judge.run("wrap 1 ETH", "Agent output: []").await.unwrap();
        assert_eq!(outcome.verdict.as_deref(), Some("FINAL ANSWER: FAIL"));
    }
}
