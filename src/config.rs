//! Harness configuration
//!
//! Loaded from an optional JSON file with serde defaults; secrets (the
//! privileged bind signer key, the judge API key) are picked up from the
//! environment so they never land in config files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default anvil test account #0 private key. Only ever meaningful
/// against a local fork.
const DEFAULT_TEST_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Env var holding the privileged signer key used for bind-address tasks.
pub const BIND_KEY_ENV: &str = "CHAINBENCH_BIND_KEY";

/// Env var holding the judge LLM API key.
pub const JUDGE_API_KEY_ENV: &str = "CHAINBENCH_JUDGE_API_KEY";

/// Judge model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// OpenAI-compatible chat-completions endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model id sent in requests
    #[serde(default = "default_model")]
    pub model: String,
    /// API key; empty means "read from env at startup"
    #[serde(default)]
    pub api_key: String,
    /// Hard cap on judge tool-call turns per task
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_max_turns() -> usize {
    10
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_temperature() -> f64 {
    0.0
}

fn default_timeout() -> u64 {
    120
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: String::new(),
            max_turns: default_max_turns(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Fork node endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Default test signer key (anvil account #0 unless overridden)
    #[serde(default = "default_private_key")]
    pub private_key: String,
    /// Privileged signer key for bind-address tasks; filled from
    /// `CHAINBENCH_BIND_KEY` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_private_key: Option<String>,
    #[serde(default)]
    pub judge: JudgeConfig,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_private_key() -> String {
    DEFAULT_TEST_KEY.to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            private_key: default_private_key(),
            bind_private_key: None,
            judge: JudgeConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load from a JSON file, then fill secrets from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.fill_from_env();
        Ok(config)
    }

    /// Defaults plus environment secrets.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.fill_from_env();
        config
    }

    fn fill_from_env(&mut self) {
        if self.bind_private_key.is_none() {
            self.bind_private_key = std::env::var(BIND_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        if self.judge.api_key.is_empty() {
            if let Ok(key) = std::env::var(JUDGE_API_KEY_ENV) {
                self.judge.api_key = key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(config.judge.max_turns, 10);
        assert_eq!(config.judge.temperature, 0.0);
        assert!(config.bind_private_key.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rpc_url": "http://127.0.0.1:9000", "judge": {{"model": "gpt-4o-mini"}}}}"#
        )
        .unwrap();
        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.rpc_url, "http://127.0.0.1:9000");
        assert_eq!(config.judge.model, "gpt-4o-mini");
        assert_eq!(config.judge.max_tokens, 16384);
    }
}
