//! Chain session: the harness-facing surface of a forked EVM node
//!
//! One `ChainSession` is created by the process entry point and threaded
//! explicitly through the evaluator and replay engine; nothing in this
//! crate holds a global provider. The snapshot/revert pair is the only
//! isolation mechanism between tasks, so callers must pair every
//! `snapshot()` with exactly one `revert()`.

use crate::error::HarnessError;
use async_trait::async_trait;
use ethers::core::types::{Address, Bytes, TransactionReceipt, U256};
use ethers::providers::{Http, Middleware, Provider};
use tracing::{debug, warn};

/// Primitives the harness consumes from a forked chain node.
///
/// Implementations must serialize their own RPC access: the evaluator
/// never issues two calls concurrently against one session, because nonce
/// and snapshot state are shared mutable resources on the node side.
#[async_trait]
pub trait ChainSession: Send + Sync {
    /// Record current fork state, returning an opaque snapshot handle
    /// (`evm_snapshot`).
    async fn snapshot(&self) -> Result<String, HarnessError>;

    /// Roll the fork back to a previously taken snapshot (`evm_revert`).
    /// Returns whether the node accepted the handle.
    async fn revert(&self, snapshot_id: &str) -> Result<bool, HarnessError>;

    /// Chain id of the fork.
    async fn chain_id(&self) -> Result<u64, HarnessError>;

    /// Current transaction count (nonce) for an address. Queried fresh
    /// before every transaction; never cached, since earlier transactions
    /// in the same batch advance it.
    async fn transaction_count(&self, address: Address) -> Result<U256, HarnessError>;

    /// Submit a signed transaction and block until its receipt is
    /// available.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TransactionReceipt, HarnessError>;

    /// Native token balance of an address.
    async fn balance(&self, address: Address) -> Result<U256, HarnessError>;
}

/// `ChainSession` over an HTTP JSON-RPC endpoint (anvil/hardhat fork).
pub struct HttpChainSession {
    provider: Provider<Http>,
}

impl HttpChainSession {
    /// Connect to a fork node at the given HTTP endpoint.
    pub fn connect(rpc_url: &str) -> Result<Self, HarnessError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| HarnessError::Chain(format!("invalid rpc url '{}': {}", rpc_url, e)))?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl ChainSession for HttpChainSession {
    async fn snapshot(&self) -> Result<String, HarnessError> {
        let id: String = self
            .provider
            .request("evm_snapshot", ())
            .await
            .map_err(|e| HarnessError::Chain(format!("evm_snapshot failed: {}", e)))?;
        debug!(snapshot_id = %id, "opened fork snapshot");
        Ok(id)
    }

    async fn revert(&self, snapshot_id: &str) -> Result<bool, HarnessError> {
        let accepted: bool = self
            .provider
            .request("evm_revert", [snapshot_id])
            .await
            .map_err(|e| HarnessError::Chain(format!("evm_revert failed: {}", e)))?;
        if !accepted {
            warn!(snapshot_id, "fork rejected snapshot revert");
        }
        Ok(accepted)
    }

    async fn chain_id(&self) -> Result<u64, HarnessError> {
        let id = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| HarnessError::Chain(format!("eth_chainId failed: {}", e)))?;
        Ok(id.as_u64())
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, HarnessError> {
        self.provider
            .get_transaction_count(address, None)
            .await
            .map_err(|e| HarnessError::Chain(format!("nonce query failed: {}", e)))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TransactionReceipt, HarnessError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| HarnessError::Chain(format!("send_raw_transaction failed: {}", e)))?;
        let receipt = pending
            .await
            .map_err(|e| HarnessError::Chain(format!("receipt wait failed: {}", e)))?
            .ok_or_else(|| HarnessError::Chain("transaction dropped without a receipt".into()))?;
        Ok(receipt)
    }

    async fn balance(&self, address: Address) -> Result<U256, HarnessError> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(|e| HarnessError::Chain(format!("balance query failed: {}", e)))
    }
}
