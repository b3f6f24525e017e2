//! Transaction replay engine
//!
//! Takes the transaction list a candidate agent produced, normalizes
//! each descriptor to something actually signable against the fork, and
//! submits the batch strictly in order, stopping at the first failure.
//! DeFi batches are almost always causally dependent (approve before
//! swap, wrap before supply), so continuing past a failed transaction
//! would only produce misleading downstream reverts.

use crate::chain::ChainSession;
use crate::error::HarnessError;
use ethers::core::types::transaction::eip2718::TypedTransaction;
use ethers::core::types::{
    Address, Bytes, Eip1559TransactionRequest, NameOrAddress, TransactionRequest, U256, U64,
};
use ethers::signers::{LocalWallet, Signer};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

/// Legacy gas price injected when a descriptor carries no fee model at
/// all: 30 gwei.
const DEFAULT_GAS_PRICE_WEI: u64 = 30_000_000_000;

/// Gas limit used when the descriptor does not supply one. Generous on
/// purpose: an out-of-gas failure must not masquerade as a logic error
/// in the candidate's transaction.
const DEFAULT_GAS_LIMIT: u64 = 800_000;

/// One transaction as decoded from the candidate's answer text.
///
/// Agents emit these with wildly inconsistent field discipline, so every
/// field is optional and numbers are accepted as JSON integers, decimal
/// strings, or 0x-hex strings. JSON `null` is equivalent to absent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TxDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "quantity_opt", skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    /// Hex-encoded call data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, deserialize_with = "quantity_opt", skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(
        default,
        rename = "gasPrice",
        deserialize_with = "quantity_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub gas_price: Option<U256>,
    #[serde(
        default,
        rename = "maxFeePerGas",
        deserialize_with = "quantity_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_fee_per_gas: Option<U256>,
    #[serde(
        default,
        rename = "maxPriorityFeePerGas",
        deserialize_with = "quantity_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default, deserialize_with = "quantity_opt", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,
    #[serde(
        default,
        rename = "chainId",
        deserialize_with = "quantity_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub chain_id: Option<U256>,
}

/// Accept a quantity as a JSON integer, decimal string, or 0x-hex string.
fn quantity_opt<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(v) => Ok(Some(U256::from(v))),
            // Beyond u64, JSON numbers arrive as floats; wei amounts that
            // large must be written as strings.
            None => Err(D::Error::custom(format!(
                "quantity {} is not an unsigned integer",
                n
            ))),
        },
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            let parsed = if let Some(hex_part) = s.strip_prefix("0x") {
                U256::from_str_radix(hex_part, 16).map_err(|e| e.to_string())
            } else {
                U256::from_dec_str(s).map_err(|e| e.to_string())
            };
            parsed.map(Some).map_err(D::Error::custom)
        }
        Some(other) => Err(D::Error::custom(format!(
            "quantity must be a number or string, got {}",
            other
        ))),
    }
}

/// Find and decode the first JSON transaction array embedded in an
/// agent's free-text answer (code fences, prose, whatever).
pub fn extract_tx_list(answer: &str) -> Result<Vec<TxDescriptor>, HarnessError> {
    let bytes = answer.as_bytes();
    for (start, &b) in bytes.iter().enumerate() {
        if b != b'[' {
            continue;
        }
        if let Some(end) = balanced_array_end(answer, start) {
            let candidate = &answer[start..=end];
            if let Ok(txs) = serde_json::from_str::<Vec<TxDescriptor>>(candidate) {
                return Ok(txs);
            }
        }
    }
    Err(HarnessError::Replay(
        "no transaction list found in agent answer".to_string(),
    ))
}

/// Index of the `]` closing the array that opens at `start`, skipping
/// string literals.
fn balanced_array_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalize one descriptor into a signable transaction.
///
/// `rewrite_calldata` is on for the default-signer path: agents that
/// hard-coded their own address into the call data get it rewritten to
/// the harness signer, case-insensitively. Canonical `from`, `nonce` and
/// `chain_id` always come from the session, never from the descriptor.
pub fn normalize(
    desc: &TxDescriptor,
    signer: Address,
    nonce: U256,
    chain_id: u64,
    rewrite_calldata: bool,
) -> Result<TypedTransaction, HarnessError> {
    let to = match desc.to.as_deref() {
        Some(s) if !s.trim().is_empty() => Address::from_str(s.trim())
            .map_err(|e| HarnessError::Replay(format!("invalid 'to' address '{}': {}", s, e)))?,
        _ => {
            return Err(HarnessError::Replay(
                "transaction has no 'to' address".to_string(),
            ))
        }
    };

    let mut data_hex = desc
        .data
        .as_deref()
        .unwrap_or("0x")
        .trim()
        .to_lowercase();
    if rewrite_calldata {
        if let Some(original_from) = desc.from.as_deref() {
            let old = original_from.trim().to_lowercase();
            let old = old.strip_prefix("0x").unwrap_or(&old).to_string();
            let new = format!("{:x}", signer);
            if !old.is_empty() && old != new {
                data_hex = data_hex.replace(&old, &new);
            }
        }
    }
    let data_bytes = hex::decode(data_hex.strip_prefix("0x").unwrap_or(&data_hex))
        .map_err(|e| HarnessError::Replay(format!("invalid calldata hex: {}", e)))?;
    let data = Bytes::from(data_bytes);

    let value = desc.value.unwrap_or_else(U256::zero);
    let is_eip1559 = desc.max_fee_per_gas.is_some() && desc.max_priority_fee_per_gas.is_some();

    // Exactly one complete fee model survives normalization.
    let (gas_price, fee_pair) = if is_eip1559 {
        // Both 1559 fields present: drop any legacy gasPrice.
        (
            None,
            Some((
                desc.max_fee_per_gas.unwrap_or_else(U256::zero),
                desc.max_priority_fee_per_gas.unwrap_or_else(U256::zero),
            )),
        )
    } else if let Some(price) = desc.gas_price {
        (Some(price), None)
    } else {
        (Some(U256::from(DEFAULT_GAS_PRICE_WEI)), None)
    };

    // Safety margin: candidates reliably under-estimate gas. Doubled
    // exactly once, here and nowhere else.
    let gas = desc
        .gas
        .unwrap_or_else(|| U256::from(DEFAULT_GAS_LIMIT))
        .checked_mul(U256::from(2))
        .ok_or_else(|| {
            HarnessError::Replay(format!(
                "gas limit {} overflows when doubled",
                desc.gas.unwrap_or_else(U256::zero)
            ))
        })?;

    let tx = match fee_pair {
        Some((max_fee, max_priority)) => TypedTransaction::Eip1559(Eip1559TransactionRequest {
            from: Some(signer),
            to: Some(NameOrAddress::Address(to)),
            value: Some(value),
            data: Some(data),
            gas: Some(gas),
            nonce: Some(nonce),
            chain_id: Some(U64::from(chain_id)),
            max_fee_per_gas: Some(max_fee),
            max_priority_fee_per_gas: Some(max_priority),
            access_list: Default::default(),
        }),
        None => TypedTransaction::Legacy(TransactionRequest {
            from: Some(signer),
            to: Some(NameOrAddress::Address(to)),
            value: Some(value),
            data: Some(data),
            gas: Some(gas),
            gas_price,
            nonce: Some(nonce),
            chain_id: Some(U64::from(chain_id)),
        }),
    };
    Ok(tx)
}

/// Outcome of replaying one batch.
#[derive(Clone, Debug)]
pub struct BatchReport {
    pub succeeded: bool,
    pub total_gas_used: u64,
    /// Failing transaction's parameters (or the submission error) when
    /// the batch stopped early.
    pub failure: Option<String>,
}

impl BatchReport {
    fn failed(total_gas_used: u64, failure: String) -> Self {
        Self {
            succeeded: false,
            total_gas_used,
            failure: Some(failure),
        }
    }
}

/// Signs and submits candidate transaction batches against a chain
/// session.
pub struct ReplayEngine {
    default_wallet: LocalWallet,
    bind_wallet: Option<LocalWallet>,
}

impl ReplayEngine {
    pub fn new(default_wallet: LocalWallet, bind_wallet: Option<LocalWallet>) -> Self {
        Self {
            default_wallet,
            bind_wallet,
        }
    }

    /// Build from raw private keys (config strings).
    pub fn from_keys(default_key: &str, bind_key: Option<&str>) -> Result<Self, HarnessError> {
        let default_wallet = default_key
            .parse::<LocalWallet>()
            .map_err(|e| HarnessError::Replay(format!("invalid default signer key: {}", e)))?;
        let bind_wallet = match bind_key {
            Some(key) => Some(
                key.parse::<LocalWallet>()
                    .map_err(|e| HarnessError::Replay(format!("invalid bind signer key: {}", e)))?,
            ),
            None => None,
        };
        Ok(Self::new(default_wallet, bind_wallet))
    }

    /// Address the batch will execute as when no bind address is set.
    pub fn default_signer(&self) -> Address {
        self.default_wallet.address()
    }

    /// Replay a batch strictly in order, stopping at the first failure.
    ///
    /// Never returns an error: replay problems are data for the judge,
    /// reported through `BatchReport::failure`.
    pub async fn submit_batch(
        &self,
        txs: &[TxDescriptor],
        session: &dyn ChainSession,
        bind_address: Option<&str>,
    ) -> BatchReport {
        let wallet = match bind_address {
            // Bind-address tasks execute as a separate, pre-funded
            // signer sourced from process configuration.
            Some(addr) => match &self.bind_wallet {
                Some(wallet) => wallet,
                None => {
                    return BatchReport::failed(
                        0,
                        format!("task binds address {} but no bind signer key is configured", addr),
                    )
                }
            },
            None => &self.default_wallet,
        };

        let chain_id = match session.chain_id().await {
            Ok(id) => id,
            Err(e) => return BatchReport::failed(0, e.to_string()),
        };
        let wallet = wallet.clone().with_chain_id(chain_id);
        let signer = wallet.address();
        let rewrite_calldata = bind_address.is_none();

        let mut total_gas_used = 0u64;
        for (index, desc) in txs.iter().enumerate() {
            // Fresh nonce every transaction: earlier transactions in this
            // batch have advanced it.
            let nonce = match session.transaction_count(signer).await {
                Ok(n) => n,
                Err(e) => return BatchReport::failed(total_gas_used, e.to_string()),
            };
            let tx = match normalize(desc, signer, nonce, chain_id, rewrite_calldata) {
                Ok(tx) => tx,
                Err(e) => {
                    return BatchReport::failed(
                        total_gas_used,
                        format!("transaction {}: {}", index + 1, e),
                    )
                }
            };

            let signature = match wallet.sign_transaction(&tx).await {
                Ok(sig) => sig,
                Err(e) => {
                    return BatchReport::failed(
                        total_gas_used,
                        format!("transaction {} signing failed: {}", index + 1, e),
                    )
                }
            };
            let raw = tx.rlp_signed(&signature);

            let receipt = match session.send_raw_transaction(raw).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    return BatchReport::failed(
                        total_gas_used,
                        format!("transaction {} submission failed: {}", index + 1, e),
                    )
                }
            };

            if receipt.status == Some(U64::one()) {
                let gas_used = receipt.gas_used.map(|g| g.as_u64()).unwrap_or(0);
                total_gas_used += gas_used;
                info!(
                    index = index + 1,
                    tx_hash = ?receipt.transaction_hash,
                    gas_used,
                    "transaction succeeded"
                );
            } else {
                // Stop the batch: later transactions depend on this one.
                let params = serde_json::to_string(&tx).unwrap_or_else(|_| format!("{:?}", tx));
                warn!(
                    index = index + 1,
                    tx_hash = ?receipt.transaction_hash,
                    "transaction reverted, aborting batch"
                );
                return BatchReport::failed(
                    total_gas_used,
                    format!(
                        "transaction {} reverted (hash {:?}), parameters: {}",
                        index + 1,
                        receipt.transaction_hash,
                        params
                    ),
                );
            }
        }

        BatchReport {
            succeeded: true,
            total_gas_used,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn signer() -> Address {
        Address::from_str(SIGNER).unwrap()
    }

    fn norm(desc: &TxDescriptor) -> TypedTransaction {
        normalize(desc, signer(), U256::from(7), 1, true).unwrap()
    }

    #[test]
    fn test_missing_to_is_rejected_before_signing() {
        let desc = TxDescriptor {
            data: Some("0xdeadbeef".into()),
            ..Default::default()
        };
        assert!(matches!(norm_err(&desc), HarnessError::Replay(_)));

        let desc = TxDescriptor {
            to: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(norm_err(&desc), HarnessError::Replay(_)));
    }

    fn norm_err(desc: &TxDescriptor) -> HarnessError {
        normalize(desc, signer(), U256::zero(), 1, true).unwrap_err()
    }

    #[test]
    fn test_fee_model_exclusivity_drops_gas_price() {
        let desc = TxDescriptor {
            to: Some(SIGNER.into()),
            gas_price: Some(U256::from(1_000_000_000u64)),
            max_fee_per_gas: Some(U256::from(2_000_000_000u64)),
            max_priority_fee_per_gas: Some(U256::from(1_000u64)),
            ..Default::default()
        };
        match norm(&desc) {
            TypedTransaction::Eip1559(tx) => {
                assert_eq!(tx.max_fee_per_gas, Some(U256::from(2_000_000_000u64)));
                assert_eq!(tx.max_priority_fee_per_gas, Some(U256::from(1_000u64)));
            }
            other => panic!("expected EIP-1559 transaction, got {:?}", other),
        }
    }

    #[test]
    fn test_no_fee_model_injects_legacy_defaults() {
        let desc = TxDescriptor {
            to: Some(SIGNER.into()),
            ..Default::default()
        };
        match norm(&desc) {
            TypedTransaction::Legacy(tx) => {
                assert_eq!(tx.gas_price, Some(U256::from(30_000_000_000u64)));
                assert_eq!(tx.gas, Some(U256::from(1_600_000u64))); // 800k default, doubled
            }
            other => panic!("expected legacy transaction, got {:?}", other),
        }
    }

    #[test]
    fn test_gas_limit_is_doubled_exactly_once() {
        let desc = TxDescriptor {
            to: Some(SIGNER.into()),
            gas: Some(U256::from(100_000u64)),
            gas_price: Some(U256::from(1u64)),
            ..Default::default()
        };
        let first = norm(&desc);
        assert_eq!(first.gas(), Some(&U256::from(200_000u64)));
        // Normalization is pure: re-running over the same descriptor
        // must not compound the margin.
        let second = norm(&desc);
        assert_eq!(second.gas(), Some(&U256::from(200_000u64)));
    }

    #[test]
    fn test_canonical_fields_come_from_session() {
        let desc = TxDescriptor {
            to: Some(SIGNER.into()),
            from: Some("0x2A804F0c969a4d5c35E551B690Db28371f833567".into()),
            nonce: Some(U256::from(9999u64)),
            chain_id: Some(U256::from(5u64)),
            gas_price: Some(U256::from(1u64)),
            ..Default::default()
        };
        let tx = normalize(&desc, signer(), U256::from(3), 1, true).unwrap();
        assert_eq!(tx.nonce(), Some(&U256::from(3)));
        assert_eq!(tx.chain_id(), Some(U64::from(1)));
        assert_eq!(tx.from(), Some(&signer()));
    }

    #[test]
    fn test_calldata_from_rewrite_is_case_insensitive() {
        // Agent hard-coded its own address into the calldata, mixed case.
        let old = "0x2A804F0c969a4d5c35E551B690Db28371f833567";
        let desc = TxDescriptor {
            to: Some(SIGNER.into()),
            from: Some(old.into()),
            data: Some(format!("0x095ea7b3000000000000000000000000{}", &old[2..])),
            gas_price: Some(U256::from(1u64)),
            ..Default::default()
        };
        let tx = norm(&desc);
        let data = hex::encode(tx.data().unwrap());
        assert!(data.contains("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"));
        assert!(!data.contains("2a804f0c969a4d5c35e551b690db28371f833567"));
    }

    #[test]
    fn test_calldata_untouched_when_from_matches_signer() {
        let desc = TxDescriptor {
            to: Some(SIGNER.into()),
            from: Some(SIGNER.to_lowercase()),
            data: Some("0xdeadbeef".into()),
            gas_price: Some(U256::from(1u64)),
            ..Default::default()
        };
        let tx = norm(&desc);
        assert_eq!(hex::encode(tx.data().unwrap()), "deadbeef");
    }

    #[test]
    fn test_quantities_accept_numbers_and_strings() {
        let desc: TxDescriptor = serde_json::from_str(
            r#"{"to": "0xae7ab96520de3a18e5e111b5eaab095312d7fe84",
                "value": 500000000000000000,
                "gas": "0x30d40",
                "gasPrice": "150000000000",
                "data": "0xa1903eab"}"#,
        )
        .unwrap();
        assert_eq!(desc.value, Some(U256::from(500_000_000_000_000_000u64)));
        assert_eq!(desc.gas, Some(U256::from(200_000u64)));
        assert_eq!(desc.gas_price, Some(U256::from(150_000_000_000u64)));
    }

    #[test]
    fn test_quantities_accept_plain_integers_in_every_field() {
        let desc: TxDescriptor = serde_json::from_str(
            r#"{"to": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
                "value": 1,
                "gas": 100000,
                "gasPrice": 30000000000,
                "nonce": 0,
                "chainId": 1}"#,
        )
        .unwrap();
        assert_eq!(desc.value, Some(U256::one()));
        assert_eq!(desc.gas, Some(U256::from(100_000u64)));
        assert_eq!(desc.gas_price, Some(U256::from(30_000_000_000u64)));
        assert_eq!(desc.nonce, Some(U256::zero()));
        assert_eq!(desc.chain_id, Some(U256::one()));
    }

    #[test]
    fn test_quantity_rejects_non_integer_shapes() {
        assert!(serde_json::from_str::<TxDescriptor>(
            r#"{"to": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "gas": 1.5}"#
        )
        .is_err());
        assert!(serde_json::from_str::<TxDescriptor>(
            r#"{"to": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "gas": [1]}"#
        )
        .is_err());
    }

    #[test]
    fn test_oversized_gas_is_rejected_not_a_panic() {
        let desc = TxDescriptor {
            to: Some(SIGNER.into()),
            gas: Some(U256::MAX),
            gas_price: Some(U256::from(1u64)),
            ..Default::default()
        };
        match norm_err(&desc) {
            HarnessError::Replay(msg) => assert!(msg.contains("overflows")),
            other => panic!("expected replay error, got {:?}", other),
        }
    }

    #[test]
    fn test_null_fields_are_stripped() {
        let desc: TxDescriptor = serde_json::from_str(
            r#"{"to": "0xae7ab96520de3a18e5e111b5eaab095312d7fe84", "gas": null, "value": null}"#,
        )
        .unwrap();
        assert!(desc.gas.is_none());
        assert!(desc.value.is_none());
    }

    #[test]
    fn test_extract_from_fenced_markdown() {
        let answer = "Here you go:\n```json\n[{\"to\": \"0xae7ab96520de3a18e5e111b5eaab095312d7fe84\", \"value\": 1, \"data\": \"0x\"}]\n```\nThis stakes ETH.";
        let txs = extract_tx_list(answer).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].value, Some(U256::one()));
    }

    #[test]
    fn test_extract_bare_array_in_prose() {
        let answer = r#"The plan [see below] is: [{"to": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "data": "0xd0e30db0"}] done."#;
        let txs = extract_tx_list(answer).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(
            txs[0].to.as_deref(),
            Some("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")
        );
    }

    #[test]
    fn test_extract_empty_list() {
        let txs = extract_tx_list("no transactions needed: []").unwrap();
        assert!(txs.is_empty());
    }

    #[test]
    fn test_extract_failure_is_an_error_not_a_panic() {
        assert!(extract_tx_list("I could not build a transaction.").is_err());
    }
}
