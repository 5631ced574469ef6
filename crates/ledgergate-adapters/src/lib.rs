//! Reference ledger adapters for LedgerGate.
//!
//! None of these talk to a real ledger. They produce deterministic steps,
//! simulations and family-canonical transaction hashes so the workflow engine
//! can be exercised end to end locally and in tests.

#![deny(unsafe_code)]

use async_trait::async_trait;
use ledgergate_core::adapter::{BroadcastReceipt, LedgerAdapter, SimulationResult, StateQuery, Step};
use ledgergate_core::error::LedgerGateError;
use ledgergate_core::intent::{Intent, IntentKind, LedgerFamily};
use ledgergate_core::types::StateDelta;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Deterministic mock ledger for one family.
///
/// Allowance-based families (`evm`, `starknet`) get one approval step per
/// spent contract before the action itself.
#[derive(Debug, Clone)]
pub struct DeterministicLedgerAdapter {
    family: LedgerFamily,
    broadcasts: Arc<AtomicUsize>,
    state: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl DeterministicLedgerAdapter {
    pub fn new(family: LedgerFamily) -> Self {
        Self {
            family,
            broadcasts: Arc::new(AtomicUsize::new(0)),
            state: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Seed a `read_state` answer. Keys are `network-status` or
    /// `account:<address>`.
    pub fn with_state(self, key: impl Into<String>, value: Value) -> Self {
        match self.state.write() {
            Ok(mut state) => {
                state.insert(key.into(), value);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key.into(), value);
            }
        }
        self
    }

    /// Every adapter for the five supported families.
    pub fn all() -> Vec<Self> {
        LedgerFamily::ALL.into_iter().map(Self::new).collect()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }

    fn uses_allowances(&self) -> bool {
        matches!(self.family, LedgerFamily::Evm | LedgerFamily::Starknet)
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.get(key).cloned()
    }

    fn tx_hash(&self, step: &Step, nonce: usize) -> String {
        let material = json!({
            "family": self.family,
            "nonce": nonce,
            "step": step,
        });
        let bytes = serde_json::to_vec(&material).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&bytes);

        match self.family {
            LedgerFamily::Evm => format!("0x{}", hasher.finalize().to_hex()),
            LedgerFamily::Starknet => {
                // Keep the felt below the field prime.
                let hex = hasher.finalize().to_hex();
                format!("0x0{}", &hex.as_str()[1..])
            }
            LedgerFamily::Cosmos => hasher.finalize().to_hex().to_ascii_uppercase(),
            // A set top bit pins the base58 length: 44 for digests, 88 for
            // signatures.
            LedgerFamily::Sui => {
                let mut digest = *hasher.finalize().as_bytes();
                digest[0] |= 0x80;
                base58_encode(&digest)
            }
            LedgerFamily::Solana => {
                let mut signature = [0u8; 64];
                hasher.finalize_xof().fill(&mut signature);
                signature[0] |= 0x80;
                base58_encode(&signature)
            }
        }
    }
}

/// Contract fields whose balance an action spends.
fn spent_contracts(kind: IntentKind) -> &'static [&'static str] {
    match kind {
        IntentKind::LendingSupply | IntentKind::LendingRepay | IntentKind::BridgeTransfer => &["asset"],
        IntentKind::LiquidityAdd => &["tokenA", "tokenB"],
        _ => &[],
    }
}

fn event_name(kind: IntentKind) -> &'static str {
    match kind {
        IntentKind::TransferNative | IntentKind::TransferToken => "Transfer",
        IntentKind::LendingSupply => "Supply",
        IntentKind::LendingWithdraw => "Withdraw",
        IntentKind::LendingBorrow => "Borrow",
        IntentKind::LendingRepay => "Repay",
        IntentKind::LiquidityAdd => "Mint",
        IntentKind::LiquidityRemove => "Burn",
        IntentKind::BridgeTransfer => "BridgeInitiated",
    }
}

fn fee_estimate(family: LedgerFamily) -> &'static str {
    match family {
        LedgerFamily::Evm => "0.00042",
        LedgerFamily::Solana => "0.000005",
        LedgerFamily::Sui => "0.002",
        LedgerFamily::Starknet => "0.0001",
        LedgerFamily::Cosmos => "0.005",
    }
}

#[async_trait]
impl LedgerAdapter for DeterministicLedgerAdapter {
    fn family(&self) -> LedgerFamily {
        self.family
    }

    async fn build_steps(&self, intent: &Intent) -> Result<Vec<Step>, LedgerGateError> {
        if intent.family != self.family {
            return Err(LedgerGateError::Adapter {
                adapter: self.family.to_string(),
                message: format!("intent targets {}", intent.network),
            });
        }

        let mut steps = Vec::new();
        if self.uses_allowances() {
            let spender = intent.protocol().unwrap_or("router");
            for field in spent_contracts(intent.kind) {
                if let Some(token) = intent.field(field) {
                    steps.push(Step {
                        index: steps.len(),
                        action: "approve".to_string(),
                        payload: json!({
                            "network": intent.network,
                            "token": token,
                            "spender": spender,
                        }),
                    });
                }
            }
        }
        steps.push(Step {
            index: steps.len(),
            action: intent.kind.name().to_string(),
            payload: json!({
                "network": intent.network,
                "fields": intent.fields,
            }),
        });
        Ok(steps)
    }

    async fn simulate(&self, intent: &Intent) -> Result<SimulationResult, LedgerGateError> {
        let steps = self.build_steps(intent).await?;
        let nonce = self.broadcast_count();
        let mut warnings = Vec::new();
        if intent.amount_usd().is_none() {
            warnings.push("intent carries no amountUsd; spend caps will fail closed".to_string());
        }

        Ok(SimulationResult {
            ok: true,
            warnings,
            estimated_fee: Some(fee_estimate(self.family).to_string()),
            state_delta: Some(StateDelta::new(
                json!({ "nonce": nonce }),
                json!({ "nonce": nonce + steps.len() }),
            )),
            logs: steps
                .iter()
                .map(|step| format!("step {} {} ok", step.index, step.action))
                .collect(),
        })
    }

    async fn broadcast(&self, step: &Step) -> Result<BroadcastReceipt, LedgerGateError> {
        let nonce = self.broadcasts.fetch_add(1, Ordering::SeqCst);
        let hash = self.tx_hash(step, nonce);
        debug!(family = %self.family, step = step.index, %hash, "mock broadcast");

        let event = if step.action == "approve" {
            "Approval"
        } else {
            IntentKind::parse(&step.action)
                .map(event_name)
                .unwrap_or("Executed")
        };
        Ok(BroadcastReceipt {
            hash,
            emitted_events: vec![event.to_string()],
            state_delta: Some(StateDelta::new(
                json!({ "nonce": nonce }),
                json!({ "nonce": nonce + 1 }),
            )),
        })
    }

    async fn read_state(&self, query: &StateQuery) -> Result<Value, LedgerGateError> {
        let address = query.params.get("address").and_then(Value::as_str);
        let key = match address {
            Some(address) => format!("{}:{address}", query.key),
            None => query.key.clone(),
        };
        if let Some(seeded) = self.lookup(&key) {
            return Ok(seeded);
        }

        Ok(match query.key.as_str() {
            "network-status" => json!({
                "family": self.family,
                "healthy": true,
                "height": 1_000 + self.broadcast_count(),
            }),
            "account" => json!({
                "address": address,
                "balance": "0",
                "nonce": self.broadcast_count(),
            }),
            other => {
                return Err(LedgerGateError::Adapter {
                    adapter: self.family.to_string(),
                    message: format!("unsupported state query '{other}'"),
                })
            }
        })
    }
}

/// Deterministic failing adapter useful for chaos testing.
#[derive(Debug, Clone)]
pub struct AlwaysFailAdapter {
    family: LedgerFamily,
    reason: String,
}

impl AlwaysFailAdapter {
    pub fn new(family: LedgerFamily, reason: impl Into<String>) -> Self {
        Self {
            family,
            reason: reason.into(),
        }
    }

    fn failure(&self) -> LedgerGateError {
        LedgerGateError::Adapter {
            adapter: format!("always-fail/{}", self.family),
            message: self.reason.clone(),
        }
    }
}

#[async_trait]
impl LedgerAdapter for AlwaysFailAdapter {
    fn family(&self) -> LedgerFamily {
        self.family
    }

    async fn build_steps(&self, intent: &Intent) -> Result<Vec<Step>, LedgerGateError> {
        Ok(vec![Step {
            index: 0,
            action: intent.kind.name().to_string(),
            payload: json!({ "fields": intent.fields }),
        }])
    }

    async fn simulate(&self, _intent: &Intent) -> Result<SimulationResult, LedgerGateError> {
        Err(self.failure())
    }

    async fn broadcast(&self, _step: &Step) -> Result<BroadcastReceipt, LedgerGateError> {
        Err(self.failure())
    }

    async fn read_state(&self, _query: &StateQuery) -> Result<Value, LedgerGateError> {
        Err(self.failure())
    }
}

/// Wraps another adapter and delays every call, for timeout tests.
pub struct SlowAdapter {
    inner: Arc<dyn LedgerAdapter>,
    delay: Duration,
}

impl SlowAdapter {
    pub fn new(inner: Arc<dyn LedgerAdapter>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl LedgerAdapter for SlowAdapter {
    fn family(&self) -> LedgerFamily {
        self.inner.family()
    }

    async fn build_steps(&self, intent: &Intent) -> Result<Vec<Step>, LedgerGateError> {
        self.inner.build_steps(intent).await
    }

    async fn simulate(&self, intent: &Intent) -> Result<SimulationResult, LedgerGateError> {
        tokio::time::sleep(self.delay).await;
        self.inner.simulate(intent).await
    }

    async fn broadcast(&self, step: &Step) -> Result<BroadcastReceipt, LedgerGateError> {
        tokio::time::sleep(self.delay).await;
        self.inner.broadcast(step).await
    }

    async fn read_state(&self, query: &StateQuery) -> Result<Value, LedgerGateError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_state(query).await
    }
}

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58_encode(bytes: &[u8]) -> String {
    let zeros = bytes.iter().take_while(|b| **b == 0).count();
    // Little-endian base-58 digits.
    let mut digits: Vec<u8> = Vec::with_capacity(bytes.len() * 138 / 100 + 1);
    for &byte in &bytes[zeros..] {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|d| BASE58_ALPHABET[*d as usize] as char));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgergate_core::normalizer::{IntentInput, IntentNormalizer};

    fn intent(network: &str, input: IntentInput) -> Intent {
        IntentNormalizer::new().normalize(network, &input).unwrap()
    }

    #[test]
    fn base58_matches_known_vectors() {
        assert_eq!(base58_encode(b""), "");
        assert_eq!(base58_encode(&[0, 0, 1]), "112");
        assert_eq!(base58_encode(b"hello world"), "StV1DL6CwTryKyV");
    }

    #[tokio::test]
    async fn hashes_are_canonical_for_every_family() {
        for adapter in DeterministicLedgerAdapter::all() {
            let step = Step {
                index: 0,
                action: "transfer.native".to_string(),
                payload: json!({"n": 1}),
            };
            for _ in 0..8 {
                let receipt = adapter.broadcast(&step).await.unwrap();
                assert!(
                    adapter.family().is_tx_hash(&receipt.hash),
                    "{} produced {}",
                    adapter.family(),
                    receipt.hash
                );
            }
            assert_eq!(adapter.broadcast_count(), 8);
        }
    }

    #[tokio::test]
    async fn evm_liquidity_add_approves_both_tokens_first() {
        let adapter = DeterministicLedgerAdapter::new(LedgerFamily::Evm);
        let intent = intent(
            "evm:sepolia",
            IntentInput::new("liquidity.add")
                .with_field("protocol", "uniswap")
                .with_field("tokenA", format!("0x{}", "a".repeat(40)))
                .with_field("tokenB", format!("0x{}", "b".repeat(40)))
                .with_field("amountA", 1)
                .with_field("amountB", 2),
        );

        let steps = adapter.build_steps(&intent).await.unwrap();
        let actions: Vec<&str> = steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(actions, vec!["approve", "approve", "liquidity.add"]);
        assert_eq!(steps[1].payload["token"], format!("0x{}", "b".repeat(40)));
        assert_eq!(steps[2].index, 2);
    }

    #[tokio::test]
    async fn solana_supply_needs_no_approval() {
        let adapter = DeterministicLedgerAdapter::new(LedgerFamily::Solana);
        let intent = intent(
            "solana:devnet",
            IntentInput::new("lending.supply")
                .with_field("protocol", "kamino")
                .with_field("asset", "So11111111111111111111111111111111111111112")
                .with_field("amount", "2.5"),
        );

        let steps = adapter.build_steps(&intent).await.unwrap();
        assert_eq!(steps.len(), 1);
        let simulation = adapter.simulate(&intent).await.unwrap();
        assert!(simulation.ok);
        assert_eq!(simulation.warnings.len(), 1);
    }

    #[tokio::test]
    async fn seeded_state_wins_over_defaults() {
        let address = format!("0x{}", "c".repeat(40));
        let adapter = DeterministicLedgerAdapter::new(LedgerFamily::Evm)
            .with_state(format!("account:{address}"), json!({"balance": "42"}));

        let seeded = adapter
            .read_state(&StateQuery::new("account", json!({"address": address})))
            .await
            .unwrap();
        assert_eq!(seeded["balance"], "42");

        let status = adapter
            .read_state(&StateQuery::new("network-status", json!({})))
            .await
            .unwrap();
        assert_eq!(status["healthy"], true);

        assert!(adapter
            .read_state(&StateQuery::new("mempool", json!({})))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn always_fail_adapter_fails_side_effects() {
        let adapter = AlwaysFailAdapter::new(LedgerFamily::Cosmos, "node unreachable");
        let step = Step {
            index: 0,
            action: "transfer.native".to_string(),
            payload: json!({}),
        };
        let err = adapter.broadcast(&step).await.unwrap_err();
        assert!(err.retryable());
        assert!(err.to_string().contains("node unreachable"));
    }
}
