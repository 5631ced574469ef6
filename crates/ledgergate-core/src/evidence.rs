use crate::adapter::BroadcastReceipt;
use crate::error::LedgerGateError;
use crate::intent::Intent;
use crate::journal::JournalEntry;
use crate::storage::EvidenceStore;
use crate::trigger::VerifiedTransition;
use crate::types::{Blocker, ExecutionOutcome, StateDelta};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

/// Normalized receipt for manual and externally triggered runs.
pub const SCHEMA_TX_RECEIPT_V1: &str = "tx-receipt-normalized/v1";
/// Receipt for runs started by a verified on-chain cycle transition.
pub const SCHEMA_AUTONOMOUS_CYCLE_V2: &str = "autonomous-cycle-proof/v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceDecision {
    Executed,
    Blocked,
    Failed,
}

impl EvidenceDecision {
    pub fn name(self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "executed" => Some(Self::Executed),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One execute-phase attempt, as sealed into the evidence journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRecord {
    pub record_id: String,
    pub run_id: String,
    pub decision: EvidenceDecision,
    pub network: String,
    pub intent: Intent,
    pub intent_hash: String,
    pub tx_hash: Option<String>,
    pub tx_hashes: Vec<String>,
    pub emitted_events: Vec<String>,
    pub state_delta: Option<StateDelta>,
    pub blockers: Vec<Blocker>,
    pub detail: Option<String>,
    pub amount_usd: Option<f64>,
    pub policy_version: String,
    pub cycle_transition: Option<VerifiedTransition>,
    pub schema_version: String,
    pub recorded_at: DateTime<Utc>,
}

/// Facts collected by the engine for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct EvidenceInput<'a> {
    pub run_id: &'a str,
    pub intent: &'a Intent,
    pub decision: EvidenceDecision,
    pub outcome: Option<&'a ExecutionOutcome>,
    pub receipts: &'a [BroadcastReceipt],
    pub blockers: &'a [Blocker],
    pub policy_version: &'a str,
    pub transition: Option<&'a VerifiedTransition>,
}

impl EvidenceRecord {
    pub fn from_input(input: &EvidenceInput<'_>) -> Self {
        let tx_hashes: Vec<String> = match input.outcome {
            Some(outcome) => outcome.tx_hashes.clone(),
            None => input.receipts.iter().map(|r| r.hash.clone()).collect(),
        };
        let emitted_events = input
            .receipts
            .iter()
            .flat_map(|receipt| receipt.emitted_events.iter().cloned())
            .collect();

        // First step's previous state to last step's next state.
        let deltas: Vec<&StateDelta> = input
            .receipts
            .iter()
            .filter_map(|receipt| receipt.state_delta.as_ref())
            .collect();
        let state_delta = match (deltas.first(), deltas.last()) {
            (Some(first), Some(last)) => Some(StateDelta::new(
                first.previous_state.clone(),
                last.next_state.clone(),
            )),
            _ => None,
        };

        let schema_version = if input.transition.is_some() {
            SCHEMA_AUTONOMOUS_CYCLE_V2
        } else {
            SCHEMA_TX_RECEIPT_V1
        };

        Self {
            record_id: Uuid::new_v4().to_string(),
            run_id: input.run_id.to_string(),
            decision: input.decision,
            network: input.intent.network.clone(),
            intent: input.intent.clone(),
            intent_hash: input.intent.intent_hash(),
            tx_hash: tx_hashes.last().cloned(),
            tx_hashes,
            emitted_events,
            state_delta,
            blockers: input.blockers.to_vec(),
            detail: input
                .outcome
                .filter(|outcome| !outcome.success)
                .map(|outcome| outcome.detail.clone()),
            amount_usd: input.intent.amount_usd(),
            policy_version: input.policy_version.to_string(),
            cycle_transition: input.transition.cloned(),
            schema_version: schema_version.to_string(),
            // TIMESTAMPTZ keeps microseconds; the seal must survive a round trip.
            recorded_at: Utc::now().trunc_subsecs(6),
        }
    }
}

/// Pointer returned to callers after a record was made durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceReceipt {
    pub record: EvidenceRecord,
    pub journal_index: u64,
    pub entry_hash: String,
}

impl EvidenceReceipt {
    fn from_entry(entry: &JournalEntry) -> Result<Self, LedgerGateError> {
        Ok(Self {
            record: entry.evidence()?,
            journal_index: entry.index,
            entry_hash: entry.entry_hash.clone(),
        })
    }
}

/// Writes exactly one durable record per execute attempt.
#[derive(Clone)]
pub struct EvidenceRecorder {
    store: Arc<AsyncMutex<EvidenceStore>>,
}

impl EvidenceRecorder {
    pub fn new(store: EvidenceStore) -> Self {
        Self {
            store: Arc::new(AsyncMutex::new(store)),
        }
    }

    pub async fn backend_label(&self) -> &'static str {
        self.store.lock().await.backend_label()
    }

    pub async fn record(&self, input: &EvidenceInput<'_>) -> Result<EvidenceReceipt, LedgerGateError> {
        let record = EvidenceRecord::from_input(input);
        let entry = self.store.lock().await.append(&record).await?;

        info!(
            run_id = %record.run_id,
            decision = record.decision.name(),
            schema = %record.schema_version,
            index = entry.index,
            "evidence recorded"
        );

        Ok(EvidenceReceipt {
            record,
            journal_index: entry.index,
            entry_hash: entry.entry_hash,
        })
    }

    pub async fn latest(&self) -> Result<Option<EvidenceReceipt>, LedgerGateError> {
        let store = self.store.lock().await;
        store.latest().map(EvidenceReceipt::from_entry).transpose()
    }

    pub async fn history(&self, run_id: &str) -> Result<Vec<EvidenceReceipt>, LedgerGateError> {
        let store = self.store.lock().await;
        store
            .journal()
            .for_run(run_id)
            .map(EvidenceReceipt::from_entry)
            .collect()
    }

    /// USD spent by successful executions during the UTC day of `now`.
    pub async fn spent_today_usd(&self, now: DateTime<Utc>) -> Result<f64, LedgerGateError> {
        let today = now.date_naive();
        let store = self.store.lock().await;
        let mut total = 0.0;
        for entry in store.entries() {
            if entry.decision != EvidenceDecision::Executed
                || entry.recorded_at.date_naive() != today
            {
                continue;
            }
            total += entry.evidence()?.amount_usd.unwrap_or(0.0);
        }
        Ok(total)
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.entries().len()
    }

    pub async fn verify_chain(&self) -> bool {
        self.store.lock().await.verify_chain()
    }
}

/// Spend that has passed the cap check but is not yet in the journal.
///
/// The cap check and the charge happen under one engine-wide window, so two
/// runs cannot both fit under the daily limit by reading the same total.
#[derive(Debug, Clone, Default)]
pub struct InFlightSpend {
    window: Arc<AsyncMutex<()>>,
    pending: Arc<Mutex<HashMap<String, f64>>>,
}

impl InFlightSpend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held from the spent-today read until the run is charged or blocked.
    pub async fn window(&self) -> OwnedMutexGuard<()> {
        self.window.clone().lock_owned().await
    }

    pub fn pending_usd(&self) -> f64 {
        let pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.values().sum()
    }

    /// The charge is released when the returned guard drops, which must be
    /// after the run's evidence record is durable.
    pub fn charge(&self, run_id: &str, amount_usd: f64) -> SpendCharge {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.insert(run_id.to_string(), amount_usd);
        SpendCharge {
            pending: self.pending.clone(),
            run_id: run_id.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SpendCharge {
    pending: Arc<Mutex<HashMap<String, f64>>>,
    run_id: String,
}

impl Drop for SpendCharge {
    fn drop(&mut self) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.remove(&self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{codes, ErrorCategory};
    use crate::normalizer::{IntentInput, IntentNormalizer};
    use serde_json::json;

    fn intent(amount_usd: u64) -> Intent {
        IntentNormalizer::new()
            .normalize(
                "evm:sepolia",
                &IntentInput::new("transfer.native")
                    .with_field("to", format!("0x{}", "5".repeat(40)))
                    .with_field("amountNative", 1)
                    .with_field("amountUsd", amount_usd),
            )
            .unwrap()
    }

    fn receipt(c: char, before: u64, after: u64) -> BroadcastReceipt {
        BroadcastReceipt {
            hash: format!("0x{}", c.to_string().repeat(64)),
            emitted_events: vec![format!("Step{c}")],
            state_delta: Some(StateDelta::new(json!({"nonce": before}), json!({"nonce": after}))),
        }
    }

    #[tokio::test]
    async fn executed_record_aggregates_receipts() {
        let recorder = EvidenceRecorder::new(EvidenceStore::memory());
        let intent = intent(40);
        let receipts = vec![receipt('a', 1, 2), receipt('b', 2, 3)];
        let outcome = ExecutionOutcome::succeeded(receipts.iter().map(|r| r.hash.clone()).collect());

        let written = recorder
            .record(&EvidenceInput {
                run_id: "run-ev-1",
                intent: &intent,
                decision: EvidenceDecision::Executed,
                outcome: Some(&outcome),
                receipts: &receipts,
                blockers: &[],
                policy_version: "ledgergate-policy-v1",
                transition: None,
            })
            .await
            .unwrap();

        let record = &written.record;
        assert_eq!(record.schema_version, SCHEMA_TX_RECEIPT_V1);
        assert_eq!(record.tx_hash.as_deref(), Some(receipts[1].hash.as_str()));
        assert_eq!(record.emitted_events, vec!["Stepa", "Stepb"]);
        let delta = record.state_delta.as_ref().unwrap();
        assert_eq!(delta.previous_state, json!({"nonce": 1}));
        assert_eq!(delta.next_state, json!({"nonce": 3}));
        assert!(record.detail.is_none());

        let latest = recorder.latest().await.unwrap().unwrap();
        assert_eq!(latest.entry_hash, written.entry_hash);
        assert!(recorder.verify_chain().await);
    }

    #[tokio::test]
    async fn blocked_attempts_are_recorded_but_not_counted_as_spend() {
        let recorder = EvidenceRecorder::new(EvidenceStore::memory());
        let intent = intent(300);
        let blocker = Blocker::new(
            codes::SPEND_CAP_EXCEEDED,
            ErrorCategory::Policy,
            "over cap",
            "reduce-amount",
        );
        let outcome = ExecutionOutcome::succeeded(vec![]);

        recorder
            .record(&EvidenceInput {
                run_id: "run-ev-2",
                intent: &intent,
                decision: EvidenceDecision::Blocked,
                outcome: None,
                receipts: &[],
                blockers: std::slice::from_ref(&blocker),
                policy_version: "ledgergate-policy-v1",
                transition: None,
            })
            .await
            .unwrap();
        recorder
            .record(&EvidenceInput {
                run_id: "run-ev-3",
                intent: &intent,
                decision: EvidenceDecision::Executed,
                outcome: Some(&outcome),
                receipts: &[],
                blockers: &[],
                policy_version: "ledgergate-policy-v1",
                transition: None,
            })
            .await
            .unwrap();

        assert_eq!(recorder.len().await, 2);
        assert_eq!(recorder.spent_today_usd(Utc::now()).await.unwrap(), 300.0);
        let history = recorder.history("run-ev-2").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].record.blockers, vec![blocker]);
    }

    #[tokio::test]
    async fn cycle_runs_use_the_autonomous_schema() {
        let recorder = EvidenceRecorder::new(EvidenceStore::memory());
        let intent = intent(1);
        let transition = VerifiedTransition {
            tx_hash: format!("0x{}", "c".repeat(64)),
            cycle_id: "cycle-1".to_string(),
            transition_id: "t-1".to_string(),
            event_name: None,
            emitted_events: Vec::new(),
            state_delta: StateDelta::new(json!({"epoch": 1}), json!({"epoch": 2})),
        };
        let outcome = ExecutionOutcome::failed(vec![], "rpc unavailable");

        let written = recorder
            .record(&EvidenceInput {
                run_id: "run-ev-4",
                intent: &intent,
                decision: EvidenceDecision::Failed,
                outcome: Some(&outcome),
                receipts: &[],
                blockers: &[],
                policy_version: "ledgergate-policy-v1",
                transition: Some(&transition),
            })
            .await
            .unwrap();

        assert_eq!(written.record.schema_version, SCHEMA_AUTONOMOUS_CYCLE_V2);
        assert_eq!(written.record.detail.as_deref(), Some("rpc unavailable"));
        assert_eq!(written.record.cycle_transition, Some(transition));
    }

    #[tokio::test]
    async fn in_flight_spend_is_released_when_the_charge_drops() {
        let spend = InFlightSpend::new();
        let window = spend.window().await;
        let first = spend.charge("run-ev-5", 60.0);
        let second = spend.charge("run-ev-6", 15.5);
        drop(window);
        assert_eq!(spend.pending_usd(), 75.5);

        drop(first);
        assert_eq!(spend.pending_usd(), 15.5);
        drop(second);
        assert_eq!(spend.pending_usd(), 0.0);
    }

    #[tokio::test]
    async fn spend_window_admits_one_checker_at_a_time() {
        let spend = InFlightSpend::new();
        let held = spend.window().await;

        let contender = {
            let spend = spend.clone();
            tokio::spawn(async move {
                let _window = spend.window().await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.unwrap();
    }
}
