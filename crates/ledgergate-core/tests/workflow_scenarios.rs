//! End-to-end workflow scenarios against an in-process mock ledger.

use async_trait::async_trait;
use ledgergate_core::error::codes;
use ledgergate_core::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct MockLedger {
    broadcasts: AtomicUsize,
    delay: Option<Duration>,
}

impl MockLedger {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            broadcasts: AtomicUsize::new(0),
            delay: None,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            broadcasts: AtomicUsize::new(0),
            delay: Some(delay),
        })
    }

    fn broadcasts(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerAdapter for MockLedger {
    fn family(&self) -> LedgerFamily {
        LedgerFamily::Evm
    }

    async fn build_steps(&self, intent: &Intent) -> Result<Vec<Step>, LedgerGateError> {
        Ok(vec![Step {
            index: 0,
            action: intent.kind.name().to_string(),
            payload: json!(intent.fields),
        }])
    }

    async fn simulate(&self, _intent: &Intent) -> Result<SimulationResult, LedgerGateError> {
        Ok(SimulationResult {
            ok: true,
            warnings: Vec::new(),
            estimated_fee: Some("21000".to_string()),
            state_delta: None,
            logs: vec!["eth_call ok".to_string()],
        })
    }

    async fn broadcast(&self, step: &Step) -> Result<BroadcastReceipt, LedgerGateError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.broadcasts.fetch_add(1, Ordering::SeqCst);
        let digest = blake3::hash(format!("{}:{n}", step.payload).as_bytes());
        Ok(BroadcastReceipt {
            hash: format!("0x{}", digest.to_hex()),
            emitted_events: vec!["Transfer".to_string()],
            state_delta: Some(StateDelta::new(json!({"nonce": n}), json!({"nonce": n + 1}))),
        })
    }

    async fn read_state(&self, _query: &StateQuery) -> Result<Value, LedgerGateError> {
        Ok(json!({"balance": "100"}))
    }
}

/// Reserves normally but cannot write the terminal line.
struct UnwritableCompletion {
    inner: MemoryIdempotencyStore,
}

#[async_trait]
impl IdempotencyStore for UnwritableCompletion {
    fn backend_label(&self) -> &'static str {
        "unwritable-completion"
    }

    async fn reserve(&self, run_id: &str) -> Result<Reservation, LedgerGateError> {
        self.inner.reserve(run_id).await
    }

    async fn complete(
        &self,
        _run_id: &str,
        _outcome: &ExecutionOutcome,
    ) -> Result<IdempotencyRecord, LedgerGateError> {
        Err(LedgerGateError::Storage("disk full".to_string()))
    }

    async fn history(&self, run_id: &str) -> Result<Vec<IdempotencyRecord>, LedgerGateError> {
        self.inner.history(run_id).await
    }
}

fn engine_with(ledger: Arc<MockLedger>, config: EngineConfig) -> WorkflowEngine {
    WorkflowEngine::with_storage(
        PolicyConfig::default(),
        config,
        AdapterRegistry::new().with(ledger),
        Storage::memory(),
    )
}

fn engine(ledger: Arc<MockLedger>) -> WorkflowEngine {
    engine_with(ledger, EngineConfig::default())
}

fn transfer(amount_usd: u64) -> IntentInput {
    IntentInput::new("transfer.native")
        .with_field("to", "0xAbC0000000000000000000000000000000000001")
        .with_field("amountNative", 1)
        .with_field("amountUsd", amount_usd)
}

async fn analyse(engine: &WorkflowEngine, network: &str, intent: IntentInput) -> WorkflowResponse {
    engine
        .run_workflow(WorkflowRequest::new(WorkflowPhase::Analysis, network, intent))
        .await
        .unwrap()
}

fn execute_after(analysis: &WorkflowResponse, network: &str, intent: IntentInput) -> WorkflowRequest {
    WorkflowRequest::new(WorkflowPhase::Execute, network, intent)
        .with_run_id(&analysis.run_id)
        .with_confirm_token(analysis.confirm_token.clone().unwrap())
}

fn cycle_proof(cycle_id: &str) -> CycleProof {
    CycleProof {
        tx_hash: Some(format!("0x{}", "7e".repeat(32))),
        cycle_id: Some(cycle_id.to_string()),
        transition_id: Some("transition-3".to_string()),
        event_name: Some("CycleAdvanced".to_string()),
        emitted_events: vec!["CycleAdvanced".to_string()],
        state_delta: Some(StateDelta::new(json!({"epoch": 2}), json!({"epoch": 3}))),
    }
}

fn autonomous_config(cycle_id: &str) -> EngineConfig {
    EngineConfig {
        autonomous: AutonomousSettings {
            enabled: true,
            cycle_id: Some(cycle_id.to_string()),
            cycle_interval_secs: Some(600),
            execute_binding: ExecuteBindingState::Active,
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn scenario_a_analysis_on_test_network() {
    let engine = engine(MockLedger::new());
    let response = analyse(&engine, "evm:sepolia", transfer(10)).await;

    assert_eq!(response.status, WorkflowStatus::Ready);
    assert_eq!(response.phase, WorkflowPhase::Analysis);
    assert!(!response.confirm_token_required);
    assert!(response.blockers.is_empty());
    assert_eq!(response.exit_code(), 0);

    let session = engine.sessions().get(&response.run_id).await.unwrap();
    assert_eq!(session.phase, WorkflowPhase::Analysis);
    assert_eq!(
        session.intent.field("to"),
        Some("0xabc0000000000000000000000000000000000001")
    );
}

#[tokio::test]
async fn scenario_b_guarded_network_needs_production_confirmation() {
    let ledger = MockLedger::new();
    let engine = engine(ledger.clone());
    let analysis = analyse(&engine, "evm:mainnet", transfer(100)).await;
    assert!(analysis.confirm_token_required);

    let response = engine
        .run_workflow(execute_after(&analysis, "evm:mainnet", transfer(100)))
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Blocked);
    assert_eq!(response.blocker_codes(), vec![codes::PRODUCTION_CONFIRMATION_REQUIRED]);
    assert_eq!(response.blockers[0].category, ErrorCategory::Confirmation);
    assert!(response.blockers[0].remediation.contains("confirmProduction"));
    assert_eq!(response.exit_code(), 2);
    assert_eq!(ledger.broadcasts(), 0);

    let evidence = response.evidence.unwrap();
    assert_eq!(evidence.record.decision, EvidenceDecision::Blocked);
    assert_eq!(evidence.record.schema_version, SCHEMA_TX_RECEIPT_V1);
}

#[tokio::test]
async fn scenario_c_spend_cap_exceeded() {
    let ledger = MockLedger::new();
    let engine = engine(ledger.clone());
    let analysis = analyse(&engine, "evm:mainnet", transfer(6_000)).await;

    let response = engine
        .run_workflow(execute_after(&analysis, "evm:mainnet", transfer(6_000)).confirm_production())
        .await
        .unwrap();

    assert_eq!(response.blocker_codes(), vec![codes::SPEND_CAP_EXCEEDED]);
    let blocker = &response.blockers[0];
    assert_eq!(blocker.category, ErrorCategory::Policy);
    assert!(blocker.reason.contains("6000.00"));
    assert!(blocker.reason.contains("5000.00"));
    assert_eq!(response.policy.unwrap().actions, vec!["reduce-amount"]);
    assert_eq!(ledger.broadcasts(), 0);
}

#[tokio::test]
async fn scenario_d_external_trigger_blocked_in_autonomous_mode() {
    let ledger = MockLedger::new();
    let engine = engine_with(ledger.clone(), autonomous_config("cycle-3"));
    let analysis = analyse(&engine, "evm:sepolia", transfer(10)).await;

    let response = engine
        .run_workflow(
            execute_after(&analysis, "evm:sepolia", transfer(10)).with_trigger(TriggerKind::External),
        )
        .await
        .unwrap();

    assert_eq!(
        response.blocker_codes(),
        vec![codes::AUTONOMOUS_EXTERNAL_TRIGGER_BLOCKED]
    );
    assert!(response.blockers[0].remediation.contains("deterministic-cycle"));
    assert_eq!(ledger.broadcasts(), 0);
}

#[tokio::test]
async fn scenario_e_second_execute_returns_first_outcome() {
    let ledger = MockLedger::new();
    let engine = engine(ledger.clone());
    let analysis = analyse(&engine, "evm:sepolia", transfer(10)).await;
    let request = execute_after(&analysis, "evm:sepolia", transfer(10));

    let first = engine.run_workflow(request.clone()).await.unwrap();
    assert_eq!(first.status, WorkflowStatus::Executed);
    let t1 = first.evidence.unwrap().record.tx_hash.unwrap();

    let second = engine.run_workflow(request).await.unwrap();
    assert_eq!(second.status, WorkflowStatus::Blocked);
    assert!(second.blocker_codes().contains(&codes::IDEMPOTENCY_CONFLICT));
    let previous = second.previous.unwrap();
    assert_eq!(previous.tx_hash.as_deref(), Some(t1.as_str()));
    assert_eq!(previous.status, "succeeded");
    assert_eq!(ledger.broadcasts(), 1);
    assert_eq!(engine.evidence().len().await, 2);
}

#[tokio::test]
async fn concurrent_executes_broadcast_once() {
    let ledger = MockLedger::new();
    let engine = engine(ledger.clone());
    let analysis = analyse(&engine, "evm:sepolia", transfer(10)).await;
    let request = execute_after(&analysis, "evm:sepolia", transfer(10));

    let (a, b) = tokio::join!(
        engine.run_workflow(request.clone()),
        engine.run_workflow(request)
    );
    let mut statuses = vec![a.unwrap().status, b.unwrap().status];
    statuses.sort_by_key(|status| status.name());

    assert_eq!(statuses, vec![WorkflowStatus::Blocked, WorkflowStatus::Executed]);
    assert_eq!(ledger.broadcasts(), 1);
}

#[tokio::test]
async fn all_execute_blockers_are_reported_together() {
    let engine = engine(MockLedger::new());
    let analysis = analyse(&engine, "evm:mainnet", transfer(6_000)).await;

    let response = engine
        .run_workflow(
            WorkflowRequest::new(WorkflowPhase::Execute, "evm:mainnet", transfer(6_000))
                .with_run_id(&analysis.run_id),
        )
        .await
        .unwrap();

    assert_eq!(
        response.blocker_codes(),
        vec![
            codes::CONFIRM_TOKEN_MISSING,
            codes::PRODUCTION_CONFIRMATION_REQUIRED,
            codes::SPEND_CAP_EXCEEDED,
        ]
    );
}

#[tokio::test]
async fn deterministic_cycle_run_executes_with_v2_evidence() {
    let ledger = MockLedger::new();
    let engine = engine_with(ledger.clone(), autonomous_config("cycle-3"));
    let analysis = analyse(&engine, "evm:sepolia", transfer(10)).await;

    let response = engine
        .run_workflow(
            execute_after(&analysis, "evm:sepolia", transfer(10))
                .with_trigger(TriggerKind::DeterministicCycle)
                .with_cycle_proof(cycle_proof("cycle-3")),
        )
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Executed, "{:?}", response.blockers);
    assert_eq!(
        response.artifacts.transition.as_ref().unwrap().transition_id,
        "transition-3"
    );
    assert_eq!(
        response.evidence.unwrap().record.schema_version,
        SCHEMA_AUTONOMOUS_CYCLE_V2
    );
}

#[tokio::test]
async fn wrong_cycle_proof_blocks_deterministic_run() {
    let ledger = MockLedger::new();
    let engine = engine_with(ledger.clone(), autonomous_config("cycle-3"));
    let analysis = analyse(&engine, "evm:sepolia", transfer(10)).await;

    let response = engine
        .run_workflow(
            execute_after(&analysis, "evm:sepolia", transfer(10))
                .with_trigger(TriggerKind::DeterministicCycle)
                .with_cycle_proof(cycle_proof("cycle-2")),
        )
        .await
        .unwrap();

    assert_eq!(response.blocker_codes(), vec![codes::CYCLE_PROOF_CYCLE_ID_MISMATCH]);
    assert_eq!(response.blockers[0].category, ErrorCategory::Integrity);
    assert_eq!(ledger.broadcasts(), 0);
}

#[tokio::test]
async fn broadcast_timeout_fails_the_run() {
    let ledger = MockLedger::slow(Duration::from_millis(500));
    let engine = engine_with(
        ledger,
        EngineConfig {
            broadcast_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        },
    );
    let analysis = analyse(&engine, "evm:sepolia", transfer(10)).await;

    let response = engine
        .run_workflow(execute_after(&analysis, "evm:sepolia", transfer(10)))
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Failed);
    assert_eq!(response.blocker_codes(), vec![codes::ADAPTER_TIMEOUT]);
    assert_eq!(response.exit_code(), 1);
    let previous = engine
        .idempotency()
        .previous(&analysis.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(previous.status, "failed");
}

#[tokio::test]
async fn daily_limit_counts_durable_spend() {
    let ledger = MockLedger::new();
    let engine = WorkflowEngine::with_storage(
        PolicyConfig {
            daily_limit_usd: Some(1_000.0),
            ..PolicyConfig::default()
        },
        EngineConfig::default(),
        AdapterRegistry::new().with(ledger.clone()),
        Storage::memory(),
    );

    let first = analyse(&engine, "evm:sepolia", transfer(700)).await;
    let executed = engine
        .run_workflow(execute_after(&first, "evm:sepolia", transfer(700)))
        .await
        .unwrap();
    assert_eq!(executed.status, WorkflowStatus::Executed);

    let second = analyse(&engine, "evm:sepolia", transfer(400)).await;
    let blocked = engine
        .run_workflow(execute_after(&second, "evm:sepolia", transfer(400)))
        .await
        .unwrap();
    assert_eq!(blocked.blocker_codes(), vec![codes::SPEND_CAP_EXCEEDED]);
    assert!(blocked.blockers[0].reason.contains("dailyLimitUsd"));
}

#[tokio::test]
async fn concurrent_runs_share_the_daily_limit() {
    let ledger = MockLedger::slow(Duration::from_millis(50));
    let engine = WorkflowEngine::with_storage(
        PolicyConfig {
            daily_limit_usd: Some(100.0),
            ..PolicyConfig::default()
        },
        EngineConfig::default(),
        AdapterRegistry::new().with(ledger.clone()),
        Storage::memory(),
    );

    let first = analyse(&engine, "evm:sepolia", transfer(60)).await;
    let second = analyse(&engine, "evm:sepolia", transfer(60)).await;
    let (a, b) = tokio::join!(
        engine.run_workflow(execute_after(&first, "evm:sepolia", transfer(60))),
        engine.run_workflow(execute_after(&second, "evm:sepolia", transfer(60)))
    );
    let mut responses = vec![a.unwrap(), b.unwrap()];
    responses.sort_by_key(|response| response.status.name());

    assert_eq!(responses[0].status, WorkflowStatus::Blocked);
    assert_eq!(responses[0].blocker_codes(), vec![codes::SPEND_CAP_EXCEEDED]);
    assert_eq!(responses[1].status, WorkflowStatus::Executed);
    assert_eq!(ledger.broadcasts(), 1);
    assert_eq!(engine.evidence().spent_today_usd(chrono::Utc::now()).await.unwrap(), 60.0);
}

#[tokio::test]
async fn failed_completion_still_leaves_evidence() {
    let ledger = MockLedger::new();
    let storage = Storage {
        evidence: EvidenceStore::memory(),
        idempotency: Arc::new(UnwritableCompletion {
            inner: MemoryIdempotencyStore::new(),
        }),
        sessions: Arc::new(MemorySessionStore::new()),
    };
    let engine = WorkflowEngine::with_storage(
        PolicyConfig::default(),
        EngineConfig::default(),
        AdapterRegistry::new().with(ledger.clone()),
        storage,
    );

    let analysis = analyse(&engine, "evm:sepolia", transfer(10)).await;
    let err = engine
        .run_workflow(execute_after(&analysis, "evm:sepolia", transfer(10)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::STORAGE_FAILURE);
    assert_eq!(ledger.broadcasts(), 1);

    let history = engine.evidence().history(&analysis.run_id).await.unwrap();
    assert_eq!(history.len(), 1);
    let record = &history[0].record;
    assert_eq!(record.decision, EvidenceDecision::Executed);
    assert_eq!(record.tx_hashes.len(), 1);
    assert!(record.blockers.iter().any(|b| b.code == codes::STORAGE_FAILURE));

    let session = engine.sessions().get(&analysis.run_id).await.unwrap();
    assert!(session.closed);

    // The run stays reserved, so a replay reports it as in doubt.
    let replay = engine
        .run_workflow(execute_after(&analysis, "evm:sepolia", transfer(10)))
        .await
        .unwrap();
    assert!(replay.blocker_codes().contains(&codes::IDEMPOTENCY_IN_DOUBT));
    assert_eq!(ledger.broadcasts(), 1);
}

#[tokio::test]
async fn file_storage_keeps_runs_terminal_across_restarts() {
    let dir = std::env::temp_dir().join(format!("ledgergate-scenario-{}", Uuid::new_v4()));
    let config = EngineConfig {
        storage: StorageConfig::file(&dir),
        ..EngineConfig::default()
    };

    let ledger = MockLedger::new();
    let adapters = AdapterRegistry::new().with(ledger.clone());
    let first_engine = WorkflowEngine::bootstrap(PolicyConfig::default(), config.clone(), adapters.clone())
        .await
        .unwrap();
    let analysis = analyse(&first_engine, "evm:sepolia", transfer(10)).await;
    let executed = first_engine
        .run_workflow(execute_after(&analysis, "evm:sepolia", transfer(10)))
        .await
        .unwrap();
    let t1 = executed.evidence.unwrap().record.tx_hash.unwrap();
    drop(first_engine);

    let restarted = WorkflowEngine::bootstrap(PolicyConfig::default(), config, adapters)
        .await
        .unwrap();
    let reanalysis = restarted
        .run_workflow(
            WorkflowRequest::new(WorkflowPhase::Analysis, "evm:sepolia", transfer(10))
                .with_run_id(&analysis.run_id),
        )
        .await
        .unwrap();
    assert_eq!(reanalysis.blocker_codes(), vec![codes::SESSION_CLOSED]);
    assert!(reanalysis.confirm_token.is_none());

    let retry = restarted
        .run_workflow(execute_after(&analysis, "evm:sepolia", transfer(10)))
        .await
        .unwrap();

    assert_eq!(
        retry.blocker_codes(),
        vec![codes::SESSION_CLOSED, codes::IDEMPOTENCY_CONFLICT]
    );
    assert_eq!(retry.previous.unwrap().tx_hash, Some(t1));
    assert_eq!(ledger.broadcasts(), 1);
    assert_eq!(restarted.evidence().len().await, 2);
    assert!(restarted.evidence().verify_chain().await);
    assert!(dir.join("evidence-latest.json").exists());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn file_storage_resumes_a_run_in_a_new_process() {
    let dir = std::env::temp_dir().join(format!("ledgergate-resume-{}", Uuid::new_v4()));
    let config = EngineConfig {
        storage: StorageConfig::file(&dir),
        ..EngineConfig::default()
    };
    let ledger = MockLedger::new();
    let adapters = AdapterRegistry::new().with(ledger.clone());

    let analysing = WorkflowEngine::bootstrap(PolicyConfig::default(), config.clone(), adapters.clone())
        .await
        .unwrap();
    let analysis = analyse(&analysing, "evm:sepolia", transfer(10)).await;
    drop(analysing);

    let executing = WorkflowEngine::bootstrap(PolicyConfig::default(), config, adapters)
        .await
        .unwrap();
    let executed = executing
        .run_workflow(execute_after(&analysis, "evm:sepolia", transfer(10)))
        .await
        .unwrap();

    assert_eq!(executed.status, WorkflowStatus::Executed);
    assert_eq!(ledger.broadcasts(), 1);
    assert!(dir.join("sessions.json").exists());

    let _ = std::fs::remove_dir_all(dir);
}

/// Runs only when `LEDGERGATE_TEST_DATABASE_URL` points at a scratch database.
#[tokio::test]
async fn postgres_storage_resumes_a_run_in_a_new_process() {
    let Ok(database_url) = std::env::var("LEDGERGATE_TEST_DATABASE_URL") else {
        return;
    };
    let config = EngineConfig {
        storage: StorageConfig::postgres(database_url, 2),
        ..EngineConfig::default()
    };
    let ledger = MockLedger::new();
    let adapters = AdapterRegistry::new().with(ledger.clone());

    let analysing = WorkflowEngine::bootstrap(PolicyConfig::default(), config.clone(), adapters.clone())
        .await
        .unwrap();
    let analysis = analyse(&analysing, "evm:sepolia", transfer(10)).await;
    drop(analysing);

    let executing = WorkflowEngine::bootstrap(PolicyConfig::default(), config.clone(), adapters.clone())
        .await
        .unwrap();
    let executed = executing
        .run_workflow(execute_after(&analysis, "evm:sepolia", transfer(10)))
        .await
        .unwrap();
    assert_eq!(executed.status, WorkflowStatus::Executed);
    drop(executing);

    let reopened = WorkflowEngine::bootstrap(PolicyConfig::default(), config, adapters)
        .await
        .unwrap();
    let session = reopened.sessions().get(&analysis.run_id).await.unwrap();
    assert!(session.closed);
    assert_eq!(session.phase, WorkflowPhase::Execute);
    assert_eq!(ledger.broadcasts(), 1);
}
