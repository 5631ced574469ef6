use crate::adapter::{AdapterRegistry, BroadcastReceipt, LedgerAdapter, SimulationResult, StateQuery, Step};
use crate::config::EngineConfig;
use crate::confirm::{AuthorityVerdict, ConfirmClaims, ConfirmTokenAuthority, ExecutionAuthority};
use crate::error::{codes, ErrorCategory, LedgerGateError};
use crate::evidence::{EvidenceDecision, EvidenceInput, EvidenceReceipt, EvidenceRecorder, InFlightSpend};
use crate::idempotency::{IdempotencyGuard, PreviousAttempt, Reservation};
use crate::intent::Intent;
use crate::normalizer::{IntentInput, IntentNormalizer};
use crate::policy::{PolicyConfig, PolicyDecision, PolicyEngine, PolicyInput, TriggerKind};
use crate::session::{RunLocks, SessionStore, WorkflowPhase};
use crate::storage::Storage;
use crate::trigger::{CycleProof, CycleTriggerVerifier, VerifiedTransition};
use crate::types::{Blocker, ExecutionOutcome};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One `run_workflow` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    #[serde(default)]
    pub run_id: Option<String>,
    pub phase: WorkflowPhase,
    pub network: String,
    pub intent: IntentInput,
    #[serde(default)]
    pub confirm_token: Option<String>,
    #[serde(default)]
    pub confirm_production: bool,
    /// Defaults to `manual`.
    #[serde(default)]
    pub trigger: Option<TriggerKind>,
    #[serde(default)]
    pub cycle_proof: Option<CycleProof>,
}

impl WorkflowRequest {
    pub fn new(phase: WorkflowPhase, network: impl Into<String>, intent: IntentInput) -> Self {
        Self {
            run_id: None,
            phase,
            network: network.into(),
            intent,
            confirm_token: None,
            confirm_production: false,
            trigger: None,
            cycle_proof: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_confirm_token(mut self, token: impl Into<String>) -> Self {
        self.confirm_token = Some(token.into());
        self
    }

    pub fn confirm_production(mut self) -> Self {
        self.confirm_production = true;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerKind) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_cycle_proof(mut self, proof: CycleProof) -> Self {
        self.cycle_proof = Some(proof);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Analysis or simulate finished; the caller may advance.
    Ready,
    Executed,
    Blocked,
    Failed,
}

impl WorkflowStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Executed => "executed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRead {
    pub query: StateQuery,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowArtifacts {
    pub intent: Option<Intent>,
    pub state: Vec<StateRead>,
    pub steps: Vec<Step>,
    pub simulation: Option<SimulationResult>,
    pub receipts: Vec<BroadcastReceipt>,
    pub transition: Option<VerifiedTransition>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResponse {
    pub run_id: String,
    pub phase: WorkflowPhase,
    pub status: WorkflowStatus,
    pub confirm_token: Option<String>,
    pub confirm_token_required: bool,
    pub intent_hash: String,
    pub artifacts: WorkflowArtifacts,
    pub blockers: Vec<Blocker>,
    /// Earlier attempt for this run id, returned verbatim.
    pub previous: Option<PreviousAttempt>,
    pub policy: Option<PolicyDecision>,
    pub evidence: Option<EvidenceReceipt>,
}

impl WorkflowResponse {
    /// `0` ready/executed, `2` blocked, `1` failed.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            WorkflowStatus::Ready | WorkflowStatus::Executed => 0,
            WorkflowStatus::Blocked => 2,
            WorkflowStatus::Failed => 1,
        }
    }

    pub fn blocker_codes(&self) -> Vec<&str> {
        self.blockers.iter().map(|b| b.code.as_str()).collect()
    }
}

/// Exit code for a call that returned an error instead of a response.
pub fn error_exit_code(err: &LedgerGateError) -> i32 {
    match err.category() {
        ErrorCategory::Input => 2,
        _ => 1,
    }
}

/// Generic three-phase workflow engine over the ledger adapter trait.
pub struct WorkflowEngine {
    normalizer: IntentNormalizer,
    sessions: Arc<dyn SessionStore>,
    tokens: ConfirmTokenAuthority,
    policy: PolicyEngine,
    idempotency: IdempotencyGuard,
    evidence: EvidenceRecorder,
    spend: InFlightSpend,
    adapters: AdapterRegistry,
    authority: Option<Arc<dyn ExecutionAuthority>>,
    locks: RunLocks,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Bootstrap storage from `config.storage` and wire every component.
    pub async fn bootstrap(
        policy_config: PolicyConfig,
        config: EngineConfig,
        adapters: AdapterRegistry,
    ) -> Result<Self, LedgerGateError> {
        let storage = Storage::bootstrap(config.storage.clone()).await?;
        Ok(Self::with_storage(policy_config, config, adapters, storage))
    }

    pub fn with_storage(
        policy_config: PolicyConfig,
        config: EngineConfig,
        adapters: AdapterRegistry,
        storage: Storage,
    ) -> Self {
        Self {
            normalizer: IntentNormalizer::new(),
            sessions: storage.sessions,
            tokens: ConfirmTokenAuthority::new(chrono::Duration::seconds(config.token_ttl_secs)),
            policy: PolicyEngine::new(policy_config),
            idempotency: IdempotencyGuard::new(storage.idempotency),
            evidence: EvidenceRecorder::new(storage.evidence),
            spend: InFlightSpend::new(),
            adapters,
            authority: None,
            locks: RunLocks::new(),
            config,
        }
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_execution_authority(mut self, authority: Arc<dyn ExecutionAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn evidence(&self) -> &EvidenceRecorder {
        &self.evidence
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop idle sessions and their unused run locks.
    pub async fn evict_idle_sessions(&self, idle: Duration) -> usize {
        let evicted = self.sessions.evict_idle(idle).await;
        let pruned = self.locks.prune();
        debug!(evicted, pruned, "idle sessions evicted");
        evicted
    }

    /// Run one phase of the workflow.
    ///
    /// Input problems (bad intent, missing run id, unsupported family) are
    /// returned as `Err` before anything is touched. Every other problem is
    /// collected into the response's `blockers`.
    pub async fn run_workflow(
        &self,
        request: WorkflowRequest,
    ) -> Result<WorkflowResponse, LedgerGateError> {
        let intent = self.normalizer.normalize(&request.network, &request.intent)?;
        let adapter = self.adapters.require(intent.family)?;
        debug!(phase = %request.phase, network = %intent.network, kind = %intent.kind, "workflow call");

        match request.phase {
            WorkflowPhase::Analysis => self.analysis(&request, intent, adapter).await,
            WorkflowPhase::Simulate => self.simulate(&request, intent, adapter).await,
            WorkflowPhase::Execute => self.execute(&request, intent, adapter).await,
        }
    }

    async fn analysis(
        &self,
        request: &WorkflowRequest,
        intent: Intent,
        adapter: Arc<dyn LedgerAdapter>,
    ) -> Result<WorkflowResponse, LedgerGateError> {
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let _run = self.locks.acquire(&run_id).await;

        let (_, created) = self.sessions.begin_or_resume(Some(&run_id), &intent).await?;
        if !created {
            if let Err(err) = self
                .sessions
                .advance(&run_id, WorkflowPhase::Analysis, &intent)
                .await
            {
                warn!(run_id = %run_id, code = err.code(), "analysis refused");
                let blocker = Blocker::from_error(&err, session_remediation(err.code()));
                return Ok(self.blocked(&run_id, WorkflowPhase::Analysis, intent, vec![blocker]));
            }
        }

        let (state, warnings) = self.read_analysis_state(adapter.as_ref(), &intent).await;
        let token = self.tokens.issue(&run_id, &intent)?;
        self.sessions.set_confirm_token(&run_id, &token).await?;

        let confirm_token_required = self.policy.config().is_guarded(&intent.network);
        info!(
            run_id = %run_id,
            phase = "analysis",
            network = %intent.network,
            created,
            reads = state.len(),
            warnings = warnings.len(),
            "analysis complete"
        );

        Ok(WorkflowResponse {
            run_id,
            phase: WorkflowPhase::Analysis,
            status: WorkflowStatus::Ready,
            confirm_token: Some(token),
            confirm_token_required,
            intent_hash: intent.intent_hash(),
            artifacts: WorkflowArtifacts {
                intent: Some(intent),
                state,
                warnings,
                ..WorkflowArtifacts::default()
            },
            blockers: Vec::new(),
            previous: None,
            policy: None,
            evidence: None,
        })
    }

    /// Reads run concurrently; each failure becomes a warning.
    async fn read_analysis_state(
        &self,
        adapter: &dyn LedgerAdapter,
        intent: &Intent,
    ) -> (Vec<StateRead>, Vec<String>) {
        let read_timeout = self.config.read_timeout;
        let reads = adapter.analysis_queries(intent).into_iter().map(|query| async move {
            let result = timeout(read_timeout, adapter.read_state(&query)).await;
            (query, result)
        });

        let mut state = Vec::new();
        let mut warnings = Vec::new();
        for (query, result) in join_all(reads).await {
            match result {
                Ok(Ok(value)) => state.push(StateRead { query, value }),
                Ok(Err(err)) => warnings.push(format!("read '{}' failed: {err}", query.key)),
                Err(_) => warnings.push(format!(
                    "read '{}' timed out after {}ms",
                    query.key,
                    read_timeout.as_millis()
                )),
            }
        }
        (state, warnings)
    }

    async fn simulate(
        &self,
        request: &WorkflowRequest,
        intent: Intent,
        adapter: Arc<dyn LedgerAdapter>,
    ) -> Result<WorkflowResponse, LedgerGateError> {
        let run_id = require_run_id(request)?;
        let _run = self.locks.acquire(&run_id).await;

        let session = match self
            .sessions
            .advance(&run_id, WorkflowPhase::Simulate, &intent)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(run_id = %run_id, code = err.code(), "simulate refused");
                let blocker = Blocker::from_error(&err, session_remediation(err.code()));
                return Ok(self.blocked(&run_id, WorkflowPhase::Simulate, intent, vec![blocker]));
            }
        };

        let mut artifacts = WorkflowArtifacts::default();
        let mut blockers = Vec::new();

        match self
            .bounded(adapter.as_ref(), "simulate", self.config.read_timeout, adapter.simulate(&intent))
            .await
        {
            Ok(simulation) => {
                if !simulation.ok {
                    artifacts
                        .warnings
                        .push("adapter reported the simulation as unsuccessful".to_string());
                }
                artifacts.warnings.extend(simulation.warnings.iter().cloned());
                artifacts.simulation = Some(simulation);
            }
            Err(err) => blockers.push(Blocker::from_error(
                &err,
                "retry phase=simulate; the ledger endpoint may be degraded",
            )),
        }

        match self
            .bounded(adapter.as_ref(), "build_steps", self.config.read_timeout, adapter.build_steps(&intent))
            .await
        {
            Ok(steps) => artifacts.steps = steps,
            Err(err) => blockers.push(Blocker::from_error(&err, "retry phase=simulate")),
        }

        let status = if blockers.is_empty() {
            WorkflowStatus::Ready
        } else {
            WorkflowStatus::Failed
        };
        info!(
            run_id = %run_id,
            phase = "simulate",
            network = %intent.network,
            status = status.name(),
            steps = artifacts.steps.len(),
            "simulate complete"
        );

        artifacts.intent = Some(intent.clone());
        Ok(WorkflowResponse {
            run_id,
            phase: WorkflowPhase::Simulate,
            status,
            confirm_token: session.confirm_token,
            confirm_token_required: self.policy.config().is_guarded(&intent.network),
            intent_hash: intent.intent_hash(),
            artifacts,
            blockers,
            previous: None,
            policy: None,
            evidence: None,
        })
    }

    /// Execute pipeline:
    /// 1) Collect every blocker (session, token, policy, cycle proof, idempotency)
    /// 2) Layer-2 authority, then the durable reservation
    /// 3) Sequential broadcast, terminal idempotency entry, one evidence record
    async fn execute(
        &self,
        request: &WorkflowRequest,
        intent: Intent,
        adapter: Arc<dyn LedgerAdapter>,
    ) -> Result<WorkflowResponse, LedgerGateError> {
        let run_id = require_run_id(request)?;
        let _run = self.locks.acquire(&run_id).await;

        let mut blockers = Vec::new();
        let session = self.sessions.get(&run_id).await;

        match session.clone() {
            None => blockers.push(Blocker::new(
                codes::SESSION_NOT_FOUND,
                ErrorCategory::Integrity,
                format!("no session for run '{run_id}'"),
                session_remediation(codes::SESSION_NOT_FOUND),
            )),
            Some(mut trial) => {
                if let Err(err) = trial.transition(WorkflowPhase::Execute, &intent) {
                    blockers.push(Blocker::from_error(&err, session_remediation(err.code())));
                }
            }
        }

        let guarded = self.policy.config().is_guarded(&intent.network);
        let claims = match request
            .confirm_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            Some(token) => {
                let issued = session.as_ref().and_then(|s| s.confirm_token.as_deref());
                self.check_token(token, &run_id, &intent, issued, &mut blockers)
            }
            None if guarded => {
                blockers.push(Blocker::new(
                    codes::CONFIRM_TOKEN_MISSING,
                    ErrorCategory::Confirmation,
                    format!("{} requires a confirm token", intent.network),
                    "run phase=analysis and pass the returned confirmToken",
                ));
                None
            }
            None => None,
        };

        let trigger = request.trigger.unwrap_or_default();
        let autonomous = self.config.autonomous.context(trigger);
        let spend_window = self.spend.window().await;
        let spent_today_usd =
            self.evidence.spent_today_usd(Utc::now()).await? + self.spend.pending_usd();
        let decision = self.policy.evaluate(&PolicyInput {
            intent: &intent,
            confirm_production: request.confirm_production,
            spent_today_usd,
            autonomous: autonomous.as_ref(),
        });
        blockers.extend(decision.blockers.iter().cloned());

        let mut transition = None;
        if autonomous.is_some() && trigger == TriggerKind::DeterministicCycle {
            let mut verifier = CycleTriggerVerifier::new(intent.family);
            if let Some(cycle_id) = &self.config.autonomous.cycle_id {
                verifier = verifier.with_required_cycle_id(cycle_id.clone());
            }
            let verification = verifier.verify(&request.cycle_proof.clone().unwrap_or_default());
            blockers.extend(verification.blockers);
            transition = verification.transition;
        }

        let previous = self.idempotency.previous(&run_id).await?;
        if let Some(previous) = &previous {
            blockers.push(previous.to_blocker());
        }

        if !blockers.is_empty() {
            drop(spend_window);
            return self
                .finish_blocked(&run_id, intent, blockers, previous, decision, transition)
                .await;
        }
        // Counted against the daily cap until the evidence record lands.
        let _charge = self
            .spend
            .charge(&run_id, intent.amount_usd().unwrap_or(0.0));
        drop(spend_window);

        self.sessions
            .advance(&run_id, WorkflowPhase::Execute, &intent)
            .await?;

        if let Some(authority) = &self.authority {
            let verdict = authority.authorize(&run_id, &intent, claims.as_ref()).await;
            let denial = match verdict {
                Ok(AuthorityVerdict::Allow) => None,
                Ok(AuthorityVerdict::Deny { reason }) => Some(reason),
                Err(err) => Some(format!("authority unavailable: {err}")),
            };
            if let Some(reason) = denial {
                warn!(run_id = %run_id, authority = authority.name(), %reason, "execution authority denied");
                let blocker = Blocker::new(
                    codes::EXECUTION_AUTHORITY_DENIED,
                    ErrorCategory::Confirmation,
                    format!("{} denied execution: {reason}", authority.name()),
                    "resolve the denial with the execution authority, then re-run analysis",
                );
                return self
                    .finish_blocked(&run_id, intent, vec![blocker], None, decision, transition)
                    .await;
            }
        }

        if let Reservation::Conflict(previous) = self.idempotency.reserve(&run_id).await? {
            let blocker = previous.to_blocker();
            return self
                .finish_blocked(&run_id, intent, vec![blocker], Some(previous), decision, transition)
                .await;
        }

        let (steps, receipts, failure) = self.broadcast_all(adapter.as_ref(), &run_id, &intent).await;
        let tx_hashes: Vec<String> = receipts.iter().map(|r| r.hash.clone()).collect();
        let outcome = match &failure {
            None => ExecutionOutcome::succeeded(tx_hashes),
            Some(err) => ExecutionOutcome::failed(tx_hashes, err.to_string()),
        };

        let (status, evidence_decision) = if outcome.success {
            (WorkflowStatus::Executed, EvidenceDecision::Executed)
        } else {
            (WorkflowStatus::Failed, EvidenceDecision::Failed)
        };
        let mut blockers: Vec<Blocker> = failure
            .iter()
            .map(|err| {
                Blocker::from_error(
                    err,
                    "check the ledger for partial effects; a retry needs a new runId",
                )
            })
            .collect();

        // The broadcast already happened: its evidence must survive a failed
        // terminal write, and the run stays reserved (in doubt) for replays.
        if let Err(err) = self.idempotency.complete(&run_id, &outcome).await {
            warn!(run_id = %run_id, code = err.code(), error = %err, "idempotency completion failed after broadcast");
            blockers.push(Blocker::from_error(
                &err,
                "reconcile the run against the ledger using the tx hashes in this evidence record",
            ));
            self.evidence
                .record(&EvidenceInput {
                    run_id: &run_id,
                    intent: &intent,
                    decision: evidence_decision,
                    outcome: Some(&outcome),
                    receipts: &receipts,
                    blockers: &blockers,
                    policy_version: &decision.policy_version,
                    transition: transition.as_ref(),
                })
                .await?;
            self.sessions.close(&run_id).await?;
            return Err(err);
        }

        let evidence = self
            .evidence
            .record(&EvidenceInput {
                run_id: &run_id,
                intent: &intent,
                decision: evidence_decision,
                outcome: Some(&outcome),
                receipts: &receipts,
                blockers: &blockers,
                policy_version: &decision.policy_version,
                transition: transition.as_ref(),
            })
            .await?;
        self.sessions.close(&run_id).await?;

        info!(
            run_id = %run_id,
            phase = "execute",
            network = %intent.network,
            status = status.name(),
            tx_hash = outcome.tx_hash().unwrap_or(""),
            "execute complete"
        );

        Ok(WorkflowResponse {
            run_id,
            phase: WorkflowPhase::Execute,
            status,
            confirm_token: None,
            confirm_token_required: guarded,
            intent_hash: intent.intent_hash(),
            artifacts: WorkflowArtifacts {
                intent: Some(intent),
                steps,
                receipts,
                transition,
                ..WorkflowArtifacts::default()
            },
            blockers,
            previous: None,
            policy: Some(decision),
            evidence: Some(evidence),
        })
    }

    fn check_token(
        &self,
        token: &str,
        run_id: &str,
        intent: &Intent,
        issued: Option<&str>,
        blockers: &mut Vec<Blocker>,
    ) -> Option<ConfirmClaims> {
        match self.tokens.verify(token, run_id, intent) {
            // A later analysis replaces the session token; older ones no longer count.
            Ok(_) if issued.is_some_and(|issued| issued != token) => {
                blockers.push(Blocker::new(
                    codes::CONFIRM_TOKEN_TAMPER_DETECTED,
                    ErrorCategory::Confirmation,
                    "confirm token was superseded by a later analysis",
                    "pass the confirmToken returned by the most recent analysis",
                ));
                None
            }
            Ok(claims) => Some(claims),
            Err(rejection) => {
                debug!(run_id, code = rejection.code(), "confirm token rejected");
                blockers.push(rejection.to_blocker());
                None
            }
        }
    }

    /// Steps go out strictly in order; the first failure stops the run.
    async fn broadcast_all(
        &self,
        adapter: &dyn LedgerAdapter,
        run_id: &str,
        intent: &Intent,
    ) -> (Vec<Step>, Vec<BroadcastReceipt>, Option<LedgerGateError>) {
        let steps = match self
            .bounded(adapter, "build_steps", self.config.read_timeout, adapter.build_steps(intent))
            .await
        {
            Ok(steps) => steps,
            Err(err) => return (Vec::new(), Vec::new(), Some(err)),
        };

        let mut receipts = Vec::with_capacity(steps.len());
        for step in &steps {
            match self
                .bounded(adapter, "broadcast", self.config.broadcast_timeout, adapter.broadcast(step))
                .await
            {
                Ok(receipt) => {
                    info!(run_id, step = step.index, action = %step.action, tx_hash = %receipt.hash, "step broadcast");
                    receipts.push(receipt);
                }
                Err(err) => {
                    warn!(run_id, step = step.index, code = err.code(), error = %err, "broadcast failed");
                    return (steps.clone(), receipts, Some(err));
                }
            }
        }
        (steps, receipts, None)
    }

    async fn bounded<T>(
        &self,
        adapter: &dyn LedgerAdapter,
        operation: &'static str,
        limit: Duration,
        call: impl std::future::Future<Output = Result<T, LedgerGateError>>,
    ) -> Result<T, LedgerGateError> {
        match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerGateError::Timeout {
                adapter: adapter.family().to_string(),
                operation,
                millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn finish_blocked(
        &self,
        run_id: &str,
        intent: Intent,
        blockers: Vec<Blocker>,
        previous: Option<PreviousAttempt>,
        decision: PolicyDecision,
        transition: Option<VerifiedTransition>,
    ) -> Result<WorkflowResponse, LedgerGateError> {
        let evidence = self
            .evidence
            .record(&EvidenceInput {
                run_id,
                intent: &intent,
                decision: EvidenceDecision::Blocked,
                outcome: None,
                receipts: &[],
                blockers: &blockers,
                policy_version: &decision.policy_version,
                transition: transition.as_ref(),
            })
            .await?;

        let blocker_codes: Vec<&str> = blockers.iter().map(|b| b.code.as_str()).collect();
        warn!(run_id, phase = "execute", network = %intent.network, blockers = ?blocker_codes, "execute blocked");

        let mut response = self.blocked(run_id, WorkflowPhase::Execute, intent, blockers);
        response.artifacts.transition = transition;
        response.previous = previous;
        response.policy = Some(decision);
        response.evidence = Some(evidence);
        Ok(response)
    }

    fn blocked(
        &self,
        run_id: &str,
        phase: WorkflowPhase,
        intent: Intent,
        blockers: Vec<Blocker>,
    ) -> WorkflowResponse {
        WorkflowResponse {
            run_id: run_id.to_string(),
            phase,
            status: WorkflowStatus::Blocked,
            confirm_token: None,
            confirm_token_required: self.policy.config().is_guarded(&intent.network),
            intent_hash: intent.intent_hash(),
            artifacts: WorkflowArtifacts {
                intent: Some(intent),
                ..WorkflowArtifacts::default()
            },
            blockers,
            previous: None,
            policy: None,
            evidence: None,
        }
    }
}

fn require_run_id(request: &WorkflowRequest) -> Result<String, LedgerGateError> {
    request
        .run_id
        .as_deref()
        .map(str::trim)
        .filter(|run_id| !run_id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            LedgerGateError::input(
                codes::RUN_ID_REQUIRED,
                format!(
                    "phase={} needs the runId returned by phase=analysis",
                    request.phase
                ),
            )
        })
}

fn session_remediation(code: &str) -> &'static str {
    match code {
        codes::SESSION_CLOSED => "this run already finished; start a new run with a fresh runId",
        codes::SESSION_INTENT_MISMATCH | codes::SESSION_NETWORK_MISMATCH => {
            "re-run phase=analysis for the new intent, or resubmit the analysed intent unchanged"
        }
        _ => "run phase=analysis for this runId first",
    }
}
