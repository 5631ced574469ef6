use crate::error::{codes, ErrorCategory};
use crate::intent::LedgerFamily;
use crate::types::{Blocker, StateDelta};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Caller-supplied evidence that an on-chain cycle transition happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CycleProof {
    pub tx_hash: Option<String>,
    pub cycle_id: Option<String>,
    pub transition_id: Option<String>,
    pub event_name: Option<String>,
    pub emitted_events: Vec<String>,
    pub state_delta: Option<StateDelta>,
}

/// A transition that passed every check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedTransition {
    pub tx_hash: String,
    pub cycle_id: String,
    pub transition_id: String,
    pub event_name: Option<String>,
    pub emitted_events: Vec<String>,
    pub state_delta: StateDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerVerification {
    pub verifiable: bool,
    pub transition: Option<VerifiedTransition>,
    pub blockers: Vec<Blocker>,
}

/// Validates cycle proofs for one ledger family.
#[derive(Debug, Clone)]
pub struct CycleTriggerVerifier {
    family: LedgerFamily,
    required_cycle_id: Option<String>,
}

impl CycleTriggerVerifier {
    pub fn new(family: LedgerFamily) -> Self {
        Self {
            family,
            required_cycle_id: None,
        }
    }

    /// Also require the proof to belong to this cycle.
    pub fn with_required_cycle_id(mut self, cycle_id: impl Into<String>) -> Self {
        self.required_cycle_id = Some(cycle_id.into());
        self
    }

    /// Accumulates one blocker per failing check; never stops early.
    pub fn verify(&self, proof: &CycleProof) -> TriggerVerification {
        let mut blockers = Vec::new();

        let tx_hash = non_empty(&proof.tx_hash).filter(|hash| self.family.is_tx_hash(hash));
        if tx_hash.is_none() {
            blockers.push(proof_blocker(
                codes::CYCLE_PROOF_TX_HASH_INVALID,
                format!(
                    "txHash is missing or not a {} transaction hash ({})",
                    self.family,
                    self.family.tx_hash_format()
                ),
                "supply the txHash of the cycle transition transaction",
            ));
        }

        let cycle_id = non_empty(&proof.cycle_id);
        match (cycle_id, self.required_cycle_id.as_deref()) {
            (None, _) => blockers.push(proof_blocker(
                codes::CYCLE_PROOF_CYCLE_ID_MISSING,
                "cycleId is missing".to_string(),
                "supply the cycleId emitted by the cycle transition",
            )),
            (Some(found), Some(required)) if found != required => {
                blockers.push(proof_blocker(
                    codes::CYCLE_PROOF_CYCLE_ID_MISMATCH,
                    format!("cycleId '{found}' does not match the configured cycle '{required}'"),
                    "use a proof from the configured cycle or fix LEDGERGATE_AUTONOMOUS_CYCLE_ID",
                ))
            }
            _ => {}
        }

        let transition_id = non_empty(&proof.transition_id);
        if transition_id.is_none() {
            blockers.push(proof_blocker(
                codes::CYCLE_PROOF_TRANSITION_ID_MISSING,
                "transitionId is missing".to_string(),
                "supply the transitionId emitted by the cycle transition",
            ));
        }

        let state_delta = proof.state_delta.as_ref().filter(|delta| delta.is_complete());
        if state_delta.is_none() {
            blockers.push(proof_blocker(
                codes::CYCLE_PROOF_STATE_DELTA_MISSING,
                "stateDelta with non-empty previousState and nextState is missing".to_string(),
                "supply the stateDelta read from the transition receipt",
            ));
        }

        debug!(family = %self.family, blockers = blockers.len(), "cycle proof checked");

        let transition = match (tx_hash, cycle_id, transition_id, state_delta) {
            (Some(tx_hash), Some(cycle_id), Some(transition_id), Some(state_delta))
                if blockers.is_empty() =>
            {
                Some(VerifiedTransition {
                    tx_hash: tx_hash.to_string(),
                    cycle_id: cycle_id.to_string(),
                    transition_id: transition_id.to_string(),
                    event_name: non_empty(&proof.event_name).map(str::to_string),
                    emitted_events: proof.emitted_events.clone(),
                    state_delta: state_delta.clone(),
                })
            }
            _ => None,
        };

        TriggerVerification {
            verifiable: transition.is_some(),
            transition,
            blockers,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn proof_blocker(code: &str, reason: String, remediation: &str) -> Blocker {
    Blocker::new(code, ErrorCategory::Integrity, reason, remediation)
}
