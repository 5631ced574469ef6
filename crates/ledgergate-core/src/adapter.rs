use crate::error::LedgerGateError;
use crate::intent::{FieldKind, Intent, LedgerFamily};
use crate::types::StateDelta;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// One ordered, broadcastable unit of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub index: usize,
    pub action: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub ok: bool,
    pub warnings: Vec<String>,
    pub estimated_fee: Option<String>,
    pub state_delta: Option<StateDelta>,
    pub logs: Vec<String>,
}

/// What the ledger reported back for one broadcast step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReceipt {
    pub hash: String,
    pub emitted_events: Vec<String>,
    pub state_delta: Option<StateDelta>,
}

/// Read-only state lookup issued during analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateQuery {
    pub key: String,
    pub params: Value,
}

impl StateQuery {
    pub fn new(key: impl Into<String>, params: Value) -> Self {
        Self {
            key: key.into(),
            params,
        }
    }
}

/// Family-specific ledger integration.
///
/// Adapters hold no workflow state. Every safety decision happens before
/// `broadcast` is called.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    fn family(&self) -> LedgerFamily;

    /// Ordered steps that realize the intent.
    async fn build_steps(&self, intent: &Intent) -> Result<Vec<Step>, LedgerGateError>;

    async fn simulate(&self, intent: &Intent) -> Result<SimulationResult, LedgerGateError>;

    async fn broadcast(&self, step: &Step) -> Result<BroadcastReceipt, LedgerGateError>;

    async fn read_state(&self, query: &StateQuery) -> Result<Value, LedgerGateError>;

    /// Reads performed during analysis. One account lookup per address-like
    /// field plus the network status.
    fn analysis_queries(&self, intent: &Intent) -> Vec<StateQuery> {
        let mut queries: Vec<StateQuery> = intent
            .kind
            .template()
            .iter()
            .filter(|spec| matches!(spec.kind, FieldKind::Address | FieldKind::Contract))
            .filter_map(|spec| {
                intent.field(spec.name).map(|value| {
                    StateQuery::new(
                        "account",
                        json!({ "network": intent.network, "field": spec.name, "address": value }),
                    )
                })
            })
            .collect();
        queries.push(StateQuery::new(
            "network-status",
            json!({ "network": intent.network }),
        ));
        queries
    }
}

/// Registry for ledger adapters, one per family.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<LedgerFamily, Arc<dyn LedgerAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn LedgerAdapter>) {
        self.adapters.insert(adapter.family(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn LedgerAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, family: LedgerFamily) -> Option<Arc<dyn LedgerAdapter>> {
        self.adapters.get(&family).cloned()
    }

    pub fn has(&self, family: LedgerFamily) -> bool {
        self.adapters.contains_key(&family)
    }

    /// `get`, or `AdapterNotFound` naming the family.
    pub fn require(&self, family: LedgerFamily) -> Result<Arc<dyn LedgerAdapter>, LedgerGateError> {
        self.get(family)
            .ok_or_else(|| LedgerGateError::AdapterNotFound(family.to_string()))
    }
}
