use crate::error::{ErrorCategory, LedgerGateError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One reason an operation may not proceed, with the concrete fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blocker {
    pub code: String,
    pub category: ErrorCategory,
    pub reason: String,
    pub remediation: String,
    pub retryable: bool,
}

impl Blocker {
    pub fn new(
        code: impl Into<String>,
        category: ErrorCategory,
        reason: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            category,
            reason: reason.into(),
            remediation: remediation.into(),
            retryable: category.retryable(),
        }
    }

    pub fn from_error(err: &LedgerGateError, remediation: impl Into<String>) -> Self {
        Self {
            code: err.code().to_string(),
            category: err.category(),
            reason: err.to_string(),
            remediation: remediation.into(),
            retryable: err.retryable(),
        }
    }
}

/// Ledger state before and after a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    pub previous_state: Value,
    pub next_state: Value,
}

impl StateDelta {
    pub fn new(previous_state: Value, next_state: Value) -> Self {
        Self {
            previous_state,
            next_state,
        }
    }

    /// Both sides must carry content; null, empty strings and empty
    /// containers do not count.
    pub fn is_complete(&self) -> bool {
        !is_blank(&self.previous_state) && !is_blank(&self.next_state)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Terminal result of one broadcast attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    pub tx_hashes: Vec<String>,
    pub detail: String,
}

impl ExecutionOutcome {
    pub fn succeeded(tx_hashes: Vec<String>) -> Self {
        let detail = format!("{} step(s) broadcast", tx_hashes.len());
        Self {
            success: true,
            tx_hashes,
            detail,
        }
    }

    pub fn failed(tx_hashes: Vec<String>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hashes,
            detail: detail.into(),
        }
    }

    /// Hash of the last submitted step, the one that carries the intent.
    pub fn tx_hash(&self) -> Option<&str> {
        self.tx_hashes.last().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_delta_requires_both_sides() {
        assert!(StateDelta::new(json!({"nonce": 1}), json!({"nonce": 2})).is_complete());
        assert!(!StateDelta::new(json!({}), json!({"nonce": 2})).is_complete());
        assert!(!StateDelta::new(json!("prev"), Value::Null).is_complete());
        assert!(!StateDelta::new(json!("  "), json!("next")).is_complete());
    }

    #[test]
    fn blocker_inherits_retryability_from_category() {
        let blocker = Blocker::new("adapter-timeout", ErrorCategory::Adapter, "slow", "retry");
        assert!(blocker.retryable);
        let blocker = Blocker::new("spend-cap-exceeded", ErrorCategory::Policy, "over", "lower");
        assert!(!blocker.retryable);
    }
}
