use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error class used for blockers and for mapping outcomes to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Input,
    Confirmation,
    Policy,
    Idempotency,
    Adapter,
    Integrity,
    Internal,
}

impl ErrorCategory {
    pub fn name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Confirmation => "confirmation",
            Self::Policy => "policy",
            Self::Idempotency => "idempotency",
            Self::Adapter => "adapter",
            Self::Integrity => "integrity",
            Self::Internal => "internal",
        }
    }

    /// Adapter failures may clear on their own; every other class needs a
    /// different request or a config change.
    pub fn retryable(self) -> bool {
        matches!(self, Self::Adapter)
    }
}

/// Machine-readable blocker and error codes.
pub mod codes {
    pub const MISSING_FIELD: &str = "missing-field";
    pub const INVALID_FIELD: &str = "invalid-field";
    pub const UNKNOWN_FIELD: &str = "unknown-field";
    pub const UNKNOWN_INTENT_KIND: &str = "unknown-intent-kind";
    pub const INVALID_NETWORK: &str = "invalid-network";
    pub const RUN_ID_REQUIRED: &str = "run-id-required";

    pub const SESSION_NOT_FOUND: &str = "session-not-found";
    pub const SESSION_CLOSED: &str = "session-closed";
    pub const SESSION_INTENT_MISMATCH: &str = "session-intent-mismatch";
    pub const SESSION_NETWORK_MISMATCH: &str = "session-network-mismatch";

    pub const CONFIRM_TOKEN_MISSING: &str = "confirm-token-missing";
    pub const CONFIRM_TOKEN_EXPIRED: &str = "confirm-token-expired";
    pub const CONFIRM_TOKEN_NETWORK_MISMATCH: &str = "confirm-token-network-mismatch";
    pub const CONFIRM_TOKEN_TAMPER_DETECTED: &str = "confirm-token-tamper-detected";
    pub const CONFIRM_TOKEN_UNDECODABLE: &str = "confirm-token-undecodable";
    pub const EXECUTION_AUTHORITY_DENIED: &str = "execution-authority-denied";

    pub const PRODUCTION_CONFIRMATION_REQUIRED: &str = "production-confirmation-required";
    pub const SPEND_CAP_EXCEEDED: &str = "spend-cap-exceeded";
    pub const SPEND_CAP_UNPRICED: &str = "spend-cap-unpriced";
    pub const ALLOWLIST_VIOLATION: &str = "allowlist-violation";
    pub const AUTONOMOUS_CYCLE_CONFIG_MISSING: &str = "AUTONOMOUS_CYCLE_CONFIG_MISSING";
    pub const AUTONOMOUS_EXTERNAL_TRIGGER_BLOCKED: &str = "AUTONOMOUS_EXTERNAL_TRIGGER_BLOCKED";
    pub const AUTONOMOUS_EXECUTE_BINDING_NOT_READY: &str = "AUTONOMOUS_EXECUTE_BINDING_NOT_READY";

    pub const IDEMPOTENCY_CONFLICT: &str = "idempotency-conflict";
    pub const IDEMPOTENCY_IN_DOUBT: &str = "idempotency-in-doubt";

    pub const CYCLE_PROOF_TX_HASH_INVALID: &str = "CYCLE_PROOF_TX_HASH_INVALID";
    pub const CYCLE_PROOF_CYCLE_ID_MISSING: &str = "CYCLE_PROOF_CYCLE_ID_MISSING";
    pub const CYCLE_PROOF_TRANSITION_ID_MISSING: &str = "CYCLE_PROOF_TRANSITION_ID_MISSING";
    pub const CYCLE_PROOF_STATE_DELTA_MISSING: &str = "CYCLE_PROOF_STATE_DELTA_MISSING";
    pub const CYCLE_PROOF_CYCLE_ID_MISMATCH: &str = "CYCLE_PROOF_CYCLE_ID_MISMATCH";

    pub const ADAPTER_NOT_FOUND: &str = "adapter-not-found";
    pub const ADAPTER_FAILURE: &str = "adapter-failure";
    pub const ADAPTER_TIMEOUT: &str = "adapter-timeout";
    pub const INTEGRITY_VIOLATION: &str = "integrity-violation";
    pub const STORAGE_FAILURE: &str = "storage-failure";
    pub const SERIALIZATION_FAILURE: &str = "serialization-failure";
}

/// ledgergate runtime errors.
#[derive(Debug, Error)]
pub enum LedgerGateError {
    #[error("Invalid input [{code}]: {message}")]
    Input { code: &'static str, message: String },

    #[error("No adapter registered for ledger family '{0}'")]
    AdapterNotFound(String),

    #[error("Adapter '{adapter}' failed: {message}")]
    Adapter { adapter: String, message: String },

    #[error("Adapter '{adapter}' timed out after {millis}ms during {operation}")]
    Timeout {
        adapter: String,
        operation: &'static str,
        millis: u64,
    },

    #[error("Integrity violation [{code}]: {message}")]
    Integrity { code: &'static str, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LedgerGateError {
    pub fn input(code: &'static str, message: impl Into<String>) -> Self {
        Self::Input {
            code,
            message: message.into(),
        }
    }

    pub fn missing_field(field: &str, kind: &str) -> Self {
        Self::input(
            codes::MISSING_FIELD,
            format!("missing required field '{field}' for {kind}"),
        )
    }

    pub fn integrity(code: &'static str, message: impl Into<String>) -> Self {
        Self::Integrity {
            code,
            message: message.into(),
        }
    }

    pub fn phase_violation(expected: &str, actual: &str) -> Self {
        Self::integrity(
            codes::INTEGRITY_VIOLATION,
            format!("phase order violation: cannot move from '{actual}' to '{expected}'"),
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Input { code, .. } | Self::Integrity { code, .. } => code,
            Self::AdapterNotFound(_) => codes::ADAPTER_NOT_FOUND,
            Self::Adapter { .. } => codes::ADAPTER_FAILURE,
            Self::Timeout { .. } => codes::ADAPTER_TIMEOUT,
            Self::Storage(_) => codes::STORAGE_FAILURE,
            Self::Serialization(_) => codes::SERIALIZATION_FAILURE,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            // An unsupported family is a caller problem, not a ledger outage.
            Self::Input { .. } | Self::AdapterNotFound(_) => ErrorCategory::Input,
            Self::Adapter { .. } | Self::Timeout { .. } => ErrorCategory::Adapter,
            Self::Integrity { .. } => ErrorCategory::Integrity,
            Self::Storage(_) | Self::Serialization(_) => ErrorCategory::Internal,
        }
    }

    pub fn retryable(&self) -> bool {
        self.category().retryable()
    }

    /// Structured `{code, retryable, category, message}` form.
    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            code: self.code().to_string(),
            retryable: self.retryable(),
            category: self.category(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for LedgerGateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Serializable error surfaced to callers and thin wrappers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredError {
    pub code: String,
    pub retryable: bool,
    pub category: ErrorCategory,
    pub message: String,
}
