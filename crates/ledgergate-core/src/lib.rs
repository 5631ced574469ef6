//! LedgerGate core: a safety-gated analysis → simulate → execute pipeline for
//! state-changing operations on multiple ledger families.
//!
//! Every execute call passes session, confirm-token, policy, cycle-proof and
//! idempotency checks before an adapter may broadcast, and every attempt leaves
//! exactly one record in a hash-chained evidence journal.

#![deny(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod confirm;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod idempotency;
pub mod intent;
pub mod journal;
pub mod normalizer;
pub mod policy;
pub mod session;
pub mod storage;
pub mod trigger;
pub mod types;

pub use adapter::{AdapterRegistry, BroadcastReceipt, LedgerAdapter, SimulationResult, StateQuery, Step};
pub use config::{AutonomousSettings, EngineConfig};
pub use confirm::{
    AuthorityVerdict, ConfirmClaims, ConfirmTokenAuthority, ExecutionAuthority, TokenRejection,
};
pub use engine::{
    error_exit_code, StateRead, WorkflowArtifacts, WorkflowEngine, WorkflowRequest,
    WorkflowResponse, WorkflowStatus,
};
pub use error::{ErrorCategory, LedgerGateError, StructuredError};
pub use evidence::{
    EvidenceDecision, EvidenceReceipt, EvidenceRecord, EvidenceRecorder,
    SCHEMA_AUTONOMOUS_CYCLE_V2, SCHEMA_TX_RECEIPT_V1,
};
pub use idempotency::{
    FileIdempotencyStore, IdempotencyGuard, IdempotencyRecord, IdempotencyStatus,
    IdempotencyStore, MemoryIdempotencyStore, PreviousAttempt, Reservation,
};
pub use intent::{Intent, IntentKind, LedgerFamily, NetworkId};
pub use journal::{EvidenceJournal, JournalEntry};
pub use normalizer::{parse_hint, HintCandidates, IntentInput, IntentNormalizer};
pub use policy::{
    AutonomousContext, ExecuteBindingState, PolicyConfig, PolicyDecision, PolicyEngine,
    PolicyGuard, PolicyInput, TriggerKind,
};
pub use session::{FileSessionStore, MemorySessionStore, RunLocks, SessionStore, WorkflowPhase, WorkflowSession};
pub use storage::{EvidenceStore, PostgresStore, Storage, StorageConfig};
pub use trigger::{CycleProof, CycleTriggerVerifier, TriggerVerification, VerifiedTransition};
pub use types::{Blocker, ExecutionOutcome, StateDelta};
