use crate::error::{codes, LedgerGateError};
use crate::intent::Intent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

/// Workflow phases, in the only order they may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    Analysis,
    Simulate,
    Execute,
}

impl WorkflowPhase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Simulate => "simulate",
            Self::Execute => "execute",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "analysis" => Some(Self::Analysis),
            "simulate" => Some(Self::Simulate),
            "execute" => Some(Self::Execute),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One live workflow, keyed by `run_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSession {
    pub run_id: String,
    pub network: String,
    pub intent: Intent,
    pub phase: WorkflowPhase,
    pub confirm_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed: bool,
}

impl WorkflowSession {
    pub fn new(run_id: impl Into<String>, intent: Intent) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            network: intent.network.clone(),
            intent,
            phase: WorkflowPhase::Analysis,
            confirm_token: None,
            created_at: now,
            updated_at: now,
            closed: false,
        }
    }

    pub fn matches(&self, intent: &Intent) -> bool {
        self.network == intent.network && self.intent.canonical_json() == intent.canonical_json()
    }

    /// Apply a phase transition.
    ///
    /// Analysis is an explicit reset that replaces the intent and drops the
    /// token. Simulate and execute keep the stored intent, refuse a different
    /// one and never move backwards. Simulate may be skipped.
    pub fn transition(&mut self, next: WorkflowPhase, intent: &Intent) -> Result<(), LedgerGateError> {
        if self.closed {
            return Err(LedgerGateError::integrity(
                codes::SESSION_CLOSED,
                format!("session '{}' is closed; start a new run", self.run_id),
            ));
        }

        match next {
            WorkflowPhase::Analysis => {
                self.network = intent.network.clone();
                self.intent = intent.clone();
                self.confirm_token = None;
            }
            WorkflowPhase::Simulate | WorkflowPhase::Execute => {
                if next < self.phase {
                    return Err(LedgerGateError::phase_violation(next.name(), self.phase.name()));
                }
                if self.network != intent.network {
                    return Err(LedgerGateError::integrity(
                        codes::SESSION_NETWORK_MISMATCH,
                        format!(
                            "session '{}' is bound to {}, request targets {}",
                            self.run_id, self.network, intent.network
                        ),
                    ));
                }
                if !self.matches(intent) {
                    return Err(LedgerGateError::integrity(
                        codes::SESSION_INTENT_MISMATCH,
                        format!(
                            "intent differs from the one analysed for session '{}'",
                            self.run_id
                        ),
                    ));
                }
            }
        }

        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Storage for workflow sessions with an explicit lifecycle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the session for `run_id`, creating it when the id is absent or
    /// unknown. A missing id is minted.
    async fn begin_or_resume(
        &self,
        run_id: Option<&str>,
        intent: &Intent,
    ) -> Result<(WorkflowSession, bool), LedgerGateError>;

    async fn advance(
        &self,
        run_id: &str,
        phase: WorkflowPhase,
        intent: &Intent,
    ) -> Result<WorkflowSession, LedgerGateError>;

    async fn set_confirm_token(
        &self,
        run_id: &str,
        token: &str,
    ) -> Result<WorkflowSession, LedgerGateError>;

    async fn get(&self, run_id: &str) -> Option<WorkflowSession>;

    /// Mark terminal; closed sessions are never reopened.
    async fn close(&self, run_id: &str) -> Result<(), LedgerGateError>;

    /// Drop sessions untouched for longer than `idle`. Returns how many went.
    async fn evict_idle(&self, idle: Duration) -> usize;

    async fn clear(&self);
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: AsyncMutex<HashMap<String, WorkflowSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn from_sessions(sessions: HashMap<String, WorkflowSession>) -> Self {
        Self {
            sessions: AsyncMutex::new(sessions),
        }
    }

    async fn snapshot(&self) -> HashMap<String, WorkflowSession> {
        self.sessions.lock().await.clone()
    }
}

pub(crate) fn session_not_found(run_id: &str) -> LedgerGateError {
    LedgerGateError::integrity(
        codes::SESSION_NOT_FOUND,
        format!("no session for run '{run_id}'; run the analysis phase first"),
    )
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn begin_or_resume(
        &self,
        run_id: Option<&str>,
        intent: &Intent,
    ) -> Result<(WorkflowSession, bool), LedgerGateError> {
        let mut sessions = self.sessions.lock().await;
        let run_id = run_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(existing) = sessions.get(&run_id) {
            return Ok((existing.clone(), false));
        }

        let session = WorkflowSession::new(run_id.clone(), intent.clone());
        sessions.insert(run_id, session.clone());
        Ok((session, true))
    }

    async fn advance(
        &self,
        run_id: &str,
        phase: WorkflowPhase,
        intent: &Intent,
    ) -> Result<WorkflowSession, LedgerGateError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(run_id).ok_or_else(|| session_not_found(run_id))?;
        session.transition(phase, intent)?;
        Ok(session.clone())
    }

    async fn set_confirm_token(
        &self,
        run_id: &str,
        token: &str,
    ) -> Result<WorkflowSession, LedgerGateError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(run_id).ok_or_else(|| session_not_found(run_id))?;
        session.confirm_token = Some(token.to_string());
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn get(&self, run_id: &str) -> Option<WorkflowSession> {
        self.sessions.lock().await.get(run_id).cloned()
    }

    async fn close(&self, run_id: &str) -> Result<(), LedgerGateError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(run_id).ok_or_else(|| session_not_found(run_id))?;
        session.closed = true;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn evict_idle(&self, idle: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(idle) {
            Ok(idle) => Utc::now() - idle,
            Err(_) => return 0,
        };
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.updated_at >= cutoff);
        before - sessions.len()
    }

    async fn clear(&self) {
        self.sessions.lock().await.clear();
    }
}

/// Session store persisted as one JSON snapshot, so separate processes can
/// carry a run from analysis to execute.
///
/// Every mutation rewrites the snapshot via tmp file + rename.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    inner: MemorySessionStore,
    write: AsyncMutex<()>,
}

impl FileSessionStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerGateError> {
        let path = path.into();
        let sessions: HashMap<String, WorkflowSession> = if path.exists() {
            let bytes = fs::read(&path).map_err(|err| storage_error(&path, err))?;
            if bytes.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            inner: MemorySessionStore::from_sessions(sessions),
            write: AsyncMutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), LedgerGateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| storage_error(parent, err))?;
        }

        let bytes = serde_json::to_vec_pretty(&self.inner.snapshot().await)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes).map_err(|err| storage_error(&tmp_path, err))?;
        fs::rename(&tmp_path, &self.path).map_err(|err| storage_error(&self.path, err))?;
        Ok(())
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> LedgerGateError {
    LedgerGateError::Storage(format!("{}: {err}", path.display()))
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn begin_or_resume(
        &self,
        run_id: Option<&str>,
        intent: &Intent,
    ) -> Result<(WorkflowSession, bool), LedgerGateError> {
        let _write = self.write.lock().await;
        let (session, created) = self.inner.begin_or_resume(run_id, intent).await?;
        if created {
            self.persist().await?;
        }
        Ok((session, created))
    }

    async fn advance(
        &self,
        run_id: &str,
        phase: WorkflowPhase,
        intent: &Intent,
    ) -> Result<WorkflowSession, LedgerGateError> {
        let _write = self.write.lock().await;
        let session = self.inner.advance(run_id, phase, intent).await?;
        self.persist().await?;
        Ok(session)
    }

    async fn set_confirm_token(
        &self,
        run_id: &str,
        token: &str,
    ) -> Result<WorkflowSession, LedgerGateError> {
        let _write = self.write.lock().await;
        let session = self.inner.set_confirm_token(run_id, token).await?;
        self.persist().await?;
        Ok(session)
    }

    async fn get(&self, run_id: &str) -> Option<WorkflowSession> {
        self.inner.get(run_id).await
    }

    async fn close(&self, run_id: &str) -> Result<(), LedgerGateError> {
        let _write = self.write.lock().await;
        self.inner.close(run_id).await?;
        self.persist().await
    }

    async fn evict_idle(&self, idle: Duration) -> usize {
        let _write = self.write.lock().await;
        let evicted = self.inner.evict_idle(idle).await;
        if evicted > 0 {
            if let Err(err) = self.persist().await {
                warn!(path = %self.path.display(), error = %err, "session snapshot not written");
            }
        }
        evicted
    }

    async fn clear(&self) {
        let _write = self.write.lock().await;
        self.inner.clear().await;
        if let Err(err) = self.persist().await {
            warn!(path = %self.path.display(), error = %err, "session snapshot not written");
        }
    }
}

/// Per-run critical sections.
///
/// Holding a run's guard serializes every phase call for that run id inside
/// this process. The durable idempotency reservation still backs it up.
#[derive(Debug, Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, run_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks
                .entry(run_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Forget locks nobody is holding or waiting on.
    pub fn prune(&self) -> usize {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{IntentInput, IntentNormalizer};

    fn intent(amount: u64) -> Intent {
        let input = IntentInput::new("transfer.native")
            .with_field("to", format!("0x{}", "3".repeat(40)))
            .with_field("amountNative", amount);
        IntentNormalizer::new()
            .normalize("evm:sepolia", &input)
            .unwrap()
    }

    #[tokio::test]
    async fn creates_then_resumes_sessions() {
        let store = MemorySessionStore::new();
        let (first, created) = store.begin_or_resume(None, &intent(1)).await.unwrap();
        assert!(created);
        assert_eq!(first.phase, WorkflowPhase::Analysis);

        let (again, created) = store
            .begin_or_resume(Some(&first.run_id), &intent(1))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.run_id, first.run_id);
    }

    #[tokio::test]
    async fn advance_rejects_changed_intent() {
        let store = MemorySessionStore::new();
        let (session, _) = store.begin_or_resume(Some("run-a"), &intent(1)).await.unwrap();

        let err = store
            .advance(&session.run_id, WorkflowPhase::Simulate, &intent(2))
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::SESSION_INTENT_MISMATCH);

        let advanced = store
            .advance(&session.run_id, WorkflowPhase::Execute, &intent(1))
            .await
            .unwrap();
        assert_eq!(advanced.phase, WorkflowPhase::Execute);
    }

    #[tokio::test]
    async fn phases_never_move_backwards_except_analysis_reset() {
        let store = MemorySessionStore::new();
        store.begin_or_resume(Some("run-b"), &intent(1)).await.unwrap();
        store.set_confirm_token("run-b", "token").await.unwrap();
        store
            .advance("run-b", WorkflowPhase::Execute, &intent(1))
            .await
            .unwrap();

        let err = store
            .advance("run-b", WorkflowPhase::Simulate, &intent(1))
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot move from 'execute' to 'simulate'"));

        let reset = store
            .advance("run-b", WorkflowPhase::Analysis, &intent(5))
            .await
            .unwrap();
        assert_eq!(reset.phase, WorkflowPhase::Analysis);
        assert_eq!(reset.intent, intent(5));
        assert!(reset.confirm_token.is_none());
    }

    #[tokio::test]
    async fn closed_sessions_are_not_reopened() {
        let store = MemorySessionStore::new();
        store.begin_or_resume(Some("run-c"), &intent(1)).await.unwrap();
        store.close("run-c").await.unwrap();

        let err = store
            .advance("run-c", WorkflowPhase::Analysis, &intent(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::SESSION_CLOSED);
    }

    #[tokio::test]
    async fn evicts_idle_sessions_and_clears() {
        let store = MemorySessionStore::new();
        store.begin_or_resume(Some("run-d"), &intent(1)).await.unwrap();
        store.begin_or_resume(Some("run-e"), &intent(1)).await.unwrap();

        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.evict_idle(Duration::ZERO).await, 2);

        store.begin_or_resume(Some("run-f"), &intent(1)).await.unwrap();
        store.clear().await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn run_locks_serialize_same_run() {
        let locks = Arc::new(RunLocks::new());
        let guard = locks.acquire("run-g").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("run-g").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert_eq!(locks.prune(), 1);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("ledgergate-sessions-{}", Uuid::new_v4()));
        let path = dir.join("sessions.json");

        let store = FileSessionStore::open(&path).unwrap();
        store.begin_or_resume(Some("run-g"), &intent(1)).await.unwrap();
        store.set_confirm_token("run-g", "token-g").await.unwrap();
        drop(store);

        let reopened = FileSessionStore::open(&path).unwrap();
        let session = reopened.get("run-g").await.unwrap();
        assert_eq!(session.confirm_token.as_deref(), Some("token-g"));
        let advanced = reopened
            .advance("run-g", WorkflowPhase::Execute, &intent(1))
            .await
            .unwrap();
        assert_eq!(advanced.phase, WorkflowPhase::Execute);

        let _ = fs::remove_dir_all(dir);
    }
}
