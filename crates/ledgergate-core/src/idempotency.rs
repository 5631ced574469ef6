use crate::error::{codes, ErrorCategory, LedgerGateError};
use crate::types::{Blocker, ExecutionOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Reserved,
    Succeeded,
    Failed,
}

impl IdempotencyStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reserved" => Some(Self::Reserved),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One line of the per-run idempotency log. Lines are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub run_id: String,
    pub sequence: u32,
    pub status: IdempotencyStatus,
    pub outcome: Option<ExecutionOutcome>,
    pub recorded_at: DateTime<Utc>,
}

/// What a run id already did, derived from its log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousAttempt {
    pub run_id: String,
    /// `succeeded`, `failed`, or `in-doubt` when only the reservation exists.
    pub status: String,
    pub tx_hash: Option<String>,
    pub tx_hashes: Vec<String>,
    pub detail: Option<String>,
    pub reserved_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PreviousAttempt {
    pub fn from_records(records: &[IdempotencyRecord]) -> Option<Self> {
        let first = records.first()?;
        let terminal = records
            .iter()
            .rev()
            .find(|record| record.status != IdempotencyStatus::Reserved);
        let outcome = terminal.and_then(|record| record.outcome.as_ref());

        Some(Self {
            run_id: first.run_id.clone(),
            status: terminal
                .map(|record| record.status.name())
                .unwrap_or("in-doubt")
                .to_string(),
            tx_hash: outcome.and_then(|o| o.tx_hash()).map(str::to_string),
            tx_hashes: outcome.map(|o| o.tx_hashes.clone()).unwrap_or_default(),
            detail: outcome.map(|o| o.detail.clone()),
            reserved_at: first.recorded_at,
            completed_at: terminal.map(|record| record.recorded_at),
        })
    }

    pub fn is_in_doubt(&self) -> bool {
        self.completed_at.is_none()
    }

    pub fn to_blocker(&self) -> Blocker {
        if self.is_in_doubt() {
            Blocker::new(
                codes::IDEMPOTENCY_IN_DOUBT,
                ErrorCategory::Idempotency,
                format!(
                    "run '{}' was reserved at {} and never completed; a broadcast may have happened",
                    self.run_id, self.reserved_at
                ),
                "reconcile the run against the ledger before retrying under a new runId",
            )
        } else {
            Blocker::new(
                codes::IDEMPOTENCY_CONFLICT,
                ErrorCategory::Idempotency,
                format!(
                    "run '{}' already executed with status '{}'{}",
                    self.run_id,
                    self.status,
                    self.tx_hash
                        .as_deref()
                        .map(|hash| format!(" (txHash {hash})"))
                        .unwrap_or_default()
                ),
                "use the previous result, or start a new runId for a genuine retry",
            )
        }
    }
}

/// Result of an atomic reservation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    Reserved(IdempotencyRecord),
    Conflict(PreviousAttempt),
}

/// Durable idempotency log keyed by run id.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    /// Atomically append a `reserved` line unless the run id has any history.
    async fn reserve(&self, run_id: &str) -> Result<Reservation, LedgerGateError>;

    /// Append the terminal line for a reserved run.
    async fn complete(
        &self,
        run_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<IdempotencyRecord, LedgerGateError>;

    async fn history(&self, run_id: &str) -> Result<Vec<IdempotencyRecord>, LedgerGateError>;
}

fn reserved_record(run_id: &str) -> IdempotencyRecord {
    IdempotencyRecord {
        run_id: run_id.to_string(),
        sequence: 0,
        status: IdempotencyStatus::Reserved,
        outcome: None,
        recorded_at: Utc::now(),
    }
}

pub(crate) fn terminal_record(
    run_id: &str,
    history: &[IdempotencyRecord],
    outcome: &ExecutionOutcome,
) -> Result<IdempotencyRecord, LedgerGateError> {
    match history.last() {
        Some(last) if last.status == IdempotencyStatus::Reserved => Ok(IdempotencyRecord {
            run_id: run_id.to_string(),
            sequence: last.sequence + 1,
            status: if outcome.success {
                IdempotencyStatus::Succeeded
            } else {
                IdempotencyStatus::Failed
            },
            outcome: Some(outcome.clone()),
            recorded_at: Utc::now(),
        }),
        Some(_) => Err(LedgerGateError::integrity(
            codes::INTEGRITY_VIOLATION,
            format!("run '{run_id}' is already completed"),
        )),
        None => Err(LedgerGateError::integrity(
            codes::INTEGRITY_VIOLATION,
            format!("run '{run_id}' was never reserved"),
        )),
    }
}

/// In-process idempotency log.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: AsyncMutex<BTreeMap<String, Vec<IdempotencyRecord>>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn reserve(&self, run_id: &str) -> Result<Reservation, LedgerGateError> {
        let mut records = self.records.lock().await;
        if let Some(previous) = records
            .get(run_id)
            .and_then(|history| PreviousAttempt::from_records(history))
        {
            return Ok(Reservation::Conflict(previous));
        }
        let record = reserved_record(run_id);
        records.insert(run_id.to_string(), vec![record.clone()]);
        Ok(Reservation::Reserved(record))
    }

    async fn complete(
        &self,
        run_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<IdempotencyRecord, LedgerGateError> {
        let mut records = self.records.lock().await;
        let history = records.entry(run_id.to_string()).or_default();
        let record = terminal_record(run_id, history, outcome)?;
        history.push(record.clone());
        Ok(record)
    }

    async fn history(&self, run_id: &str) -> Result<Vec<IdempotencyRecord>, LedgerGateError> {
        Ok(self
            .records
            .lock()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// JSONL-backed idempotency log. Each line is written and synced before the
/// in-memory index is updated, so a restart sees every acknowledged line.
///
/// Reservations are also claimed with a `create_new` marker file under
/// `runs/`, so two processes sharing one data directory cannot both reserve
/// the same run id.
#[derive(Debug)]
pub struct FileIdempotencyStore {
    path: PathBuf,
    markers: PathBuf,
    records: AsyncMutex<BTreeMap<String, Vec<IdempotencyRecord>>>,
}

impl FileIdempotencyStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerGateError> {
        let path = path.into();
        let records = read_log(&path)?;
        let markers = path
            .parent()
            .map(|dir| dir.join("runs"))
            .unwrap_or_else(|| PathBuf::from("runs"));
        info!(path = %path.display(), runs = records.len(), "idempotency log loaded");
        Ok(Self {
            path,
            markers,
            records: AsyncMutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn marker_path(&self, run_id: &str) -> PathBuf {
        // Run ids are caller-supplied; hash them into a safe file name.
        let name = blake3::hash(run_id.as_bytes()).to_hex();
        self.markers.join(format!("{name}.reserved"))
    }

    /// Claim the run id for this process. `false` means someone already holds it.
    fn claim_marker(&self, record: &IdempotencyRecord) -> Result<bool, LedgerGateError> {
        fs::create_dir_all(&self.markers)
            .map_err(|e| LedgerGateError::Storage(format!("idempotency marker dir create failed: {e}")))?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.marker_path(&record.run_id))
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => {
                return Err(LedgerGateError::Storage(format!(
                    "idempotency marker create failed: {err}"
                )))
            }
        };
        let bytes = serde_json::to_vec(record)?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_data())
            .map_err(|e| LedgerGateError::Storage(format!("idempotency marker write failed: {e}")))?;
        Ok(true)
    }

    /// History of a run held by another process: the shared log first, then
    /// the marker itself when the owner has not appended its line yet.
    fn foreign_history(&self, run_id: &str) -> Result<Vec<IdempotencyRecord>, LedgerGateError> {
        let history = read_log(&self.path)?.remove(run_id).unwrap_or_default();
        if !history.is_empty() {
            return Ok(history);
        }
        let marker = fs::read(self.marker_path(run_id))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<IdempotencyRecord>(&bytes).ok())
            .unwrap_or_else(|| reserved_record(run_id));
        Ok(vec![marker])
    }

    fn append_line(&self, record: &IdempotencyRecord) -> Result<(), LedgerGateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LedgerGateError::Storage(format!("idempotency dir create failed: {e}")))?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerGateError::Storage(format!("idempotency log open failed: {e}")))?;
        file.write_all(&line)
            .and_then(|_| file.sync_data())
            .map_err(|e| LedgerGateError::Storage(format!("idempotency log write failed: {e}")))
    }
}

#[async_trait]
impl IdempotencyStore for FileIdempotencyStore {
    fn backend_label(&self) -> &'static str {
        "file"
    }

    async fn reserve(&self, run_id: &str) -> Result<Reservation, LedgerGateError> {
        let mut records = self.records.lock().await;
        if let Some(previous) = records
            .get(run_id)
            .and_then(|history| PreviousAttempt::from_records(history))
        {
            return Ok(Reservation::Conflict(previous));
        }
        let record = reserved_record(run_id);
        if !self.claim_marker(&record)? {
            warn!(run_id, "run id already reserved by another process");
            let history = self.foreign_history(run_id)?;
            return PreviousAttempt::from_records(&history)
                .map(Reservation::Conflict)
                .ok_or_else(|| {
                    LedgerGateError::Storage(format!(
                        "idempotency marker for '{run_id}' exists but no history was found"
                    ))
                });
        }
        self.append_line(&record)?;
        records.insert(run_id.to_string(), vec![record.clone()]);
        Ok(Reservation::Reserved(record))
    }

    async fn complete(
        &self,
        run_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<IdempotencyRecord, LedgerGateError> {
        let mut records = self.records.lock().await;
        let history = records.entry(run_id.to_string()).or_default();
        let record = terminal_record(run_id, history, outcome)?;
        self.append_line(&record)?;
        history.push(record.clone());
        Ok(record)
    }

    async fn history(&self, run_id: &str) -> Result<Vec<IdempotencyRecord>, LedgerGateError> {
        let records = self.records.lock().await;
        if let Some(history) = records.get(run_id) {
            return Ok(history.clone());
        }
        if self.marker_path(run_id).exists() {
            return self.foreign_history(run_id);
        }
        Ok(Vec::new())
    }
}

fn read_log(path: &Path) -> Result<BTreeMap<String, Vec<IdempotencyRecord>>, LedgerGateError> {
    let mut records: BTreeMap<String, Vec<IdempotencyRecord>> = BTreeMap::new();
    if !path.exists() {
        return Ok(records);
    }
    let text = fs::read_to_string(path)
        .map_err(|e| LedgerGateError::Storage(format!("idempotency log read failed: {e}")))?;
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IdempotencyRecord>(line) {
            Ok(record) => records.entry(record.run_id.clone()).or_default().push(record),
            Err(err) => {
                // A torn final line from a crash mid-write carries no acknowledged state.
                warn!(path = %path.display(), line = line_no + 1, error = %err, "skipping unreadable idempotency line");
            }
        }
    }
    Ok(records)
}

/// Front for the idempotency log used by the workflow engine.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store }
    }

    pub fn backend_label(&self) -> &'static str {
        self.store.backend_label()
    }

    /// Any earlier attempt for this run id, verbatim.
    pub async fn previous(&self, run_id: &str) -> Result<Option<PreviousAttempt>, LedgerGateError> {
        let history = self.store.history(run_id).await?;
        Ok(PreviousAttempt::from_records(&history))
    }

    pub async fn reserve(&self, run_id: &str) -> Result<Reservation, LedgerGateError> {
        let reservation = self.store.reserve(run_id).await?;
        match &reservation {
            Reservation::Reserved(_) => info!(run_id, "idempotency slot reserved"),
            Reservation::Conflict(previous) => {
                warn!(run_id, status = %previous.status, "idempotency conflict")
            }
        }
        Ok(reservation)
    }

    pub async fn complete(
        &self,
        run_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<IdempotencyRecord, LedgerGateError> {
        let record = self.store.complete(run_id, outcome).await?;
        info!(run_id, status = record.status.name(), "idempotency slot completed");
        Ok(record)
    }
}
