use crate::error::LedgerGateError;
use crate::evidence::{EvidenceDecision, EvidenceRecord};
use crate::idempotency::{
    terminal_record, FileIdempotencyStore, IdempotencyRecord, IdempotencyStatus, IdempotencyStore,
    MemoryIdempotencyStore, PreviousAttempt, Reservation,
};
use crate::journal::{EvidenceJournal, JournalEntry};
use crate::intent::Intent;
use crate::session::{
    session_not_found, FileSessionStore, MemorySessionStore, SessionStore, WorkflowPhase,
    WorkflowSession,
};
use crate::types::ExecutionOutcome;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Persistence backend for evidence, idempotency and session state.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// Keep everything in process memory only.
    #[default]
    Memory,
    /// Append-only JSONL files under `dir`, plus a latest-evidence pointer file.
    File { dir: PathBuf },
    /// PostgreSQL tables, hydrated and hash-verified on startup.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::File { dir: dir.into() }
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Bootstrapped stores for one engine.
pub struct Storage {
    pub evidence: EvidenceStore,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Storage {
    pub fn memory() -> Self {
        Self {
            evidence: EvidenceStore::memory(),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    pub async fn bootstrap(config: StorageConfig) -> Result<Self, LedgerGateError> {
        let storage = match config {
            StorageConfig::Memory => Self::memory(),
            StorageConfig::File { dir } => {
                let log = FileEvidenceLog::new(&dir);
                let journal = EvidenceJournal::from_entries(log.load_entries()?)?;
                Self {
                    evidence: EvidenceStore {
                        journal,
                        backend: EvidenceBackend::File(log),
                    },
                    idempotency: Arc::new(FileIdempotencyStore::open(dir.join("idempotency.jsonl"))?),
                    sessions: Arc::new(FileSessionStore::open(dir.join("sessions.json"))?),
                }
            }
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let journal = EvidenceJournal::from_entries(store.load_evidence().await?)?;
                Self {
                    evidence: EvidenceStore {
                        journal,
                        backend: EvidenceBackend::Postgres(store.clone()),
                    },
                    idempotency: Arc::new(store.clone()),
                    sessions: Arc::new(store),
                }
            }
        };
        info!(
            evidence = storage.evidence.backend_label(),
            idempotency = storage.idempotency.backend_label(),
            entries = storage.evidence.entries().len(),
            "storage bootstrapped"
        );
        Ok(storage)
    }
}

#[derive(Debug, Clone)]
enum EvidenceBackend {
    Memory,
    File(FileEvidenceLog),
    Postgres(PostgresStore),
}

/// Evidence journal that mirrors every entry to its backend.
///
/// - The entry is built against the in-memory chain first.
/// - It is persisted before it is committed in memory.
/// - Persisted entries are hash-verified when loaded.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    journal: EvidenceJournal,
    backend: EvidenceBackend,
}

impl EvidenceStore {
    pub fn memory() -> Self {
        Self {
            journal: EvidenceJournal::new(),
            backend: EvidenceBackend::Memory,
        }
    }

    pub fn from_entries(entries: Vec<JournalEntry>) -> Result<Self, LedgerGateError> {
        Ok(Self {
            journal: EvidenceJournal::from_entries(entries)?,
            backend: EvidenceBackend::Memory,
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            EvidenceBackend::Memory => "memory",
            EvidenceBackend::File(_) => "file",
            EvidenceBackend::Postgres(_) => "postgres",
        }
    }

    pub fn journal(&self) -> &EvidenceJournal {
        &self.journal
    }

    pub fn entries(&self) -> &[JournalEntry] {
        self.journal.entries()
    }

    pub fn latest(&self) -> Option<&JournalEntry> {
        self.journal.latest()
    }

    pub fn verify_chain(&self) -> bool {
        self.journal.verify_chain()
    }

    pub async fn append(&mut self, record: &EvidenceRecord) -> Result<JournalEntry, LedgerGateError> {
        let entry = self.journal.seal_next(record)?;

        match &self.backend {
            EvidenceBackend::Memory => {}
            EvidenceBackend::File(log) => {
                log.insert_entry(&entry)?;
                log.write_latest(&entry)?;
            }
            EvidenceBackend::Postgres(store) => store.insert_evidence(&entry).await?,
        }

        self.journal.commit(entry.clone())?;
        Ok(entry)
    }
}

#[derive(Debug, Clone)]
struct FileEvidenceLog {
    history_path: PathBuf,
    latest_path: PathBuf,
}

impl FileEvidenceLog {
    fn new(dir: &Path) -> Self {
        Self {
            history_path: dir.join("evidence.jsonl"),
            latest_path: dir.join("evidence-latest.json"),
        }
    }

    fn load_entries(&self) -> Result<Vec<JournalEntry>, LedgerGateError> {
        if !self.history_path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.history_path)
            .map_err(|e| LedgerGateError::Storage(format!("evidence history read failed: {e}")))?;
        let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();

        let mut entries = Vec::with_capacity(lines.len());
        for (position, line) in lines.iter().enumerate() {
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => entries.push(entry),
                // Only a torn trailing line is tolerated; anything earlier is corruption.
                Err(err) if position + 1 == lines.len() => {
                    warn!(path = %self.history_path.display(), error = %err, "ignoring torn trailing evidence line");
                }
                Err(err) => {
                    return Err(LedgerGateError::Storage(format!(
                        "evidence history line {} is unreadable: {err}",
                        position + 1
                    )))
                }
            }
        }
        Ok(entries)
    }

    fn insert_entry(&self, entry: &JournalEntry) -> Result<(), LedgerGateError> {
        if let Some(parent) = self.history_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LedgerGateError::Storage(format!("evidence dir create failed: {e}")))?;
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .map_err(|e| LedgerGateError::Storage(format!("evidence history open failed: {e}")))?;
        file.write_all(&line)
            .and_then(|_| file.sync_data())
            .map_err(|e| LedgerGateError::Storage(format!("evidence history write failed: {e}")))
    }

    fn write_latest(&self, entry: &JournalEntry) -> Result<(), LedgerGateError> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        let tmp_path = self.latest_path.with_extension("tmp");
        fs::write(&tmp_path, bytes)
            .and_then(|_| fs::rename(&tmp_path, &self.latest_path))
            .map_err(|e| LedgerGateError::Storage(format!("evidence latest pointer write failed: {e}")))
    }
}

/// PostgreSQL backend shared by the evidence journal, the idempotency log and
/// workflow sessions.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerGateError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| LedgerGateError::Storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), LedgerGateError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledgergate_evidence (
                journal_index BIGINT PRIMARY KEY,
                record_id TEXT NOT NULL UNIQUE,
                run_id TEXT NOT NULL,
                decision TEXT NOT NULL,
                schema_version TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                record JSONB NOT NULL,
                previous_hash TEXT NULL,
                entry_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ledgergate_evidence_run_id ON ledgergate_evidence (run_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres index create failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledgergate_evidence_latest (
                slot TEXT PRIMARY KEY,
                journal_index BIGINT NOT NULL,
                run_id TEXT NOT NULL,
                entry_hash TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres schema create failed: {e}")))?;

        // (run_id, sequence) is the idempotency backstop: two reservations
        // for one run cannot both insert sequence 0.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledgergate_idempotency (
                run_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                status TEXT NOT NULL,
                outcome JSONB NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (run_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledgergate_sessions (
                run_id TEXT PRIMARY KEY,
                session JSONB NOT NULL,
                closed BOOLEAN NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres schema create failed: {e}")))?;

        Ok(())
    }

    async fn load_session(&self, run_id: &str) -> Result<Option<WorkflowSession>, LedgerGateError> {
        let row = sqlx::query("SELECT session FROM ledgergate_sessions WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerGateError::Storage(format!("postgres session load failed: {e}")))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let value: Value = row
            .try_get("session")
            .map_err(|e| LedgerGateError::Storage(format!("postgres decode session failed: {e}")))?;
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Read-modify-write of one session under a row lock.
    async fn update_session<F>(&self, run_id: &str, apply: F) -> Result<WorkflowSession, LedgerGateError>
    where
        F: FnOnce(&mut WorkflowSession) -> Result<(), LedgerGateError> + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerGateError::Storage(format!("postgres begin failed: {e}")))?;

        let row = sqlx::query("SELECT session FROM ledgergate_sessions WHERE run_id = $1 FOR UPDATE")
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LedgerGateError::Storage(format!("postgres session load failed: {e}")))?;
        let Some(row) = row else {
            return Err(session_not_found(run_id));
        };
        let value: Value = row
            .try_get("session")
            .map_err(|e| LedgerGateError::Storage(format!("postgres decode session failed: {e}")))?;
        let mut session: WorkflowSession = serde_json::from_value(value)?;
        apply(&mut session)?;

        sqlx::query(
            "UPDATE ledgergate_sessions SET session = $2, closed = $3, updated_at = $4 WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(serde_json::to_value(&session)?)
        .bind(session.closed)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres session update failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| LedgerGateError::Storage(format!("postgres commit failed: {e}")))?;
        Ok(session)
    }

    async fn load_evidence(&self) -> Result<Vec<JournalEntry>, LedgerGateError> {
        let rows = sqlx::query(
            r#"
            SELECT
                journal_index,
                record_id,
                run_id,
                decision,
                schema_version,
                recorded_at,
                record,
                previous_hash,
                entry_hash
            FROM ledgergate_evidence
            ORDER BY journal_index ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres load failed: {e}")))?;

        let decode = |column: &str, e: sqlx::Error| {
            LedgerGateError::Storage(format!("postgres decode {column} failed: {e}"))
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let index: i64 = row
                .try_get("journal_index")
                .map_err(|e| decode("journal_index", e))?;
            let decision: String = row.try_get("decision").map_err(|e| decode("decision", e))?;
            entries.push(JournalEntry {
                index: index.try_into().map_err(|_| {
                    LedgerGateError::Storage("negative journal index in storage".to_string())
                })?,
                record_id: row.try_get("record_id").map_err(|e| decode("record_id", e))?,
                run_id: row.try_get("run_id").map_err(|e| decode("run_id", e))?,
                decision: EvidenceDecision::parse(&decision).ok_or_else(|| {
                    LedgerGateError::Storage(format!("unknown evidence decision '{decision}' in postgres"))
                })?,
                schema_version: row
                    .try_get("schema_version")
                    .map_err(|e| decode("schema_version", e))?,
                recorded_at: row
                    .try_get("recorded_at")
                    .map_err(|e| decode("recorded_at", e))?,
                record: row.try_get("record").map_err(|e| decode("record", e))?,
                previous_hash: row
                    .try_get("previous_hash")
                    .map_err(|e| decode("previous_hash", e))?,
                entry_hash: row.try_get("entry_hash").map_err(|e| decode("entry_hash", e))?,
            });
        }

        Ok(entries)
    }

    async fn insert_evidence(&self, entry: &JournalEntry) -> Result<(), LedgerGateError> {
        let index: i64 = entry.index.try_into().map_err(|_| {
            LedgerGateError::Storage("journal index exceeds postgres BIGINT range".to_string())
        })?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerGateError::Storage(format!("postgres begin failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO ledgergate_evidence (
                journal_index,
                record_id,
                run_id,
                decision,
                schema_version,
                recorded_at,
                record,
                previous_hash,
                entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(index)
        .bind(&entry.record_id)
        .bind(&entry.run_id)
        .bind(entry.decision.name())
        .bind(&entry.schema_version)
        .bind(entry.recorded_at)
        .bind(&entry.record)
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres insert failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO ledgergate_evidence_latest (slot, journal_index, run_id, entry_hash, updated_at)
            VALUES ('latest', $1, $2, $3, $4)
            ON CONFLICT (slot) DO UPDATE SET
                journal_index = EXCLUDED.journal_index,
                run_id = EXCLUDED.run_id,
                entry_hash = EXCLUDED.entry_hash,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(index)
        .bind(&entry.run_id)
        .bind(&entry.entry_hash)
        .bind(entry.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres latest pointer update failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| LedgerGateError::Storage(format!("postgres commit failed: {e}")))
    }

    async fn insert_idempotency(
        &self,
        record: &IdempotencyRecord,
        skip_on_conflict: bool,
    ) -> Result<bool, LedgerGateError> {
        let outcome = record
            .outcome
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let sequence: i32 = record.sequence.try_into().map_err(|_| {
            LedgerGateError::Storage("idempotency sequence exceeds INTEGER range".to_string())
        })?;
        let statement = if skip_on_conflict {
            r#"
            INSERT INTO ledgergate_idempotency (run_id, sequence, status, outcome, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id, sequence) DO NOTHING
            "#
        } else {
            r#"
            INSERT INTO ledgergate_idempotency (run_id, sequence, status, outcome, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#
        };

        let result = sqlx::query(statement)
            .bind(&record.run_id)
            .bind(sequence)
            .bind(record.status.name())
            .bind(outcome)
            .bind(record.recorded_at)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerGateError::Storage(format!("postgres idempotency insert failed: {e}")))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    async fn reserve(&self, run_id: &str) -> Result<Reservation, LedgerGateError> {
        let record = IdempotencyRecord {
            run_id: run_id.to_string(),
            sequence: 0,
            status: IdempotencyStatus::Reserved,
            outcome: None,
            recorded_at: Utc::now(),
        };
        if self.insert_idempotency(&record, true).await? {
            return Ok(Reservation::Reserved(record));
        }

        let history = self.history(run_id).await?;
        PreviousAttempt::from_records(&history)
            .map(Reservation::Conflict)
            .ok_or_else(|| {
                LedgerGateError::Storage(format!(
                    "idempotency reservation for '{run_id}' conflicted but no history was found"
                ))
            })
    }

    async fn complete(
        &self,
        run_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<IdempotencyRecord, LedgerGateError> {
        let history = self.history(run_id).await?;
        let record = terminal_record(run_id, &history, outcome)?;
        self.insert_idempotency(&record, false).await?;
        Ok(record)
    }

    async fn history(&self, run_id: &str) -> Result<Vec<IdempotencyRecord>, LedgerGateError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, sequence, status, outcome, recorded_at
            FROM ledgergate_idempotency
            WHERE run_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres idempotency load failed: {e}")))?;

        let decode = |column: &str, e: sqlx::Error| {
            LedgerGateError::Storage(format!("postgres decode {column} failed: {e}"))
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let sequence: i32 = row.try_get("sequence").map_err(|e| decode("sequence", e))?;
            let status: String = row.try_get("status").map_err(|e| decode("status", e))?;
            let outcome: Option<Value> = row.try_get("outcome").map_err(|e| decode("outcome", e))?;
            records.push(IdempotencyRecord {
                run_id: row.try_get("run_id").map_err(|e| decode("run_id", e))?,
                sequence: sequence.try_into().map_err(|_| {
                    LedgerGateError::Storage("negative idempotency sequence in storage".to_string())
                })?,
                status: IdempotencyStatus::parse(&status).ok_or_else(|| {
                    LedgerGateError::Storage(format!(
                        "unknown idempotency status '{status}' in postgres"
                    ))
                })?,
                outcome: outcome.map(serde_json::from_value).transpose()?,
                recorded_at: row
                    .try_get("recorded_at")
                    .map_err(|e| decode("recorded_at", e))?,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn begin_or_resume(
        &self,
        run_id: Option<&str>,
        intent: &Intent,
    ) -> Result<(WorkflowSession, bool), LedgerGateError> {
        let run_id = run_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = WorkflowSession::new(run_id.clone(), intent.clone());

        let inserted = sqlx::query(
            r#"
            INSERT INTO ledgergate_sessions (run_id, session, closed, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (run_id) DO NOTHING
            "#,
        )
        .bind(&run_id)
        .bind(serde_json::to_value(&session)?)
        .bind(session.closed)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerGateError::Storage(format!("postgres session insert failed: {e}")))?;

        if inserted.rows_affected() == 1 {
            return Ok((session, true));
        }
        let existing = self
            .load_session(&run_id)
            .await?
            .ok_or_else(|| session_not_found(&run_id))?;
        Ok((existing, false))
    }

    async fn advance(
        &self,
        run_id: &str,
        phase: WorkflowPhase,
        intent: &Intent,
    ) -> Result<WorkflowSession, LedgerGateError> {
        self.update_session(run_id, |session| session.transition(phase, intent))
            .await
    }

    async fn set_confirm_token(
        &self,
        run_id: &str,
        token: &str,
    ) -> Result<WorkflowSession, LedgerGateError> {
        self.update_session(run_id, |session| {
            session.confirm_token = Some(token.to_string());
            session.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn get(&self, run_id: &str) -> Option<WorkflowSession> {
        match self.load_session(run_id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(run_id, error = %err, "session lookup failed");
                None
            }
        }
    }

    async fn close(&self, run_id: &str) -> Result<(), LedgerGateError> {
        self.update_session(run_id, |session| {
            session.closed = true;
            session.updated_at = Utc::now();
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn evict_idle(&self, idle: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(idle) {
            Ok(idle) => Utc::now() - idle,
            Err(_) => return 0,
        };
        match sqlx::query("DELETE FROM ledgergate_sessions WHERE updated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
        {
            Ok(result) => usize::try_from(result.rows_affected()).unwrap_or(usize::MAX),
            Err(err) => {
                warn!(error = %err, "session eviction failed");
                0
            }
        }
    }

    async fn clear(&self) {
        if let Err(err) = sqlx::query("DELETE FROM ledgergate_sessions")
            .execute(&self.pool)
            .await
        {
            warn!(error = %err, "session clear failed");
        }
    }
}
