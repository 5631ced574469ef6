use crate::error::{codes, LedgerGateError};
use crate::evidence::{EvidenceDecision, EvidenceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One sealed evidence record.
///
/// The envelope repeats the record's identity (`record_id`, `run_id`,
/// `decision`, `schema_version`, `recorded_at`) so the chain can be audited
/// and queried without decoding every record. The seal covers the envelope,
/// the record body and the previous seal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub index: u64,
    pub record_id: String,
    pub run_id: String,
    pub decision: EvidenceDecision,
    pub schema_version: String,
    pub recorded_at: DateTime<Utc>,
    pub record: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Exactly what the seal is computed over.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SealMaterial<'a> {
    index: u64,
    previous_hash: Option<&'a str>,
    record_id: &'a str,
    run_id: &'a str,
    decision: EvidenceDecision,
    schema_version: &'a str,
    recorded_at: DateTime<Utc>,
    record: &'a Value,
}

impl JournalEntry {
    fn seal(
        index: u64,
        previous_hash: Option<String>,
        record: &EvidenceRecord,
    ) -> Result<Self, LedgerGateError> {
        let mut entry = Self {
            index,
            record_id: record.record_id.clone(),
            run_id: record.run_id.clone(),
            decision: record.decision,
            schema_version: record.schema_version.clone(),
            recorded_at: record.recorded_at,
            record: serde_json::to_value(record)?,
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.expected_hash()?;
        Ok(entry)
    }

    fn expected_hash(&self) -> Result<String, LedgerGateError> {
        let material = SealMaterial {
            index: self.index,
            previous_hash: self.previous_hash.as_deref(),
            record_id: &self.record_id,
            run_id: &self.run_id,
            decision: self.decision,
            schema_version: &self.schema_version,
            recorded_at: self.recorded_at,
            record: &self.record,
        };
        Ok(blake3::hash(&serde_json::to_vec(&material)?).to_hex().to_string())
    }

    /// Decode the record body and check it still agrees with the envelope.
    pub fn evidence(&self) -> Result<EvidenceRecord, LedgerGateError> {
        let record: EvidenceRecord = serde_json::from_value(self.record.clone())?;
        if record.record_id != self.record_id
            || record.run_id != self.run_id
            || record.decision != self.decision
        {
            return Err(broken(self.index, "record body disagrees with its envelope"));
        }
        Ok(record)
    }

    /// Problems with this entry as the successor of `previous`, if any.
    fn check_link(&self, index: u64, previous: Option<&Self>) -> Result<(), LedgerGateError> {
        if self.index != index {
            return Err(broken(index, &format!("expected index {index}, found {}", self.index)));
        }
        if self.previous_hash.as_deref() != previous.map(|entry| entry.entry_hash.as_str()) {
            return Err(broken(index, "previous hash does not match the chain"));
        }
        if self.entry_hash != self.expected_hash()? {
            return Err(broken(index, "seal does not match the entry"));
        }
        Ok(())
    }
}

fn broken(index: u64, reason: &str) -> LedgerGateError {
    LedgerGateError::integrity(
        codes::INTEGRITY_VIOLATION,
        format!("evidence journal entry {index}: {reason}"),
    )
}

/// Hash-chained evidence records in commit order.
///
/// Records are sealed against the current head, persisted by the caller,
/// then committed. Nothing is ever edited or removed.
#[derive(Debug, Default, Clone)]
pub struct EvidenceJournal {
    entries: Vec<JournalEntry>,
}

impl EvidenceJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries, refusing any break in the chain.
    pub fn from_entries(entries: Vec<JournalEntry>) -> Result<Self, LedgerGateError> {
        let journal = Self { entries };
        journal.verify()?;
        Ok(journal)
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&JournalEntry> {
        self.entries.last()
    }

    pub fn for_run<'a>(&'a self, run_id: &'a str) -> impl Iterator<Item = &'a JournalEntry> + 'a {
        self.entries.iter().filter(move |entry| entry.run_id == run_id)
    }

    /// First break in the chain, as an integrity error.
    pub fn verify(&self) -> Result<(), LedgerGateError> {
        let mut previous = None;
        for (position, entry) in self.entries.iter().enumerate() {
            entry.check_link(position as u64, previous)?;
            entry.evidence()?;
            previous = Some(entry);
        }
        Ok(())
    }

    pub fn verify_chain(&self) -> bool {
        self.verify().is_ok()
    }

    /// Seal `record` as the next entry without touching the chain.
    pub fn seal_next(&self, record: &EvidenceRecord) -> Result<JournalEntry, LedgerGateError> {
        let previous_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        JournalEntry::seal(self.entries.len() as u64, previous_hash, record)
    }

    /// Commit a sealed entry once the backend has made it durable.
    pub fn commit(&mut self, entry: JournalEntry) -> Result<(), LedgerGateError> {
        entry.check_link(self.entries.len() as u64, self.entries.last())?;
        self.entries.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::SCHEMA_TX_RECEIPT_V1;
    use crate::normalizer::{IntentInput, IntentNormalizer};

    fn record(run_id: &str, decision: EvidenceDecision) -> EvidenceRecord {
        let intent = IntentNormalizer::new()
            .normalize(
                "evm:sepolia",
                &IntentInput::new("transfer.native")
                    .with_field("to", format!("0x{}", "9".repeat(40)))
                    .with_field("amountNative", 2)
                    .with_field("amountUsd", 25),
            )
            .unwrap();
        EvidenceRecord {
            record_id: format!("{run_id}-{}", decision.name()),
            run_id: run_id.to_string(),
            decision,
            network: intent.network.clone(),
            intent_hash: intent.intent_hash(),
            amount_usd: intent.amount_usd(),
            intent,
            tx_hash: None,
            tx_hashes: Vec::new(),
            emitted_events: Vec::new(),
            state_delta: None,
            blockers: Vec::new(),
            detail: None,
            policy_version: "ledgergate-policy-v1".to_string(),
            cycle_transition: None,
            schema_version: SCHEMA_TX_RECEIPT_V1.to_string(),
            recorded_at: Utc::now(),
        }
    }

    fn journal_of(records: &[EvidenceRecord]) -> EvidenceJournal {
        let mut journal = EvidenceJournal::new();
        for record in records {
            let entry = journal.seal_next(record).unwrap();
            journal.commit(entry).unwrap();
        }
        journal
    }

    #[test]
    fn chains_records_in_commit_order() {
        let journal = journal_of(&[
            record("run-1", EvidenceDecision::Blocked),
            record("run-1", EvidenceDecision::Executed),
        ]);

        assert!(journal.verify_chain());
        assert_eq!(journal.for_run("run-1").count(), 2);
        let latest = journal.latest().unwrap();
        assert_eq!(latest.index, 1);
        assert_eq!(latest.decision, EvidenceDecision::Executed);
        assert_eq!(latest.previous_hash.as_ref(), Some(&journal.entries()[0].entry_hash));
        assert_eq!(latest.evidence().unwrap().record_id, "run-1-executed");
    }

    #[test]
    fn seal_covers_the_envelope() {
        let journal = journal_of(&[record("run-2", EvidenceDecision::Blocked)]);

        let mut relabelled = journal.entries().to_vec();
        relabelled[0].decision = EvidenceDecision::Executed;
        let err = EvidenceJournal::from_entries(relabelled).unwrap_err();
        assert_eq!(err.code(), codes::INTEGRITY_VIOLATION);

        let mut renamed = journal.entries().to_vec();
        renamed[0].record_id = "someone-else".to_string();
        assert!(EvidenceJournal::from_entries(renamed).is_err());
    }

    #[test]
    fn seal_covers_the_record_body() {
        let journal = journal_of(&[record("run-3", EvidenceDecision::Executed)]);

        let mut tampered = journal.entries().to_vec();
        tampered[0].record["amountUsd"] = serde_json::json!(1);
        let err = EvidenceJournal::from_entries(tampered).unwrap_err();
        assert!(err.to_string().contains("entry 0"));
    }

    #[test]
    fn refuses_a_stale_commit() {
        let mut journal = EvidenceJournal::new();
        let first = journal.seal_next(&record("run-4", EvidenceDecision::Blocked)).unwrap();
        journal.commit(first.clone()).unwrap();

        let err = journal.commit(first).unwrap_err();
        assert!(err.to_string().contains("expected index 1"));
        assert_eq!(journal.entries().len(), 1);
    }
}
