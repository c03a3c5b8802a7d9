//! # Append-Only Journal
//!
//! Every accepted call is appended as a [`JournalRecord`]. Replaying the
//! records through the same [`apply`] that produced them rebuilds the full
//! ledger, not just the last entry the checkpoint remembers.
//!
//! ## Snapshots
//!
//! [`Journal::compact`] folds the records into a [`Snapshot`] and drops
//! them. [`Journal::rebuild`] starts from the snapshot and replays only the
//! tail. Sequence numbers keep increasing across compactions.
//!
//! ## Security Invariant
//!
//! Replay is deterministic: the record carries the caller, the call (with
//! any directory quote it depended on) and the clock value it ran at. A
//! record that fails to replay is reported as
//! [`JournalError::Divergence`] instead of being skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vesc_core::{Caller, EscrowError, RequestId, Timestamp};
use vesc_ledger::{apply, EscrowCall, Ledger, LedgerPolicy};

/// Errors from the journal.
#[derive(Error, Debug)]
pub enum JournalError {
    /// A record was rejected on replay.
    #[error("journal replay diverged at seq {seq} ({call}): {source}")]
    Divergence {
        /// The failing record.
        seq: u64,
        /// The record's call name.
        call: &'static str,
        /// Why the core rejected it.
        source: EscrowError,
    },

    /// The journal could not be (de)serialized.
    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One accepted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// The clock value the call ran at.
    pub at: Timestamp,
    /// Who made it.
    pub caller: Caller,
    /// What it was.
    pub call: EscrowCall,
}

/// A folded prefix of the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The last sequence number folded in.
    pub seq: u64,
    /// The ledger after that record.
    pub ledger: Ledger,
}

#[derive(Deserialize)]
struct JournalData {
    policy: LedgerPolicy,
    snapshot: Option<Snapshot>,
    records: Vec<JournalRecord>,
}

/// The journal of one ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "JournalData")]
pub struct Journal {
    policy: LedgerPolicy,
    snapshot: Option<Snapshot>,
    records: Vec<JournalRecord>,
    #[serde(skip_serializing)]
    index: BTreeMap<RequestId, Vec<usize>>,
}

impl From<JournalData> for Journal {
    fn from(data: JournalData) -> Self {
        let mut journal = Self {
            policy: data.policy,
            snapshot: data.snapshot,
            records: data.records,
            index: BTreeMap::new(),
        };
        journal.reindex();
        journal
    }
}

impl Journal {
    /// An empty journal written under `policy`.
    pub fn new(policy: LedgerPolicy) -> Self {
        Self {
            policy,
            snapshot: None,
            records: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    /// The policy the journal replays under.
    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    /// The current snapshot, if the journal was compacted.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Records after the snapshot.
    pub fn records(&self) -> &[JournalRecord] {
        &self.records
    }

    /// Number of records after the snapshot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records after the snapshot.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The sequence number of the newest record (or snapshot).
    pub fn last_seq(&self) -> u64 {
        self.records
            .last()
            .map(|r| r.seq)
            .or(self.snapshot.as_ref().map(|s| s.seq))
            .unwrap_or(0)
    }

    /// Append an accepted call. Returns its sequence number.
    pub fn append(&mut self, at: Timestamp, caller: Caller, call: EscrowCall) -> u64 {
        let seq = self.last_seq() + 1;
        if let Some(request_id) = call.request_id() {
            self.index.entry(request_id).or_default().push(self.records.len());
        }
        self.records.push(JournalRecord {
            seq,
            at,
            caller,
            call,
        });
        seq
    }

    /// Records for one entry, oldest first. Records folded into the
    /// snapshot are not included.
    pub fn history(&self, request_id: &RequestId) -> Vec<&JournalRecord> {
        self.index
            .get(request_id)
            .map(|positions| positions.iter().filter_map(|&i| self.records.get(i)).collect())
            .unwrap_or_default()
    }

    /// Replay the snapshot and every record into a fresh ledger.
    pub fn rebuild(&self) -> Result<Ledger, JournalError> {
        let mut ledger = self
            .snapshot
            .as_ref()
            .map(|s| s.ledger.clone())
            .unwrap_or_default();
        for record in &self.records {
            apply(&mut ledger, &self.policy, &record.caller, &record.call, record.at).map_err(
                |source| JournalError::Divergence {
                    seq: record.seq,
                    call: record.call.name(),
                    source,
                },
            )?;
        }
        Ok(ledger)
    }

    /// Fold every record into a new snapshot and drop the records.
    pub fn compact(&mut self) -> Result<(), JournalError> {
        if self.records.is_empty() {
            return Ok(());
        }
        let ledger = self.rebuild()?;
        let seq = self.last_seq();
        self.snapshot = Some(Snapshot { seq, ledger });
        self.records.clear();
        self.index.clear();
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, JournalError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, JournalError> {
        Ok(serde_json::from_str(json)?)
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (pos, record) in self.records.iter().enumerate() {
            if let Some(request_id) = record.call.request_id() {
                self.index.entry(request_id).or_default().push(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesc_core::AccountId;
    use vesc_ledger::{EscrowStatus, VerifierQuote};

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(secs).unwrap()
    }

    fn oracle() -> Caller {
        Caller::oracle(AccountId::derive("oracle"))
    }

    fn policy() -> LedgerPolicy {
        LedgerPolicy::new(AccountId::derive("platform")).with_oracle(oracle().account)
    }

    fn create(id: &str) -> EscrowCall {
        EscrowCall::Create {
            request_id: RequestId::parse(id).unwrap(),
            verifier: AccountId::derive("verifier"),
            amount: 100,
            quote: VerifierQuote { active: true, fee: 1 },
        }
    }

    /// Apply live and journal at the same time.
    fn live(journal: &mut Journal, ledger: &mut Ledger, caller: Caller, call: EscrowCall, at: i64) {
        apply(ledger, journal.policy(), &caller, &call, ts(at)).unwrap();
        journal.append(ts(at), caller, call);
    }

    fn populated() -> (Journal, Ledger) {
        let mut journal = Journal::new(policy());
        let mut ledger = Ledger::new();
        let user = Caller::user(AccountId::derive("user"));
        live(&mut journal, &mut ledger, user, create("0x01"), 0);
        live(&mut journal, &mut ledger, user, create("0x02"), 1);
        live(
            &mut journal,
            &mut ledger,
            oracle(),
            EscrowCall::LockFunds {
                request_id: RequestId::parse("0x01").unwrap(),
            },
            2,
        );
        (journal, ledger)
    }

    #[test]
    fn rebuild_matches_live_application() {
        let (journal, ledger) = populated();
        assert_eq!(journal.rebuild().unwrap(), ledger);
    }

    #[test]
    fn history_is_per_request() {
        let (journal, _) = populated();
        let history = journal.history(&RequestId::parse("0x01").unwrap());
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].seq, 1);
        assert_eq!(history[1].seq, 3);
    }

    #[test]
    fn compact_preserves_state_and_sequence() {
        let (mut journal, ledger) = populated();
        journal.compact().unwrap();
        assert!(journal.is_empty());
        assert_eq!(journal.snapshot().unwrap().seq, 3);
        assert_eq!(journal.rebuild().unwrap(), ledger);
        let user = Caller::user(AccountId::derive("user"));
        assert_eq!(journal.append(ts(5), user, create("0x03")), 4);
    }

    #[test]
    fn divergence_is_reported() {
        let mut journal = Journal::new(policy());
        let user = Caller::user(AccountId::derive("user"));
        journal.append(ts(0), user, create("0x01"));
        journal.append(ts(1), user, create("0x01"));
        let err = journal.rebuild().unwrap_err();
        assert!(matches!(err, JournalError::Divergence { seq: 2, call: "create", .. }));
    }

    #[test]
    fn json_roundtrip_restores_index() {
        let (journal, ledger) = populated();
        let json = journal.to_json().unwrap();
        let back = Journal::from_json(&json).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.history(&RequestId::parse("0x02").unwrap()).len(), 1);
        let rebuilt = back.rebuild().unwrap();
        assert_eq!(rebuilt, ledger);
        assert_eq!(
            rebuilt.entry(&RequestId::parse("0x01").unwrap()).unwrap().status,
            EscrowStatus::FundsLocked
        );
    }
}
