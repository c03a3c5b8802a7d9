//! # In-Memory Adapters
//!
//! Implementations of every port backed by process memory. They serve
//! tests and embedded use; the CLI ships file-backed equivalents.
//!
//! All adapters share one primitive, [`Store`], a cloneable map behind a
//! `parking_lot::RwLock`. Locks are never held across calls into other
//! ports.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use vesc_core::{AccountId, Amount, BalanceKind, Caller, RequestId, Timestamp};
use vesc_ledger::codec::{decode_entry, encode_entry};
use vesc_ledger::{BalanceDelta, Bucket, DisputeInfo, EscrowCall, EscrowRequest, LedgerPolicy};
use vesc_replay::Journal;

use crate::ports::{
    CheckpointStore, CheckpointUpdate, CollaboratorError, EscrowEvent, JournalStore,
    NotificationSink, Ports, RecordStore, RiskAssessment, RiskScorer, StoreError,
    VerifierDirectory,
};

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// `parking_lot::RwLock` is non-poisonable, so a panicking writer does not
/// leave the store unusable.
#[derive(Debug)]
pub struct Store<K, T> {
    data: Arc<RwLock<HashMap<K, T>>>,
}

impl<K, T> Clone for Store<K, T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> Store<K, T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, key: K, value: T) -> Option<T> {
        self.data.write().insert(key, value)
    }

    /// Retrieve a record by key.
    pub fn get(&self, key: &K) -> Option<T> {
        self.data.read().get(key).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Atomically compute a record from its current value (if any) and
    /// store it. Nothing is written if `f` fails.
    pub fn upsert<E>(&self, key: K, f: impl FnOnce(Option<&T>) -> Result<T, E>) -> Result<T, E> {
        let mut guard = self.data.write();
        let next = f(guard.get(&key))?;
        guard.insert(key, next.clone());
        Ok(next)
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, T: Clone> Default for Store<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Records -------------------------------------------------------------------

/// In-memory [`RecordStore`]. Entries are kept in their fixed-width
/// encoding so every read goes through the codec.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    entries: Store<RequestId, Vec<u8>>,
    disputes: Store<RequestId, DisputeInfo>,
    balances: Store<(AccountId, BalanceKind), Bucket>,
}

impl MemoryRecordStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load_entry(&self, request_id: &RequestId) -> Result<Option<EscrowRequest>, StoreError> {
        self.entries
            .get(request_id)
            .map(|bytes| decode_entry(&bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    fn save_entry(&self, entry: &EscrowRequest) -> Result<(), StoreError> {
        self.entries.insert(entry.request_id, encode_entry(entry));
        Ok(())
    }

    fn list_entries(&self) -> Result<Vec<EscrowRequest>, StoreError> {
        let mut entries = self
            .entries
            .list()
            .iter()
            .map(|bytes| decode_entry(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.request_id);
        Ok(entries)
    }

    fn load_dispute(&self, request_id: &RequestId) -> Result<Option<DisputeInfo>, StoreError> {
        Ok(self.disputes.get(request_id))
    }

    fn save_dispute(&self, dispute: &DisputeInfo) -> Result<(), StoreError> {
        self.disputes.insert(dispute.request_id, dispute.clone());
        Ok(())
    }

    fn load_bucket(&self, account: &AccountId, kind: BalanceKind) -> Result<Bucket, StoreError> {
        Ok(self.balances.get(&(*account, kind)).unwrap_or_default())
    }

    fn apply_balance(&self, delta: &BalanceDelta) -> Result<Amount, StoreError> {
        let bucket = self.balances.upsert((delta.account, delta.kind), |current| {
            apply_delta(current.cloned().unwrap_or_default(), delta)
        })?;
        Ok(bucket.amount)
    }
}

/// Fold a balance delta into a stored bucket.
pub fn apply_delta(current: Bucket, delta: &BalanceDelta) -> Result<Bucket, StoreError> {
    current.apply(delta).ok_or_else(|| {
        StoreError::Inconsistent(format!(
            "{} balance of {} cannot take +{} -{} from {}",
            delta.kind, delta.account, delta.credit, delta.debit, current.amount
        ))
    })
}

// -- Checkpoint ----------------------------------------------------------------

/// In-memory [`CheckpointStore`].
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    slot: Mutex<Option<Vec<u8>>>,
}

impl MemoryCheckpointStore {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot preloaded with raw bytes.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            slot: Mutex::new(Some(bytes)),
        }
    }

    /// Overwrite the slot, bypassing the atomic update.
    pub fn overwrite(&self, bytes: Option<Vec<u8>>) {
        *self.slot.lock() = bytes;
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.slot.lock().clone())
    }

    fn update(&self, update: &mut CheckpointUpdate<'_>) -> Result<Vec<u8>, StoreError> {
        let mut slot = self.slot.lock();
        let next = update(slot.as_deref())?;
        *slot = Some(next.clone());
        Ok(next)
    }
}

// -- Journal -------------------------------------------------------------------

/// In-memory [`JournalStore`].
#[derive(Debug)]
pub struct MemoryJournal {
    journal: Mutex<Journal>,
}

impl MemoryJournal {
    /// An empty journal under `policy`.
    pub fn new(policy: LedgerPolicy) -> Self {
        Self {
            journal: Mutex::new(Journal::new(policy)),
        }
    }
}

impl JournalStore for MemoryJournal {
    fn append(&self, at: Timestamp, caller: Caller, call: EscrowCall) -> Result<u64, StoreError> {
        Ok(self.journal.lock().append(at, caller, call))
    }

    fn load(&self) -> Result<Journal, StoreError> {
        Ok(self.journal.lock().clone())
    }

    fn replace(&self, journal: Journal) -> Result<(), StoreError> {
        *self.journal.lock() = journal;
        Ok(())
    }
}

// -- Notifications -------------------------------------------------------------

/// [`NotificationSink`] that keeps every event.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EscrowEvent>>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, oldest first.
    pub fn events(&self) -> Vec<EscrowEvent> {
        self.events.lock().clone()
    }
}

impl NotificationSink for MemorySink {
    fn publish(&self, event: &EscrowEvent) -> Result<(), CollaboratorError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

// -- Directory and scorer ------------------------------------------------------

/// A fixed verifier directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    listings: HashMap<AccountId, (Amount, bool)>,
}

impl StaticDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// List a verifier.
    pub fn insert(&mut self, verifier: AccountId, fee: Amount, active: bool) {
        self.listings.insert(verifier, (fee, active));
    }

    /// Builder form of [`StaticDirectory::insert`].
    pub fn with(mut self, verifier: AccountId, fee: Amount, active: bool) -> Self {
        self.insert(verifier, fee, active);
        self
    }

    /// Number of listings.
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    /// Whether nothing is listed.
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

impl VerifierDirectory for StaticDirectory {
    fn is_active(&self, verifier: &AccountId) -> Result<bool, CollaboratorError> {
        Ok(self.listings.get(verifier).is_some_and(|(_, active)| *active))
    }

    fn quoted_fee(&self, verifier: &AccountId) -> Result<Option<Amount>, CollaboratorError> {
        Ok(self.listings.get(verifier).map(|(fee, _)| *fee))
    }
}

/// A scorer with canned answers.
#[derive(Debug, Clone)]
pub struct StaticScorer {
    default: Result<RiskAssessment, CollaboratorError>,
    overrides: HashMap<RequestId, RiskAssessment>,
}

impl StaticScorer {
    /// Answer every payload with `assessment`.
    pub fn always(assessment: RiskAssessment) -> Self {
        Self {
            default: Ok(assessment),
            overrides: HashMap::new(),
        }
    }

    /// Fail every request that has no override.
    pub fn unavailable() -> Self {
        Self {
            default: Err(CollaboratorError::Unavailable {
                service: "risk scorer",
                reason: "no scorer configured".to_string(),
            }),
            overrides: HashMap::new(),
        }
    }

    /// Answer one request differently.
    pub fn with_override(mut self, request_id: RequestId, assessment: RiskAssessment) -> Self {
        self.overrides.insert(request_id, assessment);
        self
    }
}

impl RiskScorer for StaticScorer {
    fn score(&self, request_id: &RequestId, _payload: &[u8]) -> Result<RiskAssessment, CollaboratorError> {
        match self.overrides.get(request_id) {
            Some(assessment) => Ok(*assessment),
            None => self.default.clone(),
        }
    }
}

// -- Bundle --------------------------------------------------------------------

/// A full set of in-memory adapters with typed handles kept for inspection.
#[derive(Clone)]
pub struct MemoryPorts {
    /// Directory.
    pub directory: Arc<StaticDirectory>,
    /// Records.
    pub records: Arc<MemoryRecordStore>,
    /// Checkpoint slot.
    pub checkpoints: Arc<MemoryCheckpointStore>,
    /// Journal.
    pub journal: Arc<MemoryJournal>,
    /// Event sink.
    pub sink: Arc<MemorySink>,
}

impl MemoryPorts {
    /// Fresh adapters around `directory`, journaling under `policy`.
    pub fn new(directory: StaticDirectory, policy: LedgerPolicy) -> Self {
        Self {
            directory: Arc::new(directory),
            records: Arc::new(MemoryRecordStore::new()),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            journal: Arc::new(MemoryJournal::new(policy)),
            sink: Arc::new(MemorySink::new()),
        }
    }

    /// The adapters as engine ports.
    pub fn ports(&self, scorer: Option<Arc<dyn RiskScorer>>) -> Ports {
        Ports {
            directory: self.directory.clone(),
            scorer,
            records: self.records.clone(),
            checkpoints: self.checkpoints.clone(),
            journal: self.journal.clone(),
            sink: self.sink.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesc_ledger::{EscrowStatus, Hold, HoldChange};

    fn delta(credit: Amount, debit: Amount) -> BalanceDelta {
        BalanceDelta {
            account: AccountId::derive("v"),
            kind: BalanceKind::VerifierEarnings,
            credit,
            debit,
            holds: Vec::new(),
        }
    }

    #[test]
    fn entries_go_through_the_codec() {
        let store = MemoryRecordStore::new();
        let entry = EscrowRequest::new(
            RequestId::parse("0x01").unwrap(),
            AccountId::derive("u"),
            AccountId::derive("v"),
            100,
            Timestamp::from_epoch_secs(0).unwrap(),
            Timestamp::from_epoch_secs(10).unwrap(),
        );
        store.save_entry(&entry).unwrap();
        let loaded = store.load_entry(&entry.request_id).unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert_eq!(loaded.status, EscrowStatus::Created);
        assert_eq!(store.list_entries().unwrap().len(), 1);
        assert!(store.load_entry(&RequestId::parse("0x02").unwrap()).unwrap().is_none());
    }

    #[test]
    fn balance_deltas_accumulate() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.apply_balance(&delta(10, 0)).unwrap(), 10);
        assert_eq!(store.apply_balance(&delta(5, 3)).unwrap(), 12);
        assert_eq!(
            store.load_balance(&AccountId::derive("v"), BalanceKind::VerifierEarnings).unwrap(),
            12
        );
    }

    #[test]
    fn negative_balance_is_rejected_without_write() {
        let store = MemoryRecordStore::new();
        store.apply_balance(&delta(4, 0)).unwrap();
        assert!(matches!(store.apply_balance(&delta(0, 5)), Err(StoreError::Inconsistent(_))));
        assert_eq!(
            store.load_balance(&AccountId::derive("v"), BalanceKind::VerifierEarnings).unwrap(),
            4
        );
    }

    #[test]
    fn holds_are_stored_with_the_bucket() {
        let store = MemoryRecordStore::new();
        let rid = RequestId::parse("0x01").unwrap();
        let hold = Hold {
            request_id: rid,
            amount: 10,
            until: Timestamp::from_epoch_secs(100).unwrap(),
        };
        let place = BalanceDelta {
            holds: vec![HoldChange::Place(hold)],
            ..delta(10, 0)
        };
        store.apply_balance(&place).unwrap();
        let bucket = store
            .load_bucket(&AccountId::derive("v"), BalanceKind::VerifierEarnings)
            .unwrap();
        assert_eq!(bucket.hold(&rid), Some(&hold));

        let lift = BalanceDelta {
            holds: vec![HoldChange::Lift(rid)],
            ..delta(0, 10)
        };
        assert_eq!(store.apply_balance(&lift).unwrap(), 0);
        assert!(store
            .load_bucket(&AccountId::derive("v"), BalanceKind::VerifierEarnings)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn failed_checkpoint_update_keeps_slot() {
        let slot = MemoryCheckpointStore::with_bytes(vec![1, 2, 3]);
        let result = slot.update(&mut |_| Err(StoreError::Inconsistent("no".into())));
        assert!(result.is_err());
        assert_eq!(slot.load().unwrap(), Some(vec![1, 2, 3]));
        slot.update(&mut |current| {
            let mut next = current.unwrap_or_default().to_vec();
            next.push(4);
            Ok(next)
        })
        .unwrap();
        assert_eq!(slot.load().unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn directory_treats_unknown_as_inactive() {
        let v = AccountId::derive("v");
        let directory = StaticDirectory::new().with(v, 7, true);
        assert!(directory.is_active(&v).unwrap());
        assert_eq!(directory.quoted_fee(&v).unwrap(), Some(7));
        let stranger = AccountId::derive("stranger");
        assert!(!directory.is_active(&stranger).unwrap());
        assert_eq!(directory.quoted_fee(&stranger).unwrap(), None);
    }

    #[test]
    fn scorer_overrides() {
        let id = RequestId::parse("0x01").unwrap();
        let flagged = RiskAssessment {
            risk_score: 95,
            flagged: true,
        };
        let scorer = StaticScorer::unavailable().with_override(id, flagged);
        assert_eq!(scorer.score(&id, b"x").unwrap(), flagged);
        assert!(scorer.score(&RequestId::parse("0x02").unwrap(), b"x").is_err());
    }
}
