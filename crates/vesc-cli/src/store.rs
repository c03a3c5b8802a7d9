//! # File-Backed State
//!
//! Every CLI invocation is a fresh process, so all engine state lives in a
//! state directory:
//!
//! ```text
//! <state-dir>/
//!   checkpoint.bin        fixed-width checkpoint slot
//!   entries/<id>.bin      one fixed-width entry record per request
//!   disputes/<id>.json    dispute records
//!   balances.json         pending balances per account
//!   journal.json          append-only call journal
//!   events.jsonl          published events, one JSON object per line
//! ```
//!
//! Files are replaced by writing a sibling temp file and renaming it over
//! the original, so a crash never leaves a half-written record. Within a
//! process each file group is guarded by its own mutex; concurrent CLI
//! processes on one state directory are not supported.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use vesc_core::{AccountId, Amount, BalanceKind, Caller, RequestId, Timestamp};
use vesc_engine::memory::apply_delta;
use vesc_engine::{
    CheckpointStore, CheckpointUpdate, CollaboratorError, EngineConfig, EngineError,
    EscrowEngine, EscrowEvent, JournalStore, NotificationSink, Ports, RecordStore, StoreError,
};
use vesc_ledger::codec::{decode_entry, encode_entry};
use vesc_ledger::{
    AccountBalances, BalanceDelta, Bucket, DisputeInfo, EscrowCall, EscrowRequest, LedgerPolicy,
};
use vesc_replay::Journal;

/// Replace `path` atomically with `bytes`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read `path`, or `None` if it does not exist.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn record_name(request_id: &RequestId, extension: &str) -> String {
    format!("{}.{extension}", request_id.to_hex().trim_start_matches("0x"))
}

// -- Records -------------------------------------------------------------------

/// [`RecordStore`] over `entries/`, `disputes/` and `balances.json`.
#[derive(Debug)]
pub struct FileRecordStore {
    root: PathBuf,
    balances: Mutex<()>,
}

impl FileRecordStore {
    /// Open (and create) the record directories under `root`.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.join("entries"))?;
        std::fs::create_dir_all(root.join("disputes"))?;
        Ok(Self {
            root: root.to_path_buf(),
            balances: Mutex::new(()),
        })
    }

    fn entry_path(&self, request_id: &RequestId) -> PathBuf {
        self.root.join("entries").join(record_name(request_id, "bin"))
    }

    fn dispute_path(&self, request_id: &RequestId) -> PathBuf {
        self.root.join("disputes").join(record_name(request_id, "json"))
    }

    fn balances_path(&self) -> PathBuf {
        self.root.join("balances.json")
    }

    fn read_balances(&self) -> Result<BTreeMap<AccountId, AccountBalances>, StoreError> {
        match read_optional(&self.balances_path())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Every account with a non-zero pending balance.
    pub fn all_balances(&self) -> Result<BTreeMap<AccountId, AccountBalances>, StoreError> {
        let _guard = self.balances.lock();
        self.read_balances()
    }
}

impl RecordStore for FileRecordStore {
    fn load_entry(&self, request_id: &RequestId) -> Result<Option<EscrowRequest>, StoreError> {
        read_optional(&self.entry_path(request_id))?
            .map(|bytes| decode_entry(&bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    fn save_entry(&self, entry: &EscrowRequest) -> Result<(), StoreError> {
        write_atomic(&self.entry_path(&entry.request_id), &encode_entry(entry))
    }

    fn list_entries(&self) -> Result<Vec<EscrowRequest>, StoreError> {
        let mut entries = Vec::new();
        for item in std::fs::read_dir(self.root.join("entries"))? {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            match decode_entry(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable entry record");
                }
            }
        }
        entries.sort_by_key(|e| e.request_id);
        Ok(entries)
    }

    fn load_dispute(&self, request_id: &RequestId) -> Result<Option<DisputeInfo>, StoreError> {
        match read_optional(&self.dispute_path(request_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_dispute(&self, dispute: &DisputeInfo) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(dispute)?;
        write_atomic(&self.dispute_path(&dispute.request_id), &json)
    }

    fn load_bucket(&self, account: &AccountId, kind: BalanceKind) -> Result<Bucket, StoreError> {
        let _guard = self.balances.lock();
        Ok(self
            .read_balances()?
            .get(account)
            .map(|b| b.bucket(kind).clone())
            .unwrap_or_default())
    }

    fn apply_balance(&self, delta: &BalanceDelta) -> Result<Amount, StoreError> {
        let _guard = self.balances.lock();
        let mut balances = self.read_balances()?;
        let slot = balances.entry(delta.account).or_default();
        let next = apply_delta(slot.bucket(delta.kind).clone(), delta)?;
        let total = next.amount;
        *slot.bucket_mut(delta.kind) = next;
        if slot.is_empty() {
            balances.remove(&delta.account);
        }
        write_atomic(&self.balances_path(), &serde_json::to_vec_pretty(&balances)?)?;
        Ok(total)
    }
}

// -- Checkpoint ----------------------------------------------------------------

/// [`CheckpointStore`] over `checkpoint.bin`.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// The slot at `root/checkpoint.bin`.
    pub fn open(root: &Path) -> Self {
        Self {
            path: root.join("checkpoint.bin"),
            lock: Mutex::new(()),
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.lock.lock();
        read_optional(&self.path)
    }

    fn update(&self, update: &mut CheckpointUpdate<'_>) -> Result<Vec<u8>, StoreError> {
        let _guard = self.lock.lock();
        let current = read_optional(&self.path)?;
        let next = update(current.as_deref())?;
        write_atomic(&self.path, &next)?;
        Ok(next)
    }
}

// -- Journal -------------------------------------------------------------------

/// [`JournalStore`] over `journal.json`.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    policy: LedgerPolicy,
    lock: Mutex<()>,
}

impl FileJournal {
    /// The journal at `root/journal.json`, created under `policy` if missing.
    pub fn open(root: &Path, policy: LedgerPolicy) -> Self {
        Self {
            path: root.join("journal.json"),
            policy,
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<Journal, StoreError> {
        match read_optional(&self.path)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Journal::new(self.policy.clone())),
        }
    }

    fn write(&self, journal: &Journal) -> Result<(), StoreError> {
        write_atomic(&self.path, journal.to_json()?.as_bytes())
    }
}

impl JournalStore for FileJournal {
    fn append(&self, at: Timestamp, caller: Caller, call: EscrowCall) -> Result<u64, StoreError> {
        let _guard = self.lock.lock();
        let mut journal = self.read()?;
        let seq = journal.append(at, caller, call);
        self.write(&journal)?;
        Ok(seq)
    }

    fn load(&self) -> Result<Journal, StoreError> {
        let _guard = self.lock.lock();
        self.read()
    }

    fn replace(&self, journal: Journal) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        self.write(&journal)
    }
}

// -- Events --------------------------------------------------------------------

/// [`NotificationSink`] appending to `events.jsonl`.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    /// The sink at `root/events.jsonl`.
    pub fn open(root: &Path) -> Self {
        Self {
            path: root.join("events.jsonl"),
            lock: Mutex::new(()),
        }
    }

    /// Every event written so far.
    pub fn read_all(&self) -> Result<Vec<EscrowEvent>, StoreError> {
        let _guard = self.lock.lock();
        let Some(bytes) = read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }
}

impl NotificationSink for JsonlSink {
    fn publish(&self, event: &EscrowEvent) -> Result<(), CollaboratorError> {
        let unavailable = |reason: String| CollaboratorError::Unavailable {
            service: "event log",
            reason,
        };
        let line = serde_json::to_string(event).map_err(|e| unavailable(e.to_string()))?;
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| unavailable(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| unavailable(e.to_string()))
    }
}

// -- Assembly ------------------------------------------------------------------

/// The file adapters of one state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    /// Records.
    pub records: Arc<FileRecordStore>,
    /// Checkpoint slot.
    pub checkpoints: Arc<FileCheckpointStore>,
    /// Journal.
    pub journal: Arc<FileJournal>,
    /// Event log.
    pub events: Arc<JsonlSink>,
}

impl StateDir {
    /// Open (and create) the state directory at `root`.
    pub fn open(root: &Path, policy: LedgerPolicy) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            records: Arc::new(FileRecordStore::open(root)?),
            checkpoints: Arc::new(FileCheckpointStore::open(root)),
            journal: Arc::new(FileJournal::open(root, policy)),
            events: Arc::new(JsonlSink::open(root)),
        })
    }
}

/// Open the state directory and build an engine over it. The verifier
/// directory comes from the configuration.
pub fn open_engine(root: &Path, config: &EngineConfig) -> Result<(EscrowEngine, StateDir), EngineError> {
    let state = StateDir::open(root, config.policy()?)?;
    let ports = Ports {
        directory: Arc::new(config.directory()?),
        scorer: None,
        records: state.records.clone(),
        checkpoints: state.checkpoints.clone(),
        journal: state.journal.clone(),
        sink: state.events.clone(),
    };
    Ok((EscrowEngine::new(config, ports)?, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesc_ledger::{DisputeReason, EventKind, Hold, HoldChange};

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(secs).unwrap()
    }

    fn entry() -> EscrowRequest {
        EscrowRequest::new(
            RequestId::parse("0x01").unwrap(),
            AccountId::derive("user"),
            AccountId::derive("verifier"),
            250,
            ts(0),
            ts(100),
        )
    }

    #[test]
    fn entries_roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let records = FileRecordStore::open(dir.path()).unwrap();
        records.save_entry(&entry()).unwrap();
        assert_eq!(records.load_entry(&entry().request_id).unwrap(), Some(entry()));
        assert_eq!(records.list_entries().unwrap(), vec![entry()]);
        assert!(records
            .load_entry(&RequestId::parse("0x02").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let records = FileRecordStore::open(dir.path()).unwrap();
        records.save_entry(&entry()).unwrap();
        std::fs::write(dir.path().join("entries").join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("entries").join("broken.bin"), [1, 2, 3]).unwrap();
        assert_eq!(records.list_entries().unwrap().len(), 1);
    }

    #[test]
    fn disputes_are_json() {
        let dir = tempfile::tempdir().unwrap();
        let records = FileRecordStore::open(dir.path()).unwrap();
        let dispute = DisputeInfo {
            request_id: entry().request_id,
            initiator: AccountId::derive("user"),
            reason: DisputeReason::new("late").unwrap(),
            created_at: ts(5),
            resolved_at: None,
            resolver: None,
            user_favored: false,
            resolution: String::new(),
        };
        records.save_dispute(&dispute).unwrap();
        assert_eq!(records.load_dispute(&dispute.request_id).unwrap(), Some(dispute));
    }

    #[test]
    fn balances_apply_deltas_and_drop_empty_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let records = FileRecordStore::open(dir.path()).unwrap();
        let account = AccountId::derive("verifier");
        let rid = RequestId::parse("0x01").unwrap();
        let hold = Hold {
            request_id: rid,
            amount: 40,
            until: ts(100),
        };
        let credit = BalanceDelta {
            account,
            kind: BalanceKind::VerifierEarnings,
            credit: 40,
            debit: 0,
            holds: vec![HoldChange::Place(hold)],
        };
        assert_eq!(records.apply_balance(&credit).unwrap(), 40);
        assert_eq!(records.load_balance(&account, BalanceKind::VerifierEarnings).unwrap(), 40);

        // Holds survive the trip through balances.json.
        let reopened = FileRecordStore::open(dir.path()).unwrap();
        let bucket = reopened.load_bucket(&account, BalanceKind::VerifierEarnings).unwrap();
        assert_eq!(bucket.hold(&rid), Some(&hold));

        let debit = BalanceDelta {
            credit: 0,
            debit: 40,
            holds: vec![HoldChange::Lift(rid)],
            ..credit
        };
        assert_eq!(records.apply_balance(&debit).unwrap(), 0);
        assert!(records.all_balances().unwrap().is_empty());
        assert!(records.apply_balance(&debit).is_err());
    }

    #[test]
    fn checkpoint_update_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FileCheckpointStore::open(dir.path());
        assert_eq!(slot.load().unwrap(), None);
        slot.update(&mut |current| {
            assert!(current.is_none());
            Ok(vec![7; 4])
        })
        .unwrap();
        assert_eq!(slot.load().unwrap(), Some(vec![7; 4]));
        assert!(!dir.path().join("checkpoint.tmp").exists());
    }

    #[test]
    fn journal_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let policy = LedgerPolicy::new(AccountId::derive("platform"));
        let journal = FileJournal::open(dir.path(), policy.clone());
        let call = EscrowCall::LockFunds {
            request_id: RequestId::parse("0x01").unwrap(),
        };
        assert_eq!(journal.append(ts(1), Caller::oracle(AccountId::derive("o")), call).unwrap(), 1);
        let reopened = FileJournal::open(dir.path(), policy);
        assert_eq!(reopened.load().unwrap().len(), 1);
    }

    #[test]
    fn events_append_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::open(dir.path());
        let event = EscrowEvent {
            kind: EventKind::Created,
            request_id: RequestId::parse("0x01").unwrap(),
            counters: Default::default(),
            at: ts(0),
        };
        sink.publish(&event).unwrap();
        sink.publish(&event).unwrap();
        assert_eq!(sink.read_all().unwrap(), vec![event.clone(), event]);
    }
}
