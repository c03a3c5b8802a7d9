//! # Collaborator Ports
//!
//! The engine never touches storage or the outside world directly. Every
//! dependency is a trait object supplied at construction time:
//!
//! | Port                  | Purpose                                        |
//! |-----------------------|------------------------------------------------|
//! | [`VerifierDirectory`] | Is a verifier active, and what does it charge? |
//! | [`RiskScorer`]        | Score a verification payload.                  |
//! | [`RecordStore`]       | Entries, dispute records and pending balances. |
//! | [`CheckpointStore`]   | The fixed-width checkpoint slot.               |
//! | [`JournalStore`]      | The append-only call journal.                  |
//! | [`NotificationSink`]  | Publish escrow events.                         |
//!
//! ## Security Invariant
//!
//! [`RecordStore::apply_balance`] and [`CheckpointStore::update`] are
//! atomic read-modify-write operations. The engine only ever writes deltas
//! through them, so two calls on different entries cannot overwrite each
//! other's counter or balance changes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vesc_core::{AccountId, Amount, BalanceKind, Caller, RequestId, Timestamp};
use vesc_ledger::{
    BalanceDelta, Bucket, CodecError, Counters, DisputeInfo, EscrowCall, EscrowRequest, EventKind,
};
use vesc_replay::{Journal, JournalError};

/// Errors raised by storage adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem or transport failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored binary record did not decode.
    #[error("store codec error: {0}")]
    Codec(#[from] CodecError),

    /// A journal operation failed.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    /// Stored data contradicts itself.
    #[error("store inconsistency: {0}")]
    Inconsistent(String),
}

/// Errors raised by external collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator could not be reached.
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        /// Which collaborator.
        service: &'static str,
        /// Why.
        reason: String,
    },

    /// The collaborator answered with something unusable.
    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse {
        /// Which collaborator.
        service: &'static str,
        /// Why.
        reason: String,
    },
}

/// The verifier directory.
pub trait VerifierDirectory: Send + Sync {
    /// Whether `verifier` currently accepts work. Unknown verifiers are inactive.
    fn is_active(&self, verifier: &AccountId) -> Result<bool, CollaboratorError>;

    /// The fee `verifier` charges, if it is listed.
    fn quoted_fee(&self, verifier: &AccountId) -> Result<Option<Amount>, CollaboratorError>;
}

/// A risk scorer's raw answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Score, expected in 0–100.
    pub risk_score: u8,
    /// Whether the scorer itself flagged the payload.
    pub flagged: bool,
}

/// Scores verification payloads.
pub trait RiskScorer: Send + Sync {
    /// Score one payload.
    fn score(&self, request_id: &RequestId, payload: &[u8]) -> Result<RiskAssessment, CollaboratorError>;
}

/// Durable entries, dispute records and pending balances.
pub trait RecordStore: Send + Sync {
    /// Load one entry.
    fn load_entry(&self, request_id: &RequestId) -> Result<Option<EscrowRequest>, StoreError>;

    /// Persist one entry, replacing any previous version.
    fn save_entry(&self, entry: &EscrowRequest) -> Result<(), StoreError>;

    /// Every stored entry.
    fn list_entries(&self) -> Result<Vec<EscrowRequest>, StoreError>;

    /// Load one dispute record.
    fn load_dispute(&self, request_id: &RequestId) -> Result<Option<DisputeInfo>, StoreError>;

    /// Persist one dispute record.
    fn save_dispute(&self, dispute: &DisputeInfo) -> Result<(), StoreError>;

    /// One pending bucket with its holds. Unknown buckets are empty.
    fn load_bucket(&self, account: &AccountId, kind: BalanceKind) -> Result<Bucket, StoreError>;

    /// Current pending total of one bucket, held credit included.
    fn load_balance(&self, account: &AccountId, kind: BalanceKind) -> Result<Amount, StoreError> {
        Ok(self.load_bucket(account, kind)?.amount)
    }

    /// Atomically add `credit`, subtract `debit` and apply the hold
    /// changes. Returns the new total.
    ///
    /// Fails with [`StoreError::Inconsistent`] if the result would be
    /// negative or overflow.
    fn apply_balance(&self, delta: &BalanceDelta) -> Result<Amount, StoreError>;
}

/// Read-modify-write step handed to [`CheckpointStore::update`].
pub type CheckpointUpdate<'a> = dyn FnMut(Option<&[u8]>) -> Result<Vec<u8>, StoreError> + 'a;

/// The single persisted checkpoint slot.
pub trait CheckpointStore: Send + Sync {
    /// Current slot contents, if any.
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Atomically replace the slot with `update(current)`. Returns what was
    /// written. The slot is untouched if `update` fails.
    fn update(&self, update: &mut CheckpointUpdate<'_>) -> Result<Vec<u8>, StoreError>;
}

/// The append-only call journal.
pub trait JournalStore: Send + Sync {
    /// Append one accepted call. Returns its sequence number.
    fn append(&self, at: Timestamp, caller: Caller, call: EscrowCall) -> Result<u64, StoreError>;

    /// A copy of the current journal.
    fn load(&self) -> Result<Journal, StoreError>;

    /// Replace the journal, e.g. after compaction.
    fn replace(&self, journal: Journal) -> Result<(), StoreError>;
}

/// A published escrow event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEvent {
    /// What happened.
    pub kind: EventKind,
    /// The entry it concerns.
    pub request_id: RequestId,
    /// Counters after the call committed.
    pub counters: Counters,
    /// When.
    pub at: Timestamp,
}

/// Receives events after a call commits.
pub trait NotificationSink: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: &EscrowEvent) -> Result<(), CollaboratorError>;
}

/// Every collaborator the engine needs.
#[derive(Clone)]
pub struct Ports {
    /// Verifier directory.
    pub directory: Arc<dyn VerifierDirectory>,
    /// Risk scorer. Without one, fraud checks are left to an oracle.
    pub scorer: Option<Arc<dyn RiskScorer>>,
    /// Entries, disputes and balances.
    pub records: Arc<dyn RecordStore>,
    /// The checkpoint slot.
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// The call journal.
    pub journal: Arc<dyn JournalStore>,
    /// Event sink.
    pub sink: Arc<dyn NotificationSink>,
}
