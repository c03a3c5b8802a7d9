//! # Ledger State
//!
//! The data the state machine operates on: escrow entries, dispute
//! records, pending balances and the aggregate counters.
//!
//! ## Status Graph
//!
//! ```text
//! Created ──lockFunds──▶ FundsLocked ──submitVerification──▶ VerificationSubmitted
//!    │                        │                                     │
//!    └─cancelExpired─┐        └─cancelExpired─┐                     ▼
//!                    ▼                        ▼              FraudCheckPending
//!                Cancelled                Cancelled           │     │      │
//!                                          completeFraudCheck─┘     │      │
//!                                        ┌──────────────────────────┘      │
//!                                        ▼                                 │
//!                             Completed | Refunded        raiseDispute (after window)
//!                                 │                                        │
//!                       raiseDispute (inside window)                       │
//!                                 ▼                                        ▼
//!                           DisputeRaised ◀────────────────────────────────┘
//!                                 │
//!                           resolveDispute
//!                                 ▼
//!                             Resolved ──▶ Completed | Refunded
//! ```
//!
//! ## Security Invariant
//!
//! `released + refunded <= created` holds after every accepted call. A
//! Completed entry may be reopened once by a dispute; the release is
//! reversed before the dispute is settled so the net credit lands on one
//! side only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use vesc_core::{
    AccountId, Amount, BalanceKind, DataRef, RequestId, Timestamp, ValidationError,
};

use crate::effects::{BalanceDelta, HoldChange};

/// Maximum dispute reason length in bytes.
pub const MAX_REASON_LEN: usize = 128;

// ── Escrow Status ──────────────────────────────────────────────────────

/// Lifecycle status of an escrow entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Funded by the user, awaiting the oracle's lock confirmation.
    Created,
    /// Funds confirmed locked; the verifier may submit.
    FundsLocked,
    /// The verifier has submitted its result.
    VerificationSubmitted,
    /// Awaiting the oracle's fraud-check outcome.
    FraudCheckPending,
    /// A party contested the outcome; awaiting a resolver.
    DisputeRaised,
    /// A resolver ruled; settlement follows in the same call.
    Resolved,
    /// Funds released to the verifier (minus the platform fee). Terminal.
    Completed,
    /// Funds refunded to the user. Terminal.
    Refunded,
    /// Expired before verification; funds returned. Terminal.
    Cancelled,
}

impl EscrowStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::FundsLocked => "FUNDS_LOCKED",
            Self::VerificationSubmitted => "VERIFICATION_SUBMITTED",
            Self::FraudCheckPending => "FRAUD_CHECK_PENDING",
            Self::DisputeRaised => "DISPUTE_RAISED",
            Self::Resolved => "RESOLVED",
            Self::Completed => "COMPLETED",
            Self::Refunded => "REFUNDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether this status is a final outcome.
    ///
    /// Completed is final but keeps one outgoing edge: a dispute raised
    /// inside the dispute window reopens it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Cancelled)
    }

    /// Valid target statuses from this status.
    pub fn valid_transitions(&self) -> &'static [EscrowStatus] {
        match self {
            Self::Created => &[Self::FundsLocked, Self::Cancelled],
            Self::FundsLocked => &[Self::VerificationSubmitted, Self::Cancelled],
            Self::VerificationSubmitted => &[Self::FraudCheckPending, Self::DisputeRaised],
            Self::FraudCheckPending => &[Self::Completed, Self::Refunded, Self::DisputeRaised],
            Self::DisputeRaised => &[Self::Resolved],
            Self::Resolved => &[Self::Completed, Self::Refunded],
            Self::Completed => &[Self::DisputeRaised],
            Self::Refunded | Self::Cancelled => &[],
        }
    }

    /// Whether `target` is reachable from this status in one step.
    pub fn can_transition_to(&self, target: EscrowStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Codec tag.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::FundsLocked => 1,
            Self::VerificationSubmitted => 2,
            Self::FraudCheckPending => 3,
            Self::DisputeRaised => 4,
            Self::Resolved => 5,
            Self::Completed => 6,
            Self::Refunded => 7,
            Self::Cancelled => 8,
        }
    }

    /// Inverse of [`EscrowStatus::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Created,
            1 => Self::FundsLocked,
            2 => Self::VerificationSubmitted,
            3 => Self::FraudCheckPending,
            4 => Self::DisputeRaised,
            5 => Self::Resolved,
            6 => Self::Completed,
            7 => Self::Refunded,
            8 => Self::Cancelled,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Dispute Status ─────────────────────────────────────────────────────

/// Dispute progress recorded on the entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    /// No dispute was ever raised.
    #[default]
    None,
    /// A dispute is awaiting a resolver.
    Open,
    /// Resolved with a refund to the user.
    ResolvedForUser,
    /// Resolved with a release to the verifier.
    ResolvedForVerifier,
}

impl DisputeStatus {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Open => "OPEN",
            Self::ResolvedForUser => "RESOLVED_FOR_USER",
            Self::ResolvedForVerifier => "RESOLVED_FOR_VERIFIER",
        }
    }

    /// Codec tag.
    pub fn tag(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Open => 1,
            Self::ResolvedForUser => 2,
            Self::ResolvedForVerifier => 3,
        }
    }

    /// Inverse of [`DisputeStatus::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::None,
            1 => Self::Open,
            2 => Self::ResolvedForUser,
            3 => Self::ResolvedForVerifier,
            _ => return None,
        })
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Dispute Reason ─────────────────────────────────────────────────────

/// A UTF-8 dispute reason of at most [`MAX_REASON_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisputeReason(String);

impl DisputeReason {
    /// Validate and wrap a reason.
    pub fn new(reason: impl Into<String>) -> Result<Self, ValidationError> {
        let reason = reason.into();
        if reason.len() > MAX_REASON_LEN {
            return Err(ValidationError::ReasonTooLong {
                len: reason.len(),
                max: MAX_REASON_LEN,
            });
        }
        Ok(Self(reason))
    }

    /// The reason text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the reason is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<String> for DisputeReason {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DisputeReason> for String {
    fn from(value: DisputeReason) -> Self {
        value.0
    }
}

// ── Escrow Entry ───────────────────────────────────────────────────────

/// One escrow unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRequest {
    /// Unique request identifier.
    pub request_id: RequestId,
    /// The paying user.
    pub user: AccountId,
    /// The assigned verifier.
    pub verifier: AccountId,
    /// Escrowed amount in the smallest unit.
    pub amount: Amount,
    /// When the entry was created.
    pub created_at: Timestamp,
    /// Deadline for lock and submission.
    pub expires_at: Timestamp,
    /// Current status.
    pub status: EscrowStatus,
    /// Reference to the submitted verification payload.
    pub verification_data: Option<DataRef>,
    /// Oracle risk score, 0–100.
    pub fraud_score: u8,
    /// Oracle fraud verdict.
    pub fraud_detected: bool,
    /// Dispute progress.
    pub dispute_status: DisputeStatus,
    /// Reason given when the dispute was raised.
    pub dispute_reason: DisputeReason,
    /// Resolver that ruled on the dispute.
    pub resolver: Option<AccountId>,
    /// When the dispute was resolved.
    pub resolved_at: Option<Timestamp>,
    /// When verification was submitted; anchors the fraud-check window.
    pub submitted_at: Option<Timestamp>,
    /// When the entry last settled; anchors the dispute window.
    pub settled_at: Option<Timestamp>,
    /// Verifier share credited by the last release.
    pub verifier_share: Amount,
    /// Platform fee credited by the last release.
    pub platform_fee: Amount,
    /// Account the last release credited with the platform fee.
    pub fee_recipient: Option<AccountId>,
}

impl EscrowRequest {
    /// A freshly created entry.
    pub fn new(
        request_id: RequestId,
        user: AccountId,
        verifier: AccountId,
        amount: Amount,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            request_id,
            user,
            verifier,
            amount,
            created_at,
            expires_at,
            status: EscrowStatus::Created,
            verification_data: None,
            fraud_score: 0,
            fraud_detected: false,
            dispute_status: DisputeStatus::None,
            dispute_reason: DisputeReason::default(),
            resolver: None,
            resolved_at: None,
            submitted_at: None,
            settled_at: None,
            verifier_share: 0,
            platform_fee: 0,
            fee_recipient: None,
        }
    }

    /// Rebuild the Created-state entry a [`LastEntry`] pointer describes.
    pub fn from_last_entry(last: &LastEntry) -> Self {
        Self::new(
            last.request_id,
            last.user,
            last.verifier,
            last.amount,
            last.created_at,
            last.expires_at,
        )
    }

    /// The pointer describing this entry.
    pub fn last_entry(&self) -> LastEntry {
        LastEntry {
            request_id: self.request_id,
            user: self.user,
            verifier: self.verifier,
            amount: self.amount,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    /// Whether the entry's deadline has passed at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_passed_at(now)
    }
}

// ── Dispute Record ─────────────────────────────────────────────────────

/// Detail of a raised dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeInfo {
    /// The disputed request.
    pub request_id: RequestId,
    /// The party that raised it.
    pub initiator: AccountId,
    /// Why it was raised.
    pub reason: DisputeReason,
    /// When it was raised.
    pub created_at: Timestamp,
    /// When it was resolved.
    pub resolved_at: Option<Timestamp>,
    /// Who resolved it.
    pub resolver: Option<AccountId>,
    /// Whether the ruling favoured the user.
    pub user_favored: bool,
    /// Free-text resolution.
    pub resolution: String,
}

impl DisputeInfo {
    /// Whether a resolver has ruled.
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

// ── Counters ───────────────────────────────────────────────────────────

/// Aggregate ledger totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counters {
    /// Total amount ever escrowed.
    pub created: Amount,
    /// Total amount confirmed locked.
    pub locked: Amount,
    /// Total amount released to verifiers (net of reopened releases).
    pub released: Amount,
    /// Total amount refunded to users.
    pub refunded: Amount,
}

impl Counters {
    /// Read one counter.
    pub fn get(&self, kind: CounterKind) -> Amount {
        match kind {
            CounterKind::Created => self.created,
            CounterKind::Locked => self.locked,
            CounterKind::Released => self.released,
            CounterKind::Refunded => self.refunded,
        }
    }

    fn slot(&mut self, kind: CounterKind) -> &mut Amount {
        match kind {
            CounterKind::Created => &mut self.created,
            CounterKind::Locked => &mut self.locked,
            CounterKind::Released => &mut self.released,
            CounterKind::Refunded => &mut self.refunded,
        }
    }

    /// `counter + amount`, checked.
    pub fn checked_increase(&self, kind: CounterKind, amount: Amount) -> Result<Amount, ValidationError> {
        self.get(kind)
            .checked_add(amount)
            .ok_or(ValidationError::ArithmeticOverflow {
                operation: kind.increase_op(),
            })
    }

    /// `counter - amount`, checked.
    pub fn checked_decrease(&self, kind: CounterKind, amount: Amount) -> Result<Amount, ValidationError> {
        self.get(kind)
            .checked_sub(amount)
            .ok_or(ValidationError::ArithmeticOverflow {
                operation: kind.decrease_op(),
            })
    }

    /// Overwrite one counter. Callers validate with the checked helpers first.
    pub fn set(&mut self, kind: CounterKind, value: Amount) {
        *self.slot(kind) = value;
    }

    /// Apply a delta produced elsewhere, checked.
    pub fn apply(&self, delta: &CounterDelta) -> Result<Counters, ValidationError> {
        let mut out = *self;
        for kind in CounterKind::ALL {
            let current = out.get(kind);
            let up = delta.increase(kind);
            let down = delta.decrease(kind);
            let next = current
                .checked_add(up)
                .and_then(|v| v.checked_sub(down))
                .ok_or(ValidationError::ArithmeticOverflow {
                    operation: "counter delta",
                })?;
            out.set(kind, next);
        }
        Ok(out)
    }

    /// `released + refunded <= created`.
    pub fn is_consistent(&self) -> bool {
        self.released
            .checked_add(self.refunded)
            .is_some_and(|settled| settled <= self.created)
    }
}

/// Names one of the four counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// `created`.
    Created,
    /// `locked`.
    Locked,
    /// `released`.
    Released,
    /// `refunded`.
    Refunded,
}

impl CounterKind {
    /// All counters in codec order.
    pub const ALL: [CounterKind; 4] = [
        CounterKind::Created,
        CounterKind::Locked,
        CounterKind::Released,
        CounterKind::Refunded,
    ];

    fn increase_op(&self) -> &'static str {
        match self {
            Self::Created => "created + amount",
            Self::Locked => "locked + amount",
            Self::Released => "released + amount",
            Self::Refunded => "refunded + amount",
        }
    }

    fn decrease_op(&self) -> &'static str {
        match self {
            Self::Created => "created - amount",
            Self::Locked => "locked - amount",
            Self::Released => "released - amount",
            Self::Refunded => "refunded - amount",
        }
    }
}

/// Net change to the counters produced by one call.
///
/// Increases and decreases are tracked separately so the delta can be
/// applied to counters that moved concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterDelta {
    up: Counters,
    down: Counters,
}

impl CounterDelta {
    /// Record an increase.
    pub fn add(&mut self, kind: CounterKind, amount: Amount) {
        let v = self.up.get(kind).saturating_add(amount);
        self.up.set(kind, v);
    }

    /// Record a decrease.
    pub fn sub(&mut self, kind: CounterKind, amount: Amount) {
        let v = self.down.get(kind).saturating_add(amount);
        self.down.set(kind, v);
    }

    /// Total increase of one counter.
    pub fn increase(&self, kind: CounterKind) -> Amount {
        self.up.get(kind)
    }

    /// Total decrease of one counter.
    pub fn decrease(&self, kind: CounterKind) -> Amount {
        self.down.get(kind)
    }

    /// Whether the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.up == Counters::default() && self.down == Counters::default()
    }
}

// ── Last-Entry Pointer ─────────────────────────────────────────────────

/// The most recently created entry, as far as replay needs to know it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastEntry {
    /// Request id.
    pub request_id: RequestId,
    /// Paying user.
    pub user: AccountId,
    /// Assigned verifier.
    pub verifier: AccountId,
    /// Escrowed amount.
    pub amount: Amount,
    /// Creation time.
    pub created_at: Timestamp,
    /// Deadline.
    pub expires_at: Timestamp,
}

// ── Pending Balances ───────────────────────────────────────────────────

/// Release credit that cannot be withdrawn while its entry can still be
/// disputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// The entry whose release placed the hold.
    pub request_id: RequestId,
    /// Amount held.
    pub amount: Amount,
    /// Last instant the entry can be disputed.
    pub until: Timestamp,
}

impl Hold {
    /// Whether the hold still applies at `now`.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        !self.until.is_passed_at(now)
    }
}

/// One pending bucket: the total owed and the holds inside it.
///
/// `amount` includes held credit. Only [`Bucket::available_at`] may be
/// withdrawn; a reversal takes back exactly one entry's hold.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bucket {
    /// Total pending, held or not.
    pub amount: Amount,
    /// Holds placed by releases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holds: Vec<Hold>,
}

impl Bucket {
    /// The hold placed by `request_id`, if any.
    pub fn hold(&self, request_id: &RequestId) -> Option<&Hold> {
        self.holds.iter().find(|h| h.request_id == *request_id)
    }

    /// Credit still held at `now`.
    pub fn held_at(&self, now: Timestamp) -> Amount {
        self.holds
            .iter()
            .filter(|h| h.is_active_at(now))
            .fold(0, |total, h| total.saturating_add(h.amount))
    }

    /// Credit that may be withdrawn at `now`.
    pub fn available_at(&self, now: Timestamp) -> Amount {
        self.amount.saturating_sub(self.held_at(now))
    }

    /// Whether nothing is owed and nothing is held.
    pub fn is_empty(&self) -> bool {
        self.amount == 0 && self.holds.is_empty()
    }

    /// Fold a write-back delta into the bucket. `None` if the amount would
    /// overflow or go negative.
    pub fn apply(&self, delta: &BalanceDelta) -> Option<Bucket> {
        let amount = self.amount.checked_add(delta.credit)?.checked_sub(delta.debit)?;
        let mut holds = self.holds.clone();
        for change in &delta.holds {
            match change {
                HoldChange::Place(hold) => {
                    holds.retain(|h| h.request_id != hold.request_id);
                    holds.push(*hold);
                }
                HoldChange::Lift(request_id) => holds.retain(|h| h.request_id != *request_id),
            }
        }
        Some(Bucket { amount, holds })
    }
}

/// The three pending buckets of one account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountBalances {
    /// Refunds owed to the account as a user.
    pub user_refund: Bucket,
    /// Earnings owed to the account as a verifier.
    pub verifier_earnings: Bucket,
    /// Fee share owed to the account as fee recipient.
    pub platform_fee: Bucket,
}

impl AccountBalances {
    /// Total of one bucket, held or not.
    pub fn get(&self, kind: BalanceKind) -> Amount {
        self.bucket(kind).amount
    }

    /// One bucket.
    pub fn bucket(&self, kind: BalanceKind) -> &Bucket {
        match kind {
            BalanceKind::UserRefund => &self.user_refund,
            BalanceKind::VerifierEarnings => &self.verifier_earnings,
            BalanceKind::PlatformFee => &self.platform_fee,
        }
    }

    /// One bucket, mutably.
    pub fn bucket_mut(&mut self, kind: BalanceKind) -> &mut Bucket {
        match kind {
            BalanceKind::UserRefund => &mut self.user_refund,
            BalanceKind::VerifierEarnings => &mut self.verifier_earnings,
            BalanceKind::PlatformFee => &mut self.platform_fee,
        }
    }

    /// Overwrite the total of one bucket, keeping its holds.
    pub fn set(&mut self, kind: BalanceKind, value: Amount) {
        self.bucket_mut(kind).amount = value;
    }

    /// Whether every bucket is empty.
    pub fn is_empty(&self) -> bool {
        BalanceKind::ALL.iter().all(|kind| self.bucket(*kind).is_empty())
    }
}

// ── Ledger Aggregate ───────────────────────────────────────────────────

/// The aggregate the state machine mutates.
///
/// Held by value and passed by mutable reference into
/// [`apply`](crate::machine::apply); never global.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ledger {
    /// Entries by request id.
    pub entries: BTreeMap<RequestId, EscrowRequest>,
    /// Dispute records by request id.
    pub disputes: BTreeMap<RequestId, DisputeInfo>,
    /// Pending balances by account.
    pub balances: BTreeMap<AccountId, AccountBalances>,
    /// Aggregate totals.
    pub counters: Counters,
    /// Pointer to the most recently created entry.
    pub last_entry: Option<LastEntry>,
}

impl Ledger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry.
    pub fn entry(&self, request_id: &RequestId) -> Option<&EscrowRequest> {
        self.entries.get(request_id)
    }

    /// Look up a dispute record.
    pub fn dispute(&self, request_id: &RequestId) -> Option<&DisputeInfo> {
        self.disputes.get(request_id)
    }

    /// Pending balance of one account bucket.
    pub fn balance(&self, account: &AccountId, kind: BalanceKind) -> Amount {
        self.balances.get(account).map_or(0, |b| b.get(kind))
    }

    /// A copy of one account bucket, empty if the account is unknown.
    pub fn bucket(&self, account: &AccountId, kind: BalanceKind) -> Bucket {
        self.balances
            .get(account)
            .map(|b| b.bucket(kind).clone())
            .unwrap_or_default()
    }

    /// Overwrite the total of one account bucket, dropping empty accounts.
    pub fn set_balance(&mut self, account: AccountId, kind: BalanceKind, value: Amount) {
        let mut bucket = self.bucket(&account, kind);
        bucket.amount = value;
        self.set_bucket(account, kind, bucket);
    }

    /// Replace one account bucket, dropping empty accounts.
    pub fn set_bucket(&mut self, account: AccountId, kind: BalanceKind, bucket: Bucket) {
        let slot = self.balances.entry(account).or_default();
        *slot.bucket_mut(kind) = bucket;
        if slot.is_empty() {
            self.balances.remove(&account);
        }
    }

    /// Insert the Created entry a pointer describes without touching the
    /// counters. An entry already present under the same id wins.
    pub fn replay_create(&mut self, last: &LastEntry) {
        self.entries
            .entry(last.request_id)
            .or_insert_with(|| EscrowRequest::from_last_entry(last));
        self.last_entry = Some(*last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(secs).unwrap()
    }

    fn last() -> LastEntry {
        LastEntry {
            request_id: RequestId::parse("0xaa").unwrap(),
            user: AccountId::derive("user"),
            verifier: AccountId::derive("verifier"),
            amount: 100,
            created_at: ts(1_000),
            expires_at: ts(2_000),
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(EscrowStatus::Completed.is_terminal());
        assert!(EscrowStatus::Refunded.is_terminal());
        assert!(EscrowStatus::Cancelled.is_terminal());
        assert!(!EscrowStatus::FraudCheckPending.is_terminal());
    }

    #[test]
    fn refunded_and_cancelled_have_no_exits() {
        assert!(EscrowStatus::Refunded.valid_transitions().is_empty());
        assert!(EscrowStatus::Cancelled.valid_transitions().is_empty());
    }

    #[test]
    fn completed_only_reopens_into_dispute() {
        assert_eq!(
            EscrowStatus::Completed.valid_transitions(),
            &[EscrowStatus::DisputeRaised]
        );
    }

    #[test]
    fn status_tags_roundtrip() {
        for tag in 0..=8u8 {
            let status = EscrowStatus::from_tag(tag).unwrap();
            assert_eq!(status.tag(), tag);
        }
        assert!(EscrowStatus::from_tag(9).is_none());
    }

    #[test]
    fn dispute_reason_limit() {
        assert!(DisputeReason::new("x".repeat(128)).is_ok());
        let err = DisputeReason::new("x".repeat(129)).unwrap_err();
        assert!(matches!(err, ValidationError::ReasonTooLong { len: 129, max: 128 }));
    }

    #[test]
    fn dispute_reason_serde_enforces_limit() {
        let json = format!("\"{}\"", "y".repeat(200));
        assert!(serde_json::from_str::<DisputeReason>(&json).is_err());
    }

    #[test]
    fn counter_delta_applies_up_and_down() {
        let counters = Counters {
            created: 100,
            locked: 100,
            released: 100,
            refunded: 0,
        };
        let mut delta = CounterDelta::default();
        delta.sub(CounterKind::Released, 100);
        delta.add(CounterKind::Refunded, 100);
        let next = counters.apply(&delta).unwrap();
        assert_eq!(next.released, 0);
        assert_eq!(next.refunded, 100);
        assert!(next.is_consistent());
    }

    #[test]
    fn counter_delta_underflow_rejected() {
        let mut delta = CounterDelta::default();
        delta.sub(CounterKind::Released, 1);
        assert!(Counters::default().apply(&delta).is_err());
    }

    #[test]
    fn replay_create_leaves_counters() {
        let mut ledger = Ledger::new();
        ledger.replay_create(&last());
        assert_eq!(ledger.counters, Counters::default());
        let entry = ledger.entry(&last().request_id).unwrap();
        assert_eq!(entry.status, EscrowStatus::Created);
        assert_eq!(entry.amount, 100);
        assert_eq!(ledger.last_entry, Some(last()));
    }

    #[test]
    fn replay_create_keeps_existing_entry() {
        let mut ledger = Ledger::new();
        let mut entry = EscrowRequest::from_last_entry(&last());
        entry.status = EscrowStatus::Completed;
        ledger.entries.insert(entry.request_id, entry);
        ledger.replay_create(&last());
        assert_eq!(
            ledger.entry(&last().request_id).unwrap().status,
            EscrowStatus::Completed
        );
    }

    #[test]
    fn zero_balances_are_dropped() {
        let mut ledger = Ledger::new();
        let acct = AccountId::derive("v");
        ledger.set_balance(acct, BalanceKind::VerifierEarnings, 5);
        assert_eq!(ledger.balance(&acct, BalanceKind::VerifierEarnings), 5);
        ledger.set_balance(acct, BalanceKind::VerifierEarnings, 0);
        assert!(ledger.balances.is_empty());
    }

    fn hold(n: u8, amount: Amount, until: i64) -> Hold {
        Hold {
            request_id: RequestId::from_bytes([n; 32]),
            amount,
            until: ts(until),
        }
    }

    #[test]
    fn held_credit_is_not_available_until_window_closes() {
        let bucket = Bucket {
            amount: 150,
            holds: vec![hold(1, 97, 100), hold(2, 30, 200)],
        };
        assert_eq!(bucket.available_at(ts(100)), 23);
        assert_eq!(bucket.available_at(ts(101)), 120);
        assert_eq!(bucket.available_at(ts(201)), 150);
        assert_eq!(bucket.hold(&RequestId::from_bytes([2; 32])).map(|h| h.amount), Some(30));
    }

    #[test]
    fn bucket_applies_amounts_and_holds() {
        let account = AccountId::derive("v");
        let place = BalanceDelta {
            account,
            kind: BalanceKind::VerifierEarnings,
            credit: 97,
            debit: 0,
            holds: vec![HoldChange::Place(hold(1, 97, 100))],
        };
        let held = Bucket::default().apply(&place).unwrap();
        assert_eq!(held.amount, 97);
        assert_eq!(held.holds.len(), 1);

        let lift = BalanceDelta {
            credit: 0,
            debit: 97,
            holds: vec![HoldChange::Lift(RequestId::from_bytes([1; 32]))],
            ..place.clone()
        };
        assert!(held.apply(&lift).unwrap().is_empty());
        assert!(Bucket::default().apply(&lift).is_none());
    }

    #[test]
    fn held_bucket_keeps_account() {
        let mut ledger = Ledger::new();
        let acct = AccountId::derive("v");
        let bucket = Bucket {
            amount: 0,
            holds: vec![hold(1, 0, 10)],
        };
        ledger.set_bucket(acct, BalanceKind::VerifierEarnings, bucket.clone());
        assert_eq!(ledger.bucket(&acct, BalanceKind::VerifierEarnings), bucket);
        ledger.set_bucket(acct, BalanceKind::VerifierEarnings, Bucket::default());
        assert!(ledger.balances.is_empty());
    }
}
