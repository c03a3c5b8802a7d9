//! # Effects
//!
//! What an accepted call did, as a list the orchestrator can persist and
//! publish without diffing ledgers. [`Effects::summarize`] folds the list
//! into the deltas that are written back.

use serde::{Deserialize, Serialize};

use vesc_core::{AccountId, Amount, BalanceKind, RequestId};

use crate::state::{CounterDelta, CounterKind, Hold, LastEntry};

/// Kinds of externally visible escrow events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A new entry was created.
    Created,
    /// The oracle confirmed the funds.
    FundsLocked,
    /// The verifier submitted its result.
    VerificationSubmitted,
    /// The oracle reported the fraud check.
    FraudCheckCompleted,
    /// A party raised a dispute.
    DisputeRaised,
    /// A resolver ruled.
    DisputeResolved,
    /// Funds were released to the verifier.
    FundsReleased,
    /// Funds were refunded to the user.
    RefundIssued,
    /// An expired entry was cancelled.
    EscrowCancelled,
}

impl EventKind {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::FundsLocked => "FUNDS_LOCKED",
            Self::VerificationSubmitted => "VERIFICATION_SUBMITTED",
            Self::FraudCheckCompleted => "FRAUD_CHECK_COMPLETED",
            Self::DisputeRaised => "DISPUTE_RAISED",
            Self::DisputeResolved => "DISPUTE_RESOLVED",
            Self::FundsReleased => "FUNDS_RELEASED",
            Self::RefundIssued => "REFUND_ISSUED",
            Self::EscrowCancelled => "ESCROW_CANCELLED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One consequence of an accepted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// An event to publish.
    Event {
        /// The event kind.
        kind: EventKind,
        /// The entry it concerns.
        request_id: RequestId,
    },
    /// A pending balance grew.
    Credit {
        /// The credited account.
        account: AccountId,
        /// The bucket.
        kind: BalanceKind,
        /// The amount.
        amount: Amount,
    },
    /// A pending balance shrank.
    Debit {
        /// The debited account.
        account: AccountId,
        /// The bucket.
        kind: BalanceKind,
        /// The amount.
        amount: Amount,
    },
    /// A withdrawal paid out to the caller.
    Payout {
        /// The paid account.
        account: AccountId,
        /// The bucket it was paid from.
        kind: BalanceKind,
        /// The amount.
        amount: Amount,
    },
    /// A counter grew.
    CounterUp {
        /// The counter.
        counter: CounterKind,
        /// The amount.
        amount: Amount,
    },
    /// A counter shrank.
    CounterDown {
        /// The counter.
        counter: CounterKind,
        /// The amount.
        amount: Amount,
    },
    /// A release placed a hold on its credit.
    Hold {
        /// The credited account.
        account: AccountId,
        /// The bucket.
        kind: BalanceKind,
        /// The hold.
        hold: Hold,
    },
    /// A hold was taken off a bucket.
    Lift {
        /// The account.
        account: AccountId,
        /// The bucket.
        kind: BalanceKind,
        /// The entry whose hold is lifted.
        request_id: RequestId,
    },
    /// The last-entry pointer moved.
    Pointer(LastEntry),
}

/// A change to the holds of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldChange {
    /// Place (or replace) an entry's hold.
    Place(Hold),
    /// Remove an entry's hold.
    Lift(RequestId),
}

/// A balance change to write back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    /// The account.
    pub account: AccountId,
    /// The bucket.
    pub kind: BalanceKind,
    /// Amount added.
    pub credit: Amount,
    /// Amount removed.
    pub debit: Amount,
    /// Hold changes, applied in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holds: Vec<HoldChange>,
}

/// The effects of one call folded into write-back form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Events in emission order.
    pub events: Vec<(EventKind, RequestId)>,
    /// Balance changes, one per touched bucket.
    pub balances: Vec<BalanceDelta>,
    /// Counter changes.
    pub counters: CounterDelta,
    /// New pointer, if the call created an entry.
    pub pointer: Option<LastEntry>,
    /// Total paid out by a withdrawal.
    pub withdrawn: Amount,
}

/// Helpers over an effect list.
pub trait Effects {
    /// Fold into a [`Summary`].
    fn summarize(&self) -> Summary;
}

impl Effects for [Effect] {
    fn summarize(&self) -> Summary {
        let mut summary = Summary::default();
        for effect in self {
            match effect {
                Effect::Event { kind, request_id } => summary.events.push((*kind, *request_id)),
                Effect::Credit { account, kind, amount } => {
                    balance_slot(&mut summary.balances, *account, *kind).credit += amount;
                }
                Effect::Debit { account, kind, amount } => {
                    balance_slot(&mut summary.balances, *account, *kind).debit += amount;
                }
                Effect::Hold { account, kind, hold } => {
                    balance_slot(&mut summary.balances, *account, *kind)
                        .holds
                        .push(HoldChange::Place(*hold));
                }
                Effect::Lift {
                    account,
                    kind,
                    request_id,
                } => {
                    balance_slot(&mut summary.balances, *account, *kind)
                        .holds
                        .push(HoldChange::Lift(*request_id));
                }
                Effect::Payout { amount, .. } => summary.withdrawn += amount,
                Effect::CounterUp { counter, amount } => summary.counters.add(*counter, *amount),
                Effect::CounterDown { counter, amount } => summary.counters.sub(*counter, *amount),
                Effect::Pointer(last) => summary.pointer = Some(*last),
            }
        }
        summary
    }
}

fn balance_slot(
    balances: &mut Vec<BalanceDelta>,
    account: AccountId,
    kind: BalanceKind,
) -> &mut BalanceDelta {
    let pos = match balances
        .iter()
        .position(|b| b.account == account && b.kind == kind)
    {
        Some(pos) => pos,
        None => {
            balances.push(BalanceDelta {
                account,
                kind,
                credit: 0,
                debit: 0,
                holds: Vec::new(),
            });
            balances.len() - 1
        }
    };
    &mut balances[pos]
}
