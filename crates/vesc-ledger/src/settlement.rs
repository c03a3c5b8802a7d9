//! # Settlement
//!
//! The only code that moves money. Every movement is split in two: a
//! `plan_*` function that reads the ledger and performs all checked
//! arithmetic, and a `commit` that writes the planned values and cannot
//! fail. A call that fails planning leaves the ledger untouched.
//!
//! ## Security Invariant
//!
//! Fees are `floor(amount * fee_bps / 10_000)` and the verifier share is
//! `amount - fee`, so a release always credits exactly `amount`. Refunds
//! credit the user with the full amount. Either way the entry's amount is
//! counted once, in `released` or in `refunded`.
//!
//! A release that can still be disputed places a [`Hold`] on each credit.
//! Withdrawals pay only unheld credit, and a reversal takes back exactly
//! the holds of its own entry, never credit another entry left in the
//! same bucket.

use vesc_core::{
    AccountId, Amount, BalanceKind, EscrowError, RequestId, StateError, Timestamp,
    ValidationError,
};

use crate::effects::{Effect, EventKind};
use crate::gate::Verdict;
use crate::policy::LedgerPolicy;
use crate::state::{Bucket, CounterKind, DisputeStatus, EscrowStatus, Hold, Ledger};

fn overflow(operation: &'static str) -> EscrowError {
    ValidationError::ArithmeticOverflow { operation }.into()
}

fn credited(ledger: &Ledger, account: &AccountId, kind: BalanceKind, amount: Amount) -> Result<Amount, EscrowError> {
    ledger
        .balance(account, kind)
        .checked_add(amount)
        .ok_or_else(|| overflow("pending balance + amount"))
}

fn require_entry(ledger: &Ledger, request_id: &RequestId) -> Result<(), EscrowError> {
    if ledger.entry(request_id).is_none() {
        return Err(StateError::UnknownRequest {
            request_id: *request_id,
        }
        .into());
    }
    Ok(())
}

// ── Release / Refund ───────────────────────────────────────────────────

/// One planned credit.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedCredit {
    account: AccountId,
    kind: BalanceKind,
    amount: Amount,
    bucket: Bucket,
    hold: Option<Hold>,
}

impl PlannedCredit {
    fn new(
        ledger: &Ledger,
        account: AccountId,
        kind: BalanceKind,
        amount: Amount,
        hold: Option<Hold>,
    ) -> Result<Self, EscrowError> {
        let mut bucket = ledger.bucket(&account, kind);
        bucket.amount = credited(ledger, &account, kind, amount)?;
        if let Some(hold) = hold {
            bucket.holds.retain(|h| h.request_id != hold.request_id);
            bucket.holds.push(hold);
        }
        Ok(Self {
            account,
            kind,
            amount,
            bucket,
            hold,
        })
    }
}

/// A validated settlement of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    request_id: RequestId,
    verdict: Verdict,
    credits: Vec<PlannedCredit>,
    counter: CounterKind,
    counter_value: Amount,
    amount: Amount,
    verifier_share: Amount,
    platform_fee: Amount,
    fee_recipient: Option<AccountId>,
}

impl SettlementPlan {
    /// Write the settlement.
    pub fn commit(self, ledger: &mut Ledger, now: Timestamp) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(self.credits.len() * 2 + 2);
        for credit in self.credits {
            effects.push(Effect::Credit {
                account: credit.account,
                kind: credit.kind,
                amount: credit.amount,
            });
            if let Some(hold) = credit.hold {
                effects.push(Effect::Hold {
                    account: credit.account,
                    kind: credit.kind,
                    hold,
                });
            }
            ledger.set_bucket(credit.account, credit.kind, credit.bucket);
        }
        ledger.counters.set(self.counter, self.counter_value);
        effects.push(Effect::CounterUp {
            counter: self.counter,
            amount: self.amount,
        });

        let (status, event) = match self.verdict {
            Verdict::ReleaseToVerifier => (EscrowStatus::Completed, EventKind::FundsReleased),
            Verdict::RefundUser => (EscrowStatus::Refunded, EventKind::RefundIssued),
        };
        if let Some(entry) = ledger.entries.get_mut(&self.request_id) {
            entry.status = status;
            entry.settled_at = Some(now);
            entry.verifier_share = self.verifier_share;
            entry.platform_fee = self.platform_fee;
            entry.fee_recipient = self.fee_recipient;
        }
        effects.push(Effect::Event {
            kind: event,
            request_id: self.request_id,
        });
        effects
    }
}

/// Plan the settlement of `request_id` according to `verdict` at `now`.
///
/// A release of an entry that was never disputed stays disputable for
/// `policy.dispute_window_secs`, so its credits are held until then. A
/// release that ends a dispute is final and is not held.
pub fn plan_settlement(
    ledger: &Ledger,
    policy: &LedgerPolicy,
    request_id: &RequestId,
    verdict: Verdict,
    now: Timestamp,
) -> Result<SettlementPlan, EscrowError> {
    require_entry(ledger, request_id)?;
    let entry = &ledger.entries[request_id];
    let amount = entry.amount;

    match verdict {
        Verdict::RefundUser => {
            let credit = PlannedCredit::new(ledger, entry.user, BalanceKind::UserRefund, amount, None)?;
            let refunded = ledger.counters.checked_increase(CounterKind::Refunded, amount)?;
            Ok(SettlementPlan {
                request_id: *request_id,
                verdict,
                credits: vec![credit],
                counter: CounterKind::Refunded,
                counter_value: refunded,
                amount,
                verifier_share: 0,
                platform_fee: 0,
                fee_recipient: None,
            })
        }
        Verdict::ReleaseToVerifier => {
            let fee = policy.platform_fee(amount)?;
            let share = amount
                .checked_sub(fee)
                .ok_or_else(|| overflow("amount - platform fee"))?;
            let until = if entry.dispute_status == DisputeStatus::None {
                Some(now.plus_seconds(policy.dispute_window_secs)?)
            } else {
                None
            };
            let hold = |amount: Amount| {
                until.map(|until| Hold {
                    request_id: *request_id,
                    amount,
                    until,
                })
            };

            let mut credits = Vec::with_capacity(2);
            for (account, kind, part) in [
                (entry.verifier, BalanceKind::VerifierEarnings, share),
                (policy.fee_recipient, BalanceKind::PlatformFee, fee),
            ] {
                if part > 0 {
                    credits.push(PlannedCredit::new(ledger, account, kind, part, hold(part))?);
                }
            }
            let released = ledger.counters.checked_increase(CounterKind::Released, amount)?;
            Ok(SettlementPlan {
                request_id: *request_id,
                verdict,
                credits,
                counter: CounterKind::Released,
                counter_value: released,
                amount,
                verifier_share: share,
                platform_fee: fee,
                fee_recipient: Some(policy.fee_recipient),
            })
        }
    }
}

// ── Reversal ───────────────────────────────────────────────────────────

/// A validated reversal of a completed release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalPlan {
    request_id: RequestId,
    /// Debits as (account, bucket, amount, bucket after the debit).
    debits: Vec<(AccountId, BalanceKind, Amount, Bucket)>,
    released: Amount,
    amount: Amount,
}

impl ReversalPlan {
    /// Write the reversal. The entry's status is left to the caller.
    pub fn commit(self, ledger: &mut Ledger) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(self.debits.len() * 2 + 1);
        for (account, kind, amount, bucket) in self.debits {
            ledger.set_bucket(account, kind, bucket);
            effects.push(Effect::Debit { account, kind, amount });
            effects.push(Effect::Lift {
                account,
                kind,
                request_id: self.request_id,
            });
        }
        ledger.counters.released = self.released;
        effects.push(Effect::CounterDown {
            counter: CounterKind::Released,
            amount: self.amount,
        });
        if let Some(entry) = ledger.entries.get_mut(&self.request_id) {
            entry.verifier_share = 0;
            entry.platform_fee = 0;
            entry.fee_recipient = None;
        }
        effects
    }
}

/// Plan taking back the credits of a completed release.
///
/// Only the entry's own holds are consumed: the verifier's share from the
/// verifier and the fee from the account the release credited it to.
/// Fails with [`StateError::SettlementWithdrawn`] when either hold is gone.
pub fn plan_reversal(ledger: &Ledger, request_id: &RequestId) -> Result<ReversalPlan, EscrowError> {
    require_entry(ledger, request_id)?;
    let entry = &ledger.entries[request_id];

    let mut parts = vec![(entry.verifier, BalanceKind::VerifierEarnings, entry.verifier_share)];
    if let Some(recipient) = entry.fee_recipient {
        parts.push((recipient, BalanceKind::PlatformFee, entry.platform_fee));
    }

    let mut debits = Vec::with_capacity(parts.len());
    for (account, kind, amount) in parts {
        if amount == 0 {
            continue;
        }
        let withdrawn = StateError::SettlementWithdrawn {
            request_id: *request_id,
            account,
            kind,
        };
        let mut bucket = ledger.bucket(&account, kind);
        if !matches!(bucket.hold(request_id), Some(hold) if hold.amount == amount) {
            return Err(withdrawn.into());
        }
        bucket.amount = bucket.amount.checked_sub(amount).ok_or(withdrawn)?;
        bucket.holds.retain(|h| h.request_id != *request_id);
        debits.push((account, kind, amount, bucket));
    }
    let released = ledger.counters.checked_decrease(CounterKind::Released, entry.amount)?;

    Ok(ReversalPlan {
        request_id: *request_id,
        debits,
        released,
        amount: entry.amount,
    })
}

// ── Cancellation ───────────────────────────────────────────────────────

/// A validated cancellation refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationPlan {
    request_id: RequestId,
    user: AccountId,
    amount: Amount,
    balance: Amount,
    refunded: Amount,
}

impl CancellationPlan {
    /// Write the cancellation.
    pub fn commit(self, ledger: &mut Ledger, now: Timestamp) -> Vec<Effect> {
        ledger.set_balance(self.user, BalanceKind::UserRefund, self.balance);
        ledger.counters.refunded = self.refunded;
        if let Some(entry) = ledger.entries.get_mut(&self.request_id) {
            entry.status = EscrowStatus::Cancelled;
            entry.settled_at = Some(now);
        }
        vec![
            Effect::Credit {
                account: self.user,
                kind: BalanceKind::UserRefund,
                amount: self.amount,
            },
            Effect::CounterUp {
                counter: CounterKind::Refunded,
                amount: self.amount,
            },
            Effect::Event {
                kind: EventKind::EscrowCancelled,
                request_id: self.request_id,
            },
        ]
    }
}

/// Plan returning the full amount of an expired entry to its user.
pub fn plan_cancellation(ledger: &Ledger, request_id: &RequestId) -> Result<CancellationPlan, EscrowError> {
    require_entry(ledger, request_id)?;
    let entry = &ledger.entries[request_id];
    Ok(CancellationPlan {
        request_id: *request_id,
        user: entry.user,
        amount: entry.amount,
        balance: credited(ledger, &entry.user, BalanceKind::UserRefund, entry.amount)?,
        refunded: ledger.counters.checked_increase(CounterKind::Refunded, entry.amount)?,
    })
}

// ── Withdrawal ─────────────────────────────────────────────────────────

/// A validated withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalPlan {
    account: AccountId,
    kind: BalanceKind,
    amount: Amount,
    bucket: Bucket,
    lapsed: Vec<RequestId>,
}

impl WithdrawalPlan {
    /// The amount that will be paid.
    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Pay the unheld credit, keep the held remainder and drop lapsed holds.
    pub fn commit(self, ledger: &mut Ledger) -> Vec<Effect> {
        let mut effects = vec![
            Effect::Debit {
                account: self.account,
                kind: self.kind,
                amount: self.amount,
            },
            Effect::Payout {
                account: self.account,
                kind: self.kind,
                amount: self.amount,
            },
        ];
        effects.extend(self.lapsed.into_iter().map(|request_id| Effect::Lift {
            account: self.account,
            kind: self.kind,
            request_id,
        }));
        ledger.set_bucket(self.account, self.kind, self.bucket);
        effects
    }
}

/// Plan paying out what one account bucket holds free of disputes at `now`.
pub fn plan_withdrawal(
    ledger: &Ledger,
    account: &AccountId,
    kind: BalanceKind,
    now: Timestamp,
) -> Result<WithdrawalPlan, EscrowError> {
    let current = ledger.bucket(account, kind);
    let amount = current.available_at(now);
    if amount == 0 {
        let held = current.held_at(now);
        return Err(if held > 0 {
            StateError::BalanceHeld {
                account: *account,
                kind,
                held,
            }
        } else {
            StateError::NoBalance {
                account: *account,
                kind,
            }
        }
        .into());
    }

    let (active, lapsed): (Vec<Hold>, Vec<Hold>) =
        current.holds.iter().partition(|h| h.is_active_at(now));
    let bucket = Bucket {
        amount: current.amount - amount,
        holds: active,
    };
    Ok(WithdrawalPlan {
        account: *account,
        kind,
        amount,
        bucket,
        lapsed: lapsed.into_iter().map(|h| h.request_id).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EscrowRequest;

    const WINDOW: i64 = crate::policy::DEFAULT_DISPUTE_WINDOW_SECS as i64;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(secs).unwrap()
    }

    fn rid() -> RequestId {
        RequestId::parse("0xaa").unwrap()
    }

    fn other() -> RequestId {
        RequestId::parse("0xbb").unwrap()
    }

    fn verifier() -> AccountId {
        AccountId::derive("verifier")
    }

    fn policy() -> LedgerPolicy {
        LedgerPolicy::new(AccountId::derive("platform"))
    }

    fn pending_entry(ledger: &mut Ledger, request_id: RequestId, amount: Amount) {
        let mut entry = EscrowRequest::new(
            request_id,
            AccountId::derive("user"),
            verifier(),
            amount,
            ts(0),
            ts(1_000),
        );
        entry.status = EscrowStatus::FraudCheckPending;
        ledger.entries.insert(request_id, entry);
        ledger.counters.created += amount;
        ledger.counters.locked += amount;
    }

    fn ledger_with(amount: Amount) -> Ledger {
        let mut ledger = Ledger::new();
        pending_entry(&mut ledger, rid(), amount);
        ledger
    }

    fn release(ledger: &mut Ledger, request_id: &RequestId, now: i64) -> Vec<Effect> {
        plan_settlement(ledger, &policy(), request_id, Verdict::ReleaseToVerifier, ts(now))
            .unwrap()
            .commit(ledger, ts(now))
    }

    #[test]
    fn release_splits_fee() {
        let mut ledger = ledger_with(100);
        let effects = release(&mut ledger, &rid(), 10);
        assert_eq!(ledger.balance(&verifier(), BalanceKind::VerifierEarnings), 97);
        assert_eq!(ledger.balance(&AccountId::derive("platform"), BalanceKind::PlatformFee), 3);
        assert_eq!(ledger.counters.released, 100);
        let entry = ledger.entry(&rid()).unwrap();
        assert_eq!(entry.status, EscrowStatus::Completed);
        assert_eq!(entry.settled_at, Some(ts(10)));
        assert_eq!(entry.verifier_share + entry.platform_fee, 100);
        assert_eq!(entry.fee_recipient, Some(AccountId::derive("platform")));
        assert!(effects.contains(&Effect::Event {
            kind: EventKind::FundsReleased,
            request_id: rid()
        }));
    }

    #[test]
    fn release_holds_credit_until_window_closes() {
        let mut ledger = ledger_with(100);
        release(&mut ledger, &rid(), 10);
        let bucket = ledger.bucket(&verifier(), BalanceKind::VerifierEarnings);
        assert_eq!(bucket.hold(&rid()).map(|h| h.until), Some(ts(10 + WINDOW)));
        assert_eq!(bucket.available_at(ts(10 + WINDOW)), 0);
        assert_eq!(bucket.available_at(ts(11 + WINDOW)), 97);
    }

    #[test]
    fn release_after_dispute_is_not_held() {
        let mut ledger = ledger_with(100);
        if let Some(entry) = ledger.entries.get_mut(&rid()) {
            entry.dispute_status = DisputeStatus::Open;
        }
        release(&mut ledger, &rid(), 10);
        let bucket = ledger.bucket(&verifier(), BalanceKind::VerifierEarnings);
        assert!(bucket.holds.is_empty());
        assert_eq!(bucket.available_at(ts(10)), 97);
    }

    #[test]
    fn refund_credits_full_amount() {
        let mut ledger = ledger_with(100);
        plan_settlement(&ledger, &policy(), &rid(), Verdict::RefundUser, ts(10))
            .unwrap()
            .commit(&mut ledger, ts(10));
        assert_eq!(ledger.balance(&AccountId::derive("user"), BalanceKind::UserRefund), 100);
        assert_eq!(ledger.balance(&verifier(), BalanceKind::VerifierEarnings), 0);
        assert_eq!(ledger.counters.refunded, 100);
        assert_eq!(ledger.entry(&rid()).unwrap().status, EscrowStatus::Refunded);
        assert!(ledger.bucket(&AccountId::derive("user"), BalanceKind::UserRefund).holds.is_empty());
    }

    #[test]
    fn overflow_leaves_ledger_untouched() {
        let mut ledger = ledger_with(100);
        ledger.counters.released = u64::MAX;
        let before = ledger.clone();
        let err = plan_settlement(&ledger, &policy(), &rid(), Verdict::ReleaseToVerifier, ts(10)).unwrap_err();
        assert!(matches!(
            err,
            EscrowError::Validation(ValidationError::ArithmeticOverflow { .. })
        ));
        assert_eq!(ledger, before);
    }

    #[test]
    fn reversal_undoes_release() {
        let mut ledger = ledger_with(100);
        release(&mut ledger, &rid(), 10);
        plan_reversal(&ledger, &rid()).unwrap().commit(&mut ledger);
        assert_eq!(ledger.counters.released, 0);
        assert!(ledger.balances.is_empty());
        assert_eq!(ledger.entry(&rid()).unwrap().fee_recipient, None);
    }

    #[test]
    fn reversal_takes_back_only_its_own_credit() {
        let mut ledger = ledger_with(100);
        pending_entry(&mut ledger, other(), 100);
        release(&mut ledger, &rid(), 10);
        plan_withdrawal(&ledger, &verifier(), BalanceKind::VerifierEarnings, ts(11 + WINDOW))
            .unwrap()
            .commit(&mut ledger);
        release(&mut ledger, &other(), 20 + WINDOW);

        // The first entry's hold lapsed and was paid; the second entry's
        // credit in the same bucket is not available to reverse the first.
        let err = plan_reversal(&ledger, &rid()).unwrap_err();
        assert!(matches!(
            err,
            EscrowError::State(StateError::SettlementWithdrawn { .. })
        ));
        assert_eq!(ledger.balance(&verifier(), BalanceKind::VerifierEarnings), 97);
    }

    #[test]
    fn reversal_debits_recorded_fee_recipient() {
        let mut ledger = ledger_with(100);
        pending_entry(&mut ledger, other(), 100);
        release(&mut ledger, &rid(), 10);
        let treasury = AccountId::derive("treasury");
        let moved = LedgerPolicy::new(treasury);
        plan_settlement(&ledger, &moved, &other(), Verdict::ReleaseToVerifier, ts(20))
            .unwrap()
            .commit(&mut ledger, ts(20));

        plan_reversal(&ledger, &rid()).unwrap().commit(&mut ledger);
        assert_eq!(ledger.balance(&AccountId::derive("platform"), BalanceKind::PlatformFee), 0);
        assert_eq!(ledger.balance(&treasury, BalanceKind::PlatformFee), 3);
        assert_eq!(ledger.balance(&verifier(), BalanceKind::VerifierEarnings), 97);
    }

    #[test]
    fn withdrawal_pays_only_unheld_credit() {
        let mut ledger = ledger_with(100);
        pending_entry(&mut ledger, other(), 50);
        release(&mut ledger, &rid(), 10);
        release(&mut ledger, &other(), 100);

        let err = plan_withdrawal(&ledger, &verifier(), BalanceKind::VerifierEarnings, ts(50)).unwrap_err();
        assert!(matches!(
            err,
            EscrowError::State(StateError::BalanceHeld { held: 146, .. })
        ));

        let plan = plan_withdrawal(&ledger, &verifier(), BalanceKind::VerifierEarnings, ts(11 + WINDOW)).unwrap();
        assert_eq!(plan.amount(), 97);
        let effects = plan.commit(&mut ledger);
        assert!(effects.contains(&Effect::Lift {
            account: verifier(),
            kind: BalanceKind::VerifierEarnings,
            request_id: rid(),
        }));
        let bucket = ledger.bucket(&verifier(), BalanceKind::VerifierEarnings);
        assert_eq!(bucket.amount, 49);
        assert_eq!(bucket.holds.len(), 1);

        // The second entry is still disputable and still reversible.
        plan_reversal(&ledger, &other()).unwrap().commit(&mut ledger);
        assert_eq!(ledger.balance(&verifier(), BalanceKind::VerifierEarnings), 0);
    }

    #[test]
    fn withdrawal_of_empty_bucket_rejected() {
        let ledger = Ledger::new();
        let err = plan_withdrawal(&ledger, &AccountId::derive("x"), BalanceKind::UserRefund, ts(0)).unwrap_err();
        assert!(matches!(err, EscrowError::State(StateError::NoBalance { .. })));
    }

    #[test]
    fn cancellation_refunds_user() {
        let mut ledger = ledger_with(40);
        plan_cancellation(&ledger, &rid()).unwrap().commit(&mut ledger, ts(2_000));
        assert_eq!(ledger.balance(&AccountId::derive("user"), BalanceKind::UserRefund), 40);
        assert_eq!(ledger.counters.refunded, 40);
        assert_eq!(ledger.entry(&rid()).unwrap().status, EscrowStatus::Cancelled);
    }
}
