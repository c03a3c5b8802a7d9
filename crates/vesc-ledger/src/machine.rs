//! # State Machine Core
//!
//! [`apply`] is the whole escrow state machine: a pure function from
//! `(ledger, policy, caller, call, now)` to a list of [`Effect`]s or an
//! [`EscrowError`]. It reads no clock, performs no I/O and holds no
//! global state.
//!
//! ## Design Choice: Validated Enum
//!
//! Entries are stored, replayed and transmitted with a status only known at
//! runtime, so statuses are a validated enum rather than typestate. Every
//! operation checks the caller, then the entry's status and deadlines, then
//! plans any money movement; only when every check has passed does it
//! write. A rejected call leaves the ledger exactly as it found it.
//!
//! ## Caller Rules
//!
//! | Call | Caller |
//! |---|---|
//! | create | role User (the caller becomes the entry's user) |
//! | lockFunds, completeFraudCheck | role Oracle, account in the oracle set |
//! | submitVerification | role Verifier, the entry's verifier |
//! | raiseDispute | the entry's user (User) or verifier (Verifier) |
//! | resolveDispute | role DisputeResolver, account in the resolver set |
//! | cancelExpired | anyone |
//! | withdraw | User, Verifier, or the configured FeeRecipient |

use serde::{Deserialize, Serialize};

use vesc_core::{
    AccountId, Amount, AuthorizationError, Caller, DataRef, EscrowError, RequestId, Role,
    StateError, Timestamp, ValidationError,
};

use crate::effects::{Effect, EventKind};
use crate::gate::{FraudAssessment, Ruling};
use crate::policy::LedgerPolicy;
use crate::settlement::{plan_cancellation, plan_reversal, plan_settlement, plan_withdrawal};
use crate::state::{
    CounterKind, DisputeInfo, DisputeReason, DisputeStatus, EscrowRequest, EscrowStatus, Ledger,
};

/// What the verifier directory said about the verifier at create time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierQuote {
    /// Whether the verifier accepts work.
    pub active: bool,
    /// The verifier's fee; the escrowed amount must cover it.
    pub fee: Amount,
}

/// One state-machine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum EscrowCall {
    /// Open a new entry funded by the caller.
    Create {
        /// New request id.
        request_id: RequestId,
        /// Assigned verifier.
        verifier: AccountId,
        /// Escrowed amount.
        amount: Amount,
        /// Directory quote for the verifier.
        quote: VerifierQuote,
    },
    /// Confirm the funds are locked.
    LockFunds {
        /// Target request.
        request_id: RequestId,
    },
    /// Submit the verification payload.
    SubmitVerification {
        /// Target request.
        request_id: RequestId,
        /// Opaque payload; only its digest is kept.
        payload: Vec<u8>,
    },
    /// Report the fraud-check outcome.
    CompleteFraudCheck {
        /// Target request.
        request_id: RequestId,
        /// Risk score, 0–100.
        risk_score: u8,
        /// Whether fraud was detected.
        is_fraud: bool,
    },
    /// Contest the entry.
    RaiseDispute {
        /// Target request.
        request_id: RequestId,
        /// Why.
        reason: String,
    },
    /// Rule on a dispute.
    ResolveDispute {
        /// Target request.
        request_id: RequestId,
        /// Whether the ruling favours the user.
        user_favored: bool,
        /// Free-text resolution.
        resolution: String,
    },
    /// Cancel an entry whose deadline passed before verification.
    CancelExpired {
        /// Target request.
        request_id: RequestId,
    },
    /// Pay out the caller's pending balance for its role.
    Withdraw,
}

impl EscrowCall {
    /// The call's name, as used in logs, metrics and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::LockFunds { .. } => "lockFunds",
            Self::SubmitVerification { .. } => "submitVerification",
            Self::CompleteFraudCheck { .. } => "completeFraudCheck",
            Self::RaiseDispute { .. } => "raiseDispute",
            Self::ResolveDispute { .. } => "resolveDispute",
            Self::CancelExpired { .. } => "cancelExpired",
            Self::Withdraw => "withdraw",
        }
    }

    /// The entry this call targets, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Create { request_id, .. }
            | Self::LockFunds { request_id }
            | Self::SubmitVerification { request_id, .. }
            | Self::CompleteFraudCheck { request_id, .. }
            | Self::RaiseDispute { request_id, .. }
            | Self::ResolveDispute { request_id, .. }
            | Self::CancelExpired { request_id } => Some(*request_id),
            Self::Withdraw => None,
        }
    }
}

/// Apply one call to the ledger.
///
/// # Errors
///
/// Returns the first failed precondition. The ledger is unchanged on error.
pub fn apply(
    ledger: &mut Ledger,
    policy: &LedgerPolicy,
    caller: &Caller,
    call: &EscrowCall,
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    match call {
        EscrowCall::Create {
            request_id,
            verifier,
            amount,
            quote,
        } => create(ledger, policy, caller, *request_id, *verifier, *amount, *quote, now),
        EscrowCall::LockFunds { request_id } => lock_funds(ledger, policy, caller, request_id, now),
        EscrowCall::SubmitVerification {
            request_id,
            payload,
        } => submit_verification(ledger, caller, request_id, payload, now),
        EscrowCall::CompleteFraudCheck {
            request_id,
            risk_score,
            is_fraud,
        } => complete_fraud_check(ledger, policy, caller, request_id, *risk_score, *is_fraud, now),
        EscrowCall::RaiseDispute { request_id, reason } => {
            raise_dispute(ledger, policy, caller, request_id, reason, now)
        }
        EscrowCall::ResolveDispute {
            request_id,
            user_favored,
            resolution,
        } => resolve_dispute(ledger, policy, caller, request_id, *user_favored, resolution, now),
        EscrowCall::CancelExpired { request_id } => cancel_expired(ledger, request_id, now),
        EscrowCall::Withdraw => withdraw(ledger, policy, caller, now),
    }
}

// ── Checks ─────────────────────────────────────────────────────────────

fn require_role(caller: &Caller, role: Role, operation: &'static str) -> Result<(), EscrowError> {
    if caller.role != role {
        return Err(AuthorizationError::RoleMismatch {
            operation,
            required: role.as_str(),
            actual: caller.role,
        }
        .into());
    }
    Ok(())
}

fn not_permitted(caller: &Caller, operation: &'static str) -> EscrowError {
    AuthorizationError::NotPermitted {
        operation,
        account: caller.account,
        role: caller.role,
    }
    .into()
}

fn require_entry<'a>(ledger: &'a Ledger, request_id: &RequestId) -> Result<&'a EscrowRequest, EscrowError> {
    ledger.entry(request_id).ok_or_else(|| {
        StateError::UnknownRequest {
            request_id: *request_id,
        }
        .into()
    })
}

/// Require the entry to be in one of `allowed` and able to move to `target`.
fn require_status(
    entry: &EscrowRequest,
    allowed: &[EscrowStatus],
    target: EscrowStatus,
    operation: &'static str,
) -> Result<(), EscrowError> {
    if !allowed.contains(&entry.status) || !entry.status.can_transition_to(target) {
        return Err(StateError::InvalidState {
            request_id: entry.request_id,
            operation,
            status: entry.status.as_str(),
        }
        .into());
    }
    Ok(())
}

fn require_not_expired(entry: &EscrowRequest, now: Timestamp) -> Result<(), EscrowError> {
    if entry.is_expired_at(now) {
        return Err(StateError::Expired {
            request_id: entry.request_id,
            expires_at: entry.expires_at,
        }
        .into());
    }
    Ok(())
}

fn event(kind: EventKind, request_id: RequestId) -> Effect {
    Effect::Event { kind, request_id }
}

// ── Operations ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn create(
    ledger: &mut Ledger,
    policy: &LedgerPolicy,
    caller: &Caller,
    request_id: RequestId,
    verifier: AccountId,
    amount: Amount,
    quote: VerifierQuote,
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    const OP: &str = "create";
    require_role(caller, Role::User, OP)?;
    if ledger.entries.contains_key(&request_id) {
        return Err(ValidationError::DuplicateRequest { request_id }.into());
    }
    if amount == 0 {
        return Err(ValidationError::ZeroAmount { request_id }.into());
    }
    if !quote.active {
        return Err(ValidationError::InactiveVerifier { verifier }.into());
    }
    if amount < quote.fee {
        return Err(ValidationError::UnderfundedAmount {
            request_id,
            amount,
            fee: quote.fee,
        }
        .into());
    }
    let expires_at = now.plus_seconds(policy.escrow_ttl_secs)?;
    let created = ledger.counters.checked_increase(CounterKind::Created, amount)?;

    let entry = EscrowRequest::new(request_id, caller.account, verifier, amount, now, expires_at);
    let last = entry.last_entry();
    ledger.entries.insert(request_id, entry);
    ledger.counters.created = created;
    ledger.last_entry = Some(last);

    Ok(vec![
        Effect::CounterUp {
            counter: CounterKind::Created,
            amount,
        },
        Effect::Pointer(last),
        event(EventKind::Created, request_id),
    ])
}

fn lock_funds(
    ledger: &mut Ledger,
    policy: &LedgerPolicy,
    caller: &Caller,
    request_id: &RequestId,
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    const OP: &str = "lockFunds";
    require_role(caller, Role::Oracle, OP)?;
    if !policy.is_oracle(&caller.account) {
        return Err(not_permitted(caller, OP));
    }
    let entry = require_entry(ledger, request_id)?;
    require_status(entry, &[EscrowStatus::Created], EscrowStatus::FundsLocked, OP)?;
    require_not_expired(entry, now)?;
    let amount = entry.amount;
    let locked = ledger.counters.checked_increase(CounterKind::Locked, amount)?;

    ledger.counters.locked = locked;
    if let Some(entry) = ledger.entries.get_mut(request_id) {
        entry.status = EscrowStatus::FundsLocked;
    }
    Ok(vec![
        Effect::CounterUp {
            counter: CounterKind::Locked,
            amount,
        },
        event(EventKind::FundsLocked, *request_id),
    ])
}

fn submit_verification(
    ledger: &mut Ledger,
    caller: &Caller,
    request_id: &RequestId,
    payload: &[u8],
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    const OP: &str = "submitVerification";
    require_role(caller, Role::Verifier, OP)?;
    let entry = require_entry(ledger, request_id)?;
    if entry.verifier != caller.account {
        return Err(not_permitted(caller, OP));
    }
    require_status(
        entry,
        &[EscrowStatus::FundsLocked],
        EscrowStatus::VerificationSubmitted,
        OP,
    )?;
    require_not_expired(entry, now)?;
    if payload.is_empty() {
        return Err(ValidationError::EmptyPayload {
            request_id: *request_id,
        }
        .into());
    }

    if let Some(entry) = ledger.entries.get_mut(request_id) {
        entry.verification_data = Some(DataRef::of(payload));
        entry.submitted_at = Some(now);
        // VerificationSubmitted is passed through in the same call.
        entry.status = EscrowStatus::FraudCheckPending;
    }
    Ok(vec![event(EventKind::VerificationSubmitted, *request_id)])
}

#[allow(clippy::too_many_arguments)]
fn complete_fraud_check(
    ledger: &mut Ledger,
    policy: &LedgerPolicy,
    caller: &Caller,
    request_id: &RequestId,
    risk_score: u8,
    is_fraud: bool,
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    const OP: &str = "completeFraudCheck";
    require_role(caller, Role::Oracle, OP)?;
    if !policy.is_oracle(&caller.account) {
        return Err(not_permitted(caller, OP));
    }
    let entry = require_entry(ledger, request_id)?;
    let assessment = FraudAssessment::new(risk_score, is_fraud)?;
    let verdict = assessment.verdict();
    let target = if verdict.favors_user() {
        EscrowStatus::Refunded
    } else {
        EscrowStatus::Completed
    };
    require_status(entry, &[EscrowStatus::FraudCheckPending], target, OP)?;
    let plan = plan_settlement(ledger, policy, request_id, verdict, now)?;

    if let Some(entry) = ledger.entries.get_mut(request_id) {
        entry.fraud_score = assessment.risk_score;
        entry.fraud_detected = assessment.is_fraud;
    }
    let mut effects = vec![event(EventKind::FraudCheckCompleted, *request_id)];
    effects.extend(plan.commit(ledger, now));
    Ok(effects)
}

fn raise_dispute(
    ledger: &mut Ledger,
    policy: &LedgerPolicy,
    caller: &Caller,
    request_id: &RequestId,
    reason: &str,
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    const OP: &str = "raiseDispute";
    if !matches!(caller.role, Role::User | Role::Verifier) {
        return Err(AuthorizationError::RoleMismatch {
            operation: OP,
            required: "USER or VERIFIER",
            actual: caller.role,
        }
        .into());
    }
    let entry = require_entry(ledger, request_id)?;
    let party = match caller.role {
        Role::User => entry.user,
        _ => entry.verifier,
    };
    if party != caller.account {
        return Err(not_permitted(caller, OP));
    }
    require_status(
        entry,
        &[
            EscrowStatus::VerificationSubmitted,
            EscrowStatus::FraudCheckPending,
            EscrowStatus::Completed,
        ],
        EscrowStatus::DisputeRaised,
        OP,
    )?;
    if entry.dispute_status != DisputeStatus::None || ledger.disputes.contains_key(request_id) {
        return Err(StateError::DuplicateDispute {
            request_id: *request_id,
        }
        .into());
    }
    if reason.is_empty() {
        return Err(ValidationError::EmptyReason {
            request_id: *request_id,
        }
        .into());
    }
    let reason = DisputeReason::new(reason)?;

    // A pending fraud check becomes disputable once its window has elapsed.
    if entry.status == EscrowStatus::FraudCheckPending {
        let anchor = entry.submitted_at.unwrap_or(entry.created_at);
        let window_end = anchor.plus_seconds(policy.fraud_check_window_secs)?;
        if !window_end.is_passed_at(now) {
            return Err(StateError::InvalidState {
                request_id: *request_id,
                operation: OP,
                status: entry.status.as_str(),
            }
            .into());
        }
    }

    let reversal = if entry.status == EscrowStatus::Completed {
        let anchor = entry.settled_at.unwrap_or(entry.created_at);
        let closed_at = anchor.plus_seconds(policy.dispute_window_secs)?;
        if closed_at.is_passed_at(now) {
            return Err(StateError::DisputeWindowClosed {
                request_id: *request_id,
                closed_at,
            }
            .into());
        }
        Some(plan_reversal(ledger, request_id)?)
    } else {
        None
    };

    let mut effects = Vec::new();
    if let Some(plan) = reversal {
        effects.extend(plan.commit(ledger));
    }
    if let Some(entry) = ledger.entries.get_mut(request_id) {
        entry.status = EscrowStatus::DisputeRaised;
        entry.dispute_status = DisputeStatus::Open;
        entry.dispute_reason = reason.clone();
    }
    ledger.disputes.insert(
        *request_id,
        DisputeInfo {
            request_id: *request_id,
            initiator: caller.account,
            reason,
            created_at: now,
            resolved_at: None,
            resolver: None,
            user_favored: false,
            resolution: String::new(),
        },
    );
    effects.push(event(EventKind::DisputeRaised, *request_id));
    Ok(effects)
}

#[allow(clippy::too_many_arguments)]
fn resolve_dispute(
    ledger: &mut Ledger,
    policy: &LedgerPolicy,
    caller: &Caller,
    request_id: &RequestId,
    user_favored: bool,
    resolution: &str,
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    const OP: &str = "resolveDispute";
    require_role(caller, Role::DisputeResolver, OP)?;
    if !policy.is_resolver(&caller.account) {
        return Err(not_permitted(caller, OP));
    }
    let entry = require_entry(ledger, request_id)?;
    require_status(entry, &[EscrowStatus::DisputeRaised], EscrowStatus::Resolved, OP)?;
    let ruling = Ruling {
        user_favored,
        resolution: resolution.to_string(),
    };
    let verdict = ruling.verdict();
    let plan = plan_settlement(ledger, policy, request_id, verdict, now)?;

    if let Some(entry) = ledger.entries.get_mut(request_id) {
        entry.status = EscrowStatus::Resolved;
        entry.dispute_status = if verdict.favors_user() {
            DisputeStatus::ResolvedForUser
        } else {
            DisputeStatus::ResolvedForVerifier
        };
        entry.resolver = Some(caller.account);
        entry.resolved_at = Some(now);
    }
    let dispute = ledger
        .disputes
        .entry(*request_id)
        .or_insert_with(|| DisputeInfo {
            request_id: *request_id,
            initiator: caller.account,
            reason: DisputeReason::default(),
            created_at: now,
            resolved_at: None,
            resolver: None,
            user_favored: false,
            resolution: String::new(),
        });
    dispute.resolved_at = Some(now);
    dispute.resolver = Some(caller.account);
    dispute.user_favored = ruling.user_favored;
    dispute.resolution = ruling.resolution;

    let mut effects = vec![event(EventKind::DisputeResolved, *request_id)];
    effects.extend(plan.commit(ledger, now));
    Ok(effects)
}

fn cancel_expired(
    ledger: &mut Ledger,
    request_id: &RequestId,
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    const OP: &str = "cancelExpired";
    let entry = require_entry(ledger, request_id)?;
    require_status(
        entry,
        &[EscrowStatus::Created, EscrowStatus::FundsLocked],
        EscrowStatus::Cancelled,
        OP,
    )?;
    if !entry.is_expired_at(now) {
        return Err(StateError::NotExpired {
            request_id: *request_id,
            expires_at: entry.expires_at,
        }
        .into());
    }
    let plan = plan_cancellation(ledger, request_id)?;
    Ok(plan.commit(ledger, now))
}

fn withdraw(
    ledger: &mut Ledger,
    policy: &LedgerPolicy,
    caller: &Caller,
    now: Timestamp,
) -> Result<Vec<Effect>, EscrowError> {
    const OP: &str = "withdraw";
    let kind = caller.role.balance_kind().ok_or(AuthorizationError::RoleMismatch {
        operation: OP,
        required: "USER, VERIFIER or FEE_RECIPIENT",
        actual: caller.role,
    })?;
    if caller.role == Role::FeeRecipient && caller.account != policy.fee_recipient {
        return Err(not_permitted(caller, OP));
    }
    let plan = plan_withdrawal(ledger, &caller.account, kind, now)?;
    Ok(plan.commit(ledger))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::effects::Effects;
    use proptest::prelude::*;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(secs).unwrap()
    }

    fn policy() -> LedgerPolicy {
        LedgerPolicy::new(AccountId::derive("platform"))
            .with_oracle(AccountId::derive("oracle"))
            .with_resolver(AccountId::derive("resolver"))
    }

    fn arb_step() -> impl Strategy<Value = (u8, u8, u8, bool, u16)> {
        // (which id, which call, score, flag, time offset)
        (0u8..3, 0u8..8, 0u8..=100, any::<bool>(), 0u16..2_000)
    }

    fn build(id: u8, op: u8, score: u8, flag: bool) -> (Caller, EscrowCall) {
        let request_id = RequestId::from_bytes([id; 32]);
        let user = Caller::user(AccountId::derive("user"));
        let verifier = Caller::verifier(AccountId::derive("verifier"));
        match op {
            0 => (
                user,
                EscrowCall::Create {
                    request_id,
                    verifier: verifier.account,
                    amount: 50 + u64::from(score),
                    quote: VerifierQuote { active: true, fee: 1 },
                },
            ),
            1 => (Caller::oracle(AccountId::derive("oracle")), EscrowCall::LockFunds { request_id }),
            2 => (
                verifier,
                EscrowCall::SubmitVerification {
                    request_id,
                    payload: vec![id, 1, 2],
                },
            ),
            3 => (
                Caller::oracle(AccountId::derive("oracle")),
                EscrowCall::CompleteFraudCheck {
                    request_id,
                    risk_score: score,
                    is_fraud: flag,
                },
            ),
            4 => (
                if flag { user } else { verifier },
                EscrowCall::RaiseDispute {
                    request_id,
                    reason: "contested".to_string(),
                },
            ),
            5 => (
                Caller::resolver(AccountId::derive("resolver")),
                EscrowCall::ResolveDispute {
                    request_id,
                    user_favored: flag,
                    resolution: "ruled".to_string(),
                },
            ),
            6 => (user, EscrowCall::CancelExpired { request_id }),
            _ => (if flag { user } else { verifier }, EscrowCall::Withdraw),
        }
    }

    fn pending_total(ledger: &Ledger) -> u128 {
        ledger
            .balances
            .values()
            .flat_map(|b| vesc_core::BalanceKind::ALL.map(|kind| b.get(kind)))
            .map(u128::from)
            .sum()
    }

    proptest! {
        #[test]
        fn settled_never_exceeds_created(steps in proptest::collection::vec(arb_step(), 0..60)) {
            let mut policy = policy();
            policy.escrow_ttl_secs = 500;
            policy.fraud_check_window_secs = 100;
            policy.dispute_window_secs = 300;
            let mut ledger = Ledger::new();
            let mut now = 0i64;
            let mut paid = 0u128;
            for (id, op, score, flag, dt) in steps {
                now += i64::from(dt);
                let (caller, call) = build(id, op, score, flag);
                let before = ledger.clone();
                match apply(&mut ledger, &policy, &caller, &call, ts(now)) {
                    Ok(effects) => paid += u128::from(effects.summarize().withdrawn),
                    Err(_) => prop_assert_eq!(&ledger, &before),
                }
                prop_assert!(ledger.counters.is_consistent());
                let settled = u128::from(ledger.counters.released) + u128::from(ledger.counters.refunded);
                prop_assert_eq!(pending_total(&ledger) + paid, settled);
            }
        }
    }
}
