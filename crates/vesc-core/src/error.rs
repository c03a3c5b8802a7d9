//! # Error Types: Structured Error Hierarchy
//!
//! Defines the errors every escrow call can return. All errors use
//! `thiserror` for derive-based `Display` and `Error` implementations.
//!
//! ## Design
//!
//! - [`ValidationError`]: the call's arguments are unacceptable regardless
//!   of ledger state (zero amount, empty payload, oversized reason).
//! - [`StateError`]: the arguments are fine but the entry is in the wrong
//!   state, or a deadline says no.
//! - [`AuthorizationError`]: the caller's role or account may not make the
//!   call.
//!
//! Every variant names the request or account it concerns so an operator
//! can diagnose a rejection from the message alone. A rejected call never
//! mutates the ledger.

use thiserror::Error;

use crate::amount::Amount;
use crate::identity::{AccountId, RequestId};
use crate::role::{BalanceKind, Role};
use crate::temporal::Timestamp;

/// Top-level error returned by escrow calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// The call's arguments were rejected.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The entry's state does not allow the call.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The caller may not make the call.
    #[error("authorization error: {0}")]
    Authorization(#[from] AuthorizationError),
}

/// Coarse classification of an [`EscrowError`], used for logging levels
/// and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// A [`ValidationError`].
    Validation,
    /// A [`StateError`].
    State,
    /// An [`AuthorizationError`].
    Authorization,
}

impl ErrorClass {
    /// Lowercase label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::State => "state",
            Self::Authorization => "authorization",
        }
    }
}

impl EscrowError {
    /// The class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::State(_) => ErrorClass::State,
            Self::Authorization(_) => ErrorClass::Authorization,
        }
    }
}

/// Argument-level rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An escrow must hold a positive amount.
    #[error("escrow {request_id} rejected: amount must be greater than zero")]
    ZeroAmount {
        /// The request being created.
        request_id: RequestId,
    },

    /// The amount does not cover the verifier's quoted fee.
    #[error("escrow {request_id} rejected: amount {amount} is below the verifier fee {fee}")]
    UnderfundedAmount {
        /// The request being created.
        request_id: RequestId,
        /// The offered amount.
        amount: Amount,
        /// The verifier's quoted fee.
        fee: Amount,
    },

    /// The verifier is unknown or not active.
    #[error("verifier {verifier} is not active")]
    InactiveVerifier {
        /// The verifier account.
        verifier: AccountId,
    },

    /// A request with this id already exists.
    #[error("escrow {request_id} already exists")]
    DuplicateRequest {
        /// The duplicated request id.
        request_id: RequestId,
    },

    /// The verification payload was empty.
    #[error("escrow {request_id} rejected: verification payload is empty")]
    EmptyPayload {
        /// The request being verified.
        request_id: RequestId,
    },

    /// The dispute reason was empty.
    #[error("escrow {request_id} rejected: dispute reason is empty")]
    EmptyReason {
        /// The request being disputed.
        request_id: RequestId,
    },

    /// The dispute reason exceeds the fixed reason slot.
    #[error("dispute reason is {len} bytes, maximum is {max}")]
    ReasonTooLong {
        /// The reason length in bytes.
        len: usize,
        /// The maximum allowed length in bytes.
        max: usize,
    },

    /// Risk scores run from 0 to 100.
    #[error("risk score {score} is out of range 0..=100")]
    RiskScoreOutOfRange {
        /// The reported score.
        score: u8,
    },

    /// A checked arithmetic operation overflowed.
    #[error("arithmetic overflow in {operation}")]
    ArithmeticOverflow {
        /// The operation that overflowed.
        operation: &'static str,
    },

    /// An identifier could not be parsed.
    #[error("invalid {kind} {value:?}: {reason}")]
    InvalidIdentifier {
        /// What kind of identifier was being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A timestamp could not be parsed or represented.
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// State-level rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// No entry exists for the request id.
    #[error("escrow {request_id} does not exist")]
    UnknownRequest {
        /// The unknown request id.
        request_id: RequestId,
    },

    /// The entry's status does not allow the operation.
    #[error("escrow {request_id} cannot perform {operation} in status {status}")]
    InvalidState {
        /// The request id.
        request_id: RequestId,
        /// The attempted operation.
        operation: &'static str,
        /// The current status name.
        status: &'static str,
    },

    /// The entry's deadline has passed.
    #[error("escrow {request_id} expired at {expires_at}")]
    Expired {
        /// The request id.
        request_id: RequestId,
        /// The passed deadline.
        expires_at: Timestamp,
    },

    /// The entry's deadline has not passed yet.
    #[error("escrow {request_id} does not expire until {expires_at}")]
    NotExpired {
        /// The request id.
        request_id: RequestId,
        /// The pending deadline.
        expires_at: Timestamp,
    },

    /// A dispute was already raised for this entry.
    #[error("escrow {request_id} already has a dispute")]
    DuplicateDispute {
        /// The request id.
        request_id: RequestId,
    },

    /// The settled entry can no longer be disputed.
    #[error("dispute window for escrow {request_id} closed at {closed_at}")]
    DisputeWindowClosed {
        /// The request id.
        request_id: RequestId,
        /// When the window closed.
        closed_at: Timestamp,
    },

    /// Reopening the settlement would debit funds that were already paid out.
    #[error("escrow {request_id} cannot be reopened: {kind} of {account} was already withdrawn")]
    SettlementWithdrawn {
        /// The request id.
        request_id: RequestId,
        /// The account that withdrew.
        account: AccountId,
        /// The bucket that no longer holds the settlement.
        kind: BalanceKind,
    },

    /// The caller has nothing to withdraw from the bucket.
    #[error("account {account} has no pending {kind} balance")]
    NoBalance {
        /// The withdrawing account.
        account: AccountId,
        /// The selected bucket.
        kind: BalanceKind,
    },

    /// Everything pending in the bucket is still inside a dispute window.
    #[error("{held} of {kind} for {account} is held until its dispute windows close")]
    BalanceHeld {
        /// The withdrawing account.
        account: AccountId,
        /// The selected bucket.
        kind: BalanceKind,
        /// Amount still held.
        held: Amount,
    },
}

/// Caller-level rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The caller's role does not permit the operation.
    #[error("{operation} requires role {required}, caller has role {actual}")]
    RoleMismatch {
        /// The attempted operation.
        operation: &'static str,
        /// The role (or roles) the operation requires.
        required: &'static str,
        /// The caller's declared role.
        actual: Role,
    },

    /// The caller has the right role but is not the bound party or is not
    /// registered for it.
    #[error("account {account} acting as {role} is not permitted to {operation}")]
    NotPermitted {
        /// The attempted operation.
        operation: &'static str,
        /// The calling account.
        account: AccountId,
        /// The caller's declared role.
        role: Role,
    },
}
