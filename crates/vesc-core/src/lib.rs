#![deny(missing_docs)]

//! # vesc-core: Foundational Types for the Escrow Engine
//!
//! This crate defines the types that every other crate in the workspace
//! depends on. It has no internal crate dependencies, only `serde`,
//! `thiserror`, `chrono`, and `sha2` from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** [`RequestId`], [`AccountId`] and
//!    [`DataRef`] are distinct 32-byte types. You cannot pass a verifier
//!    account where a request id is expected.
//!
//! 2. **Fixed-width everything.** Identifiers are 32 bytes, amounts are
//!    `u64` in the smallest currency unit, timestamps are whole seconds.
//!    The ledger codec relies on this to encode entries at a fixed width.
//!
//! 3. **Explicit caller roles.** Every call carries a [`Caller`]; the state
//!    machine checks it itself instead of trusting an outer gate.
//!
//! 4. **[`EscrowError`] hierarchy.** Validation, state and authorization
//!    failures are separate enums so callers can react to the class of
//!    failure without string matching.

pub mod amount;
pub mod error;
pub mod identity;
pub mod role;
pub mod temporal;

// Re-export primary types at crate root for ergonomic imports.
pub use amount::{Amount, BPS_DENOMINATOR, MAX_RISK_SCORE};
pub use error::{AuthorizationError, ErrorClass, EscrowError, StateError, ValidationError};
pub use identity::{AccountId, DataRef, RequestId, ID_LEN};
pub use role::{BalanceKind, Caller, Role};
pub use temporal::Timestamp;
