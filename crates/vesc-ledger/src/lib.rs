//! # vesc-ledger: Escrow State Machine and Settlement
//!
//! Everything that decides what happens to escrowed money, with no I/O:
//!
//! - **State** ([`state`]): entries, dispute records, pending balances and
//!   the aggregate counters, held in an explicit [`Ledger`] value.
//!
//! - **Policy** ([`policy`]): fee rate, privileged accounts and time windows.
//!
//! - **Machine** ([`machine`]): [`apply`], the pure transition function.
//!
//! - **Settlement** ([`settlement`]): the only code that moves money.
//!
//! - **Gate** ([`gate`]): maps fraud assessments and dispute rulings onto a
//!   single [`Verdict`].
//!
//! - **Effects** ([`effects`]): what an accepted call did, in a form the
//!   orchestrator can write back as deltas.
//!
//! - **Codec** ([`codec`]): fixed-width binary layouts for storage slots.

pub mod codec;
pub mod effects;
pub mod gate;
pub mod machine;
pub mod policy;
pub mod settlement;
pub mod state;

// Re-export primary types for ergonomic imports.

// State
pub use state::{
    AccountBalances, Bucket, CounterDelta, CounterKind, Counters, DisputeInfo, DisputeReason,
    DisputeStatus, EscrowRequest, EscrowStatus, Hold, LastEntry, Ledger, MAX_REASON_LEN,
};

// Machine
pub use machine::{apply, EscrowCall, VerifierQuote};
pub use policy::LedgerPolicy;

// Gate
pub use gate::{FraudAssessment, FraudPolicy, Ruling, Verdict};

// Effects
pub use effects::{BalanceDelta, Effect, Effects, EventKind, HoldChange, Summary};

// Codec
pub use codec::CodecError;
