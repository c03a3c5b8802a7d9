//! # vesc-replay: State Reconstruction
//!
//! The escrow host is invoked fresh on every call and keeps no memory.
//! This crate rebuilds what the core needs before a call runs:
//!
//! - **Pointer** ([`pointer`]): decodes the fixed-width [`Checkpoint`]
//!   (counters plus the last-entry pointer) into a working ledger,
//!   degrading to a fresh ledger when the checkpoint is unusable.
//!
//! - **Journal** ([`journal`]): an append-only record of every accepted
//!   call, replayable through the core into the complete ledger.

pub mod journal;
pub mod pointer;

pub use journal::{Journal, JournalError, JournalRecord, Snapshot};
pub use pointer::{reconstruct, Checkpoint, Reconstruction, CHECKPOINT_LEN};
