//! # vesc-engine: Escrow Orchestrator
//!
//! Wraps the pure state machine from `vesc-ledger` in everything a
//! stateless host needs to run it against real storage:
//!
//! - **Engine** ([`engine`]): the per-invocation pipeline, from scope
//!   entry through reconstruction, hydration and apply to delta
//!   write-back and event publication.
//!
//! - **Ports** ([`ports`]): the collaborator traits the engine is built on.
//!
//! - **Memory** ([`memory`]): in-memory adapters for every port.
//!
//! - **Scope** ([`scope`]): per-entry and per-bucket serialization.
//!
//! - **Config** ([`config`]): YAML configuration.
//!
//! ## Concurrency
//!
//! Calls on the same entry run one at a time, as do withdrawals from the
//! same balance bucket. Everything else runs in parallel and meets only at
//! the atomic delta write-back.

pub mod config;
pub mod engine;
pub mod memory;
pub mod ports;
pub mod scope;

pub use config::{account_ref, ConfigError, EngineConfig, VerifierListing};
pub use engine::{EngineError, EscrowEngine, Receipt, SweepReport};
pub use memory::{
    MemoryCheckpointStore, MemoryJournal, MemoryPorts, MemoryRecordStore, MemorySink,
    StaticDirectory, StaticScorer, Store,
};
pub use ports::{
    CheckpointStore, CheckpointUpdate, CollaboratorError, EscrowEvent, JournalStore,
    NotificationSink, Ports, RecordStore, RiskAssessment, RiskScorer, StoreError,
    VerifierDirectory,
};
pub use scope::{ScopeKey, Scopes};
