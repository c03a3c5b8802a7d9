//! # Replay Reconstructor
//!
//! The stateless host keeps exactly one record between invocations: a
//! [`Checkpoint`] holding the counters and a pointer to the most recently
//! created entry. Before each call the working ledger is rebuilt from it.
//!
//! ## Checkpoint Layout (158 bytes)
//!
//! ```text
//! magic "VESC" [4] | version u8 | counters [32] | has_last u8 | last_entry [120]
//! ```
//!
//! The last-entry slot is zero-filled until the first entry is created.
//!
//! ## Degraded Start
//!
//! A missing or malformed checkpoint does not halt the host. The ledger
//! starts fresh, a WARN is logged and the reconstruction is flagged
//! `degraded` so the caller can surface it.

use vesc_core::ValidationError;
use vesc_ledger::codec::{
    read_counters, read_last_entry, write_counters, write_last_entry, CodecError, Reader, Writer,
    LAST_ENTRY_LEN,
};
use vesc_ledger::{CounterDelta, Counters, LastEntry, Ledger};

/// Leading magic bytes.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"VESC";

/// Current checkpoint layout version.
pub const CHECKPOINT_VERSION: u8 = 1;

/// Width of an encoded checkpoint.
pub const CHECKPOINT_LEN: usize = 158;

/// Counters plus the last-entry pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checkpoint {
    /// Aggregate totals.
    pub counters: Counters,
    /// Most recently created entry.
    pub last_entry: Option<LastEntry>,
}

impl Checkpoint {
    /// The checkpoint describing a ledger.
    pub fn of(ledger: &Ledger) -> Self {
        Self {
            counters: ledger.counters,
            last_entry: ledger.last_entry,
        }
    }

    /// Encode into the fixed 158-byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(CHECKPOINT_LEN);
        w.bytes(&CHECKPOINT_MAGIC);
        w.u8(CHECKPOINT_VERSION);
        write_counters(&mut w, &self.counters);
        match &self.last_entry {
            Some(last) => {
                w.u8(1);
                write_last_entry(&mut w, last);
            }
            None => {
                w.u8(0);
                w.zeros(LAST_ENTRY_LEN);
            }
        }
        w.finish()
    }

    /// Decode the fixed layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes, CHECKPOINT_LEN, "checkpoint")?;
        let magic = r.array::<4>()?;
        if magic != CHECKPOINT_MAGIC {
            return Err(CodecError::BadMagic {
                expected: CHECKPOINT_MAGIC,
                actual: magic,
            });
        }
        let version = r.u8()?;
        if version != CHECKPOINT_VERSION {
            return Err(CodecError::UnsupportedVersion {
                record: "checkpoint",
                version,
            });
        }
        let counters = read_counters(&mut r)?;
        let last_entry = if r.flag("has_last_entry")? {
            Some(read_last_entry(&mut r)?)
        } else {
            None
        };
        Ok(Self {
            counters,
            last_entry,
        })
    }

    /// Fold one call's counter delta and pointer move into this checkpoint.
    ///
    /// Used inside the checkpoint store's atomic update so concurrent calls
    /// on different entries never overwrite each other's counters.
    pub fn advance(
        &self,
        delta: &CounterDelta,
        pointer: Option<LastEntry>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            counters: self.counters.apply(delta)?,
            last_entry: pointer.or(self.last_entry),
        })
    }
}

/// A working ledger rebuilt from a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstruction {
    /// The working ledger: restored counters plus the replayed last entry.
    pub ledger: Ledger,
    /// Whether the checkpoint was missing or malformed.
    pub degraded: bool,
}

/// Rebuild the working ledger from persisted checkpoint bytes.
///
/// Counters are restored verbatim. The pointer is replayed as a synthetic
/// create that inserts a Created entry without touching the counters.
pub fn reconstruct(bytes: Option<&[u8]>) -> Reconstruction {
    let Some(bytes) = bytes else {
        tracing::warn!("no checkpoint found, starting from an empty ledger");
        return Reconstruction {
            ledger: Ledger::new(),
            degraded: true,
        };
    };
    match Checkpoint::decode(bytes) {
        Ok(checkpoint) => Reconstruction {
            ledger: replay(&checkpoint),
            degraded: false,
        },
        Err(e) => {
            tracing::warn!(error = %e, len = bytes.len(), "malformed checkpoint, starting from an empty ledger");
            Reconstruction {
                ledger: Ledger::new(),
                degraded: true,
            }
        }
    }
}

/// Apply a decoded checkpoint to an empty ledger.
pub fn replay(checkpoint: &Checkpoint) -> Ledger {
    let mut ledger = Ledger::new();
    ledger.counters = checkpoint.counters;
    if let Some(last) = &checkpoint.last_entry {
        ledger.replay_create(last);
    }
    ledger
}
