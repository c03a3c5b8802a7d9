//! # Journal Subcommand
//!
//! - `rebuild` replays the journal and compares the result against the
//!   stored counters.
//! - `compact` folds the journal into a snapshot.
//! - `history` lists the journaled calls of one entry.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};

use vesc_core::RequestId;

use crate::Context;

/// Arguments for the `vesc journal` subcommand.
#[derive(Args, Debug)]
pub struct JournalArgs {
    #[command(subcommand)]
    pub command: JournalCommand,
}

/// Journal subcommands.
#[derive(Subcommand, Debug)]
pub enum JournalCommand {
    /// Replay the journal and check it against the stored counters.
    Rebuild,

    /// Fold every record into a snapshot.
    Compact,

    /// List the journaled calls of one entry.
    History {
        /// Request id.
        #[arg(long)]
        id: String,
    },
}

/// Execute the journal subcommand.
pub fn run_journal(args: &JournalArgs, ctx: &Context) -> Result<u8> {
    let (engine, _) = ctx.engine()?;
    match &args.command {
        JournalCommand::Rebuild => {
            let ledger = engine.rebuild_from_journal()?;
            let stored = engine.counters()?;
            if ctx.json {
                let doc = serde_json::json!({
                    "entries": ledger.entries.len(),
                    "disputes": ledger.disputes.len(),
                    "counters": ledger.counters,
                    "stored_counters": stored,
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                println!("Rebuilt {} entries, {} disputes", ledger.entries.len(), ledger.disputes.len());
                println!(
                    "  created {} / locked {} / released {} / refunded {}",
                    ledger.counters.created,
                    ledger.counters.locked,
                    ledger.counters.released,
                    ledger.counters.refunded
                );
            }
            if ledger.counters != stored {
                tracing::warn!(rebuilt = ?ledger.counters, stored = ?stored, "journal and checkpoint disagree");
                eprintln!("MISMATCH: journal counters differ from the stored checkpoint");
                return Ok(1);
            }
            Ok(0)
        }

        JournalCommand::Compact => {
            let seq = engine.compact_journal()?;
            println!("OK: journal compacted through seq {seq}");
            Ok(0)
        }

        JournalCommand::History { id } => {
            let id = RequestId::parse(id).with_context(|| format!("invalid request id {id:?}"))?;
            let records = engine.history(&id)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(0);
            }
            println!("Request: {id}");
            for record in &records {
                println!(
                    "  [{}] {} {} by {} ({})",
                    record.seq,
                    record.at,
                    record.call.name(),
                    record.caller.account,
                    record.caller.role
                );
            }
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::{run_escrow, EscrowCommand};
    use vesc_core::Timestamp;
    use vesc_engine::EngineConfig;

    fn ctx(dir: &std::path::Path) -> Context {
        Context {
            state_dir: dir.to_path_buf(),
            config: EngineConfig::from_yaml_str("verifiers:\n  - id: acme\n").unwrap(),
            now: Timestamp::from_epoch_secs(0).unwrap(),
            json: false,
        }
    }

    fn create(dir: &std::path::Path, id: &str) {
        let cmd = EscrowCommand::Create {
            actor: "alice".into(),
            id: id.into(),
            verifier: "acme".into(),
            amount: 100,
        };
        assert_eq!(run_escrow(&cmd, &ctx(dir)).unwrap(), 0);
    }

    #[test]
    fn rebuild_agrees_with_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), "0x01");
        create(dir.path(), "0x02");
        let args = JournalArgs {
            command: JournalCommand::Rebuild,
        };
        assert_eq!(run_journal(&args, &ctx(dir.path())).unwrap(), 0);
    }

    #[test]
    fn rebuild_detects_lost_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), "0x01");
        std::fs::remove_file(dir.path().join("checkpoint.bin")).unwrap();
        let args = JournalArgs {
            command: JournalCommand::Rebuild,
        };
        assert_eq!(run_journal(&args, &ctx(dir.path())).unwrap(), 1);
    }

    #[test]
    fn compact_then_history_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), "0x01");
        let compact = JournalArgs {
            command: JournalCommand::Compact,
        };
        assert_eq!(run_journal(&compact, &ctx(dir.path())).unwrap(), 0);
        let (engine, _) = ctx(dir.path()).engine().unwrap();
        assert!(engine.history(&RequestId::parse("0x01").unwrap()).unwrap().is_empty());
        assert_eq!(engine.rebuild_from_journal().unwrap().entries.len(), 1);
    }
}
