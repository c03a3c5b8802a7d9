//! # Escrow Subcommands
//!
//! One subcommand per state-machine call, plus read-only queries. Accounts
//! are given as `0x`-prefixed hex or as labels (hashed into ids), matching
//! the configuration file.
//!
//! The role of the caller is implied by the subcommand where the call
//! admits only one (`lock` is always an oracle); `dispute` and `withdraw`
//! take an explicit `--role`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Subcommand, ValueEnum};

use vesc_core::{AccountId, BalanceKind, Caller, RequestId, Role};
use vesc_engine::{account_ref, EngineError, EscrowEngine, Receipt};

use crate::{exit_code, Context};

/// Escrow subcommands.
#[derive(Subcommand, Debug)]
pub enum EscrowCommand {
    /// Open a new escrow entry as the paying user.
    Create {
        /// Calling user.
        #[arg(long = "as")]
        actor: String,
        /// New request id (hex).
        #[arg(long)]
        id: String,
        /// Assigned verifier.
        #[arg(long)]
        verifier: String,
        /// Escrowed amount.
        #[arg(long)]
        amount: u64,
    },

    /// Confirm an entry's funds are locked (CREATED → FUNDS_LOCKED).
    Lock {
        /// Calling oracle.
        #[arg(long = "as")]
        actor: String,
        /// Request id.
        #[arg(long)]
        id: String,
    },

    /// Submit the verification result (FUNDS_LOCKED → FRAUD_CHECK_PENDING).
    Submit {
        /// Calling verifier.
        #[arg(long = "as")]
        actor: String,
        /// Request id.
        #[arg(long)]
        id: String,
        /// Inline payload.
        #[arg(long, conflicts_with = "payload_file", required_unless_present = "payload_file")]
        payload: Option<String>,
        /// Read the payload from a file.
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },

    /// Report the fraud-check outcome and settle the entry.
    FraudCheck {
        /// Calling oracle.
        #[arg(long = "as")]
        actor: String,
        /// Request id.
        #[arg(long)]
        id: String,
        /// Risk score, 0–100.
        #[arg(long)]
        score: u8,
        /// Mark the submission as fraudulent.
        #[arg(long)]
        fraud: bool,
    },

    /// Contest an entry as its user or verifier.
    Dispute {
        /// Calling party.
        #[arg(long = "as")]
        actor: String,
        /// Which party the caller is.
        #[arg(long, value_enum, default_value = "user")]
        role: PartyRole,
        /// Request id.
        #[arg(long)]
        id: String,
        /// Why.
        #[arg(long)]
        reason: String,
    },

    /// Rule on an open dispute.
    Resolve {
        /// Calling resolver.
        #[arg(long = "as")]
        actor: String,
        /// Request id.
        #[arg(long)]
        id: String,
        /// Which side the ruling favours.
        #[arg(long, value_enum)]
        favor: PartyRole,
        /// Free-text resolution.
        #[arg(long, default_value = "")]
        resolution: String,
    },

    /// Cancel an entry whose deadline passed before verification.
    Cancel {
        /// Caller.
        #[arg(long = "as")]
        actor: String,
        /// Request id.
        #[arg(long)]
        id: String,
    },

    /// Pay out the caller's pending balance that is no longer disputable.
    Withdraw {
        /// Caller.
        #[arg(long = "as")]
        actor: String,
        /// Which bucket to withdraw from.
        #[arg(long, value_enum)]
        role: PayeeRole,
    },

    /// Show one entry and its dispute record.
    Status {
        /// Request id.
        #[arg(long)]
        id: String,
    },

    /// Show the aggregate counters.
    Counters,

    /// Show one account's pending balances.
    Balance {
        /// Account.
        #[arg(long)]
        account: String,
    },

    /// Cancel every expired, unverified entry.
    Sweep {
        /// Caller recorded for the cancellations.
        #[arg(long = "as")]
        actor: String,
    },
}

/// A party to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PartyRole {
    /// The paying user.
    User,
    /// The assigned verifier.
    Verifier,
}

/// An account that can hold a pending balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PayeeRole {
    /// Refunds.
    User,
    /// Verifier earnings.
    Verifier,
    /// Platform fees.
    FeeRecipient,
}

impl From<PartyRole> for Role {
    fn from(role: PartyRole) -> Self {
        match role {
            PartyRole::User => Role::User,
            PartyRole::Verifier => Role::Verifier,
        }
    }
}

impl From<PayeeRole> for Role {
    fn from(role: PayeeRole) -> Self {
        match role {
            PayeeRole::User => Role::User,
            PayeeRole::Verifier => Role::Verifier,
            PayeeRole::FeeRecipient => Role::FeeRecipient,
        }
    }
}

fn account(reference: &str) -> Result<AccountId> {
    account_ref(reference).with_context(|| format!("invalid account {reference:?}"))
}

fn caller(reference: &str, role: Role) -> Result<Caller> {
    Ok(Caller::new(account(reference)?, role))
}

fn request(id: &str) -> Result<RequestId> {
    RequestId::parse(id).with_context(|| format!("invalid request id {id:?}"))
}

/// Execute an escrow subcommand.
pub fn run_escrow(command: &EscrowCommand, ctx: &Context) -> Result<u8> {
    let (engine, state) = ctx.engine()?;
    let now = ctx.now;

    let outcome = match command {
        EscrowCommand::Create {
            actor,
            id,
            verifier,
            amount,
        } => engine.create(&caller(actor, Role::User)?, request(id)?, account(verifier)?, *amount, now),

        EscrowCommand::Lock { actor, id } => engine.lock_funds(&caller(actor, Role::Oracle)?, request(id)?, now),

        EscrowCommand::Submit {
            actor,
            id,
            payload,
            payload_file,
        } => {
            let payload = match (payload, payload_file) {
                (Some(inline), _) => inline.clone().into_bytes(),
                (None, Some(path)) => std::fs::read(path)
                    .with_context(|| format!("failed to read payload {}", path.display()))?,
                (None, None) => Vec::new(),
            };
            engine.submit_verification(&caller(actor, Role::Verifier)?, request(id)?, payload, now)
        }

        EscrowCommand::FraudCheck {
            actor,
            id,
            score,
            fraud,
        } => engine.complete_fraud_check(&caller(actor, Role::Oracle)?, request(id)?, *score, *fraud, now),

        EscrowCommand::Dispute {
            actor,
            role,
            id,
            reason,
        } => engine.raise_dispute(&caller(actor, (*role).into())?, request(id)?, reason.as_str(), now),

        EscrowCommand::Resolve {
            actor,
            id,
            favor,
            resolution,
        } => engine.resolve_dispute(
            &caller(actor, Role::DisputeResolver)?,
            request(id)?,
            *favor == PartyRole::User,
            resolution.as_str(),
            now,
        ),

        EscrowCommand::Cancel { actor, id } => engine.cancel_expired(&caller(actor, Role::User)?, request(id)?, now),

        EscrowCommand::Withdraw { actor, role } => engine.withdraw(&caller(actor, (*role).into())?, now),

        EscrowCommand::Status { id } => return cmd_status(&engine, ctx, &request(id)?),

        EscrowCommand::Counters => {
            let counters = engine.counters()?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&counters)?);
            } else {
                println!("Counters:");
                println!("  created:  {}", counters.created);
                println!("  locked:   {}", counters.locked);
                println!("  released: {}", counters.released);
                println!("  refunded: {}", counters.refunded);
            }
            return Ok(0);
        }

        EscrowCommand::Balance { account: reference } => {
            let account = account(reference)?;
            let balances = state.records.all_balances()?.remove(&account).unwrap_or_default();
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&balances)?);
            } else {
                println!("Account: {account}");
                for kind in BalanceKind::ALL {
                    let bucket = balances.bucket(kind);
                    match bucket.held_at(now) {
                        0 => println!("  {kind}: {}", bucket.amount),
                        held => println!("  {kind}: {} ({held} held)", bucket.amount),
                    }
                }
            }
            return Ok(0);
        }

        EscrowCommand::Sweep { actor } => {
            let report = engine.sweep_expired(&caller(actor, Role::User)?, now)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("OK: cancelled {} expired entries", report.cancelled.len());
                for id in &report.cancelled {
                    println!("  cancelled {id}");
                }
                for (id, reason) in &report.failed {
                    println!("  FAILED {id}: {reason}");
                }
            }
            return Ok(if report.failed.is_empty() { 0 } else { 1 });
        }
    };

    report(outcome, ctx)
}

/// Print a call's outcome and pick the exit code.
fn report(outcome: Result<Receipt, EngineError>, ctx: &Context) -> Result<u8> {
    match outcome {
        Ok(receipt) => {
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&receipt)?);
                return Ok(0);
            }
            match (receipt.request_id, receipt.status) {
                (Some(id), Some(status)) => println!("OK: {} {id} → {status}", receipt.call),
                _ => println!("OK: {}", receipt.call),
            }
            if receipt.withdrawn > 0 {
                println!("  withdrawn: {}", receipt.withdrawn);
            }
            if receipt.degraded {
                println!("  WARNING: checkpoint was missing or malformed; counters restarted");
            }
            Ok(0)
        }
        Err(e) => {
            let code = exit_code(&e);
            if code == 1 {
                return Err(e.into());
            }
            eprintln!("REJECTED: {e}");
            Ok(code)
        }
    }
}

fn cmd_status(engine: &EscrowEngine, ctx: &Context, id: &RequestId) -> Result<u8> {
    let Some(entry) = engine.entry(id)? else {
        eprintln!("REJECTED: unknown request {id}");
        return Ok(3);
    };
    let dispute = engine.dispute(id)?;
    if ctx.json {
        let doc = serde_json::json!({ "entry": entry, "dispute": dispute });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(0);
    }
    println!("Request: {id}");
    println!("  Status: {}", entry.status);
    println!("  User: {}", entry.user);
    println!("  Verifier: {}", entry.verifier);
    println!("  Amount: {}", entry.amount);
    println!("  Created: {}", entry.created_at);
    println!("  Expires: {}", entry.expires_at);
    if let Some(data) = entry.verification_data {
        println!("  Verification: {data}");
    }
    if entry.fraud_score > 0 || entry.fraud_detected {
        println!("  Fraud score: {} (fraud: {})", entry.fraud_score, entry.fraud_detected);
    }
    if let Some(settled) = entry.settled_at {
        println!("  Settled: {settled}");
        println!("  Verifier share: {}", entry.verifier_share);
        println!("  Platform fee: {}", entry.platform_fee);
        if let Some(recipient) = entry.fee_recipient {
            println!("  Fee recipient: {recipient}");
        }
    }
    if let Some(dispute) = dispute {
        println!("  Dispute: {} by {}", entry.dispute_status, dispute.initiator);
        println!("    Reason: {}", dispute.reason.as_str());
        if let Some(resolved) = dispute.resolved_at {
            println!("    Resolved: {resolved} ({})", dispute.resolution);
        }
    }
    Ok(0)
}
