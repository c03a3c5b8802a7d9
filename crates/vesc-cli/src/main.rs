//! # vesc CLI entry point
//!
//! Parses command-line arguments, initializes logging and dispatches to
//! subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vesc_cli::escrow::{run_escrow, EscrowCommand};
use vesc_cli::journal::{run_journal, JournalArgs};
use vesc_cli::{Context, DEFAULT_STATE_DIR};

/// Verifiable escrow host.
///
/// Runs one escrow call per invocation against a local state directory.
#[derive(Parser, Debug)]
#[command(name = "vesc", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State directory.
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Clock override: Unix seconds or RFC 3339 UTC.
    #[arg(long, global = true)]
    now: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Escrow(EscrowCommand),

    /// Journal maintenance (rebuild, compact, history).
    Journal(JournalArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::debug!(state_dir = %cli.state_dir.display(), "vesc starting");

    let ctx = match Context::load(&cli.state_dir, cli.config.as_deref(), cli.now.as_deref(), cli.json) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("ERROR: {e:#}");
            return ExitCode::from(1);
        }
    };

    let result = match &cli.command {
        Commands::Escrow(command) => run_escrow(command, &ctx),
        Commands::Journal(args) => run_journal(args, &ctx),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("ERROR: {e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesc_cli::escrow::PayeeRole;

    #[test]
    fn cli_parse_create() {
        let cli = Cli::try_parse_from([
            "vesc", "create", "--as", "alice", "--id", "0x01", "--verifier", "acme", "--amount", "100",
        ])
        .unwrap();
        assert_eq!(cli.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        match cli.command {
            Commands::Escrow(EscrowCommand::Create { actor, amount, .. }) => {
                assert_eq!(actor, "alice");
                assert_eq!(amount, 100);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vesc", "counters", "--state-dir", "/tmp/x", "-vv", "--json", "--now", "2026-01-01T00:00:00Z",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        assert_eq!(cli.state_dir, PathBuf::from("/tmp/x"));
        assert_eq!(cli.now.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn cli_parse_withdraw_role() {
        let cli = Cli::try_parse_from(["vesc", "withdraw", "--as", "platform", "--role", "fee-recipient"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Escrow(EscrowCommand::Withdraw {
                role: PayeeRole::FeeRecipient,
                ..
            })
        ));
    }

    #[test]
    fn cli_parse_submit_requires_payload() {
        assert!(Cli::try_parse_from(["vesc", "submit", "--as", "acme", "--id", "0x01"]).is_err());
        assert!(Cli::try_parse_from([
            "vesc", "submit", "--as", "acme", "--id", "0x01", "--payload", "x", "--payload-file", "f",
        ])
        .is_err());
    }

    #[test]
    fn cli_parse_journal_history() {
        let cli = Cli::try_parse_from(["vesc", "journal", "history", "--id", "0x01"]).unwrap();
        assert!(matches!(cli.command, Commands::Journal(_)));
    }

    #[test]
    fn cli_parse_fraud_check_flag() {
        let cli = Cli::try_parse_from([
            "vesc", "fraud-check", "--as", "oracle", "--id", "0x01", "--score", "90", "--fraud",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Escrow(EscrowCommand::FraudCheck {
                score: 90,
                fraud: true,
                ..
            })
        ));
    }
}
