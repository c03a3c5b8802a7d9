//! # vesc-cli: Command-Line Host for the Escrow Engine
//!
//! Provides the `vesc` binary. Each invocation is one stateless host call:
//! it opens the state directory, runs a single engine operation and exits.
//!
//! ## Subcommands
//!
//! - `vesc create | lock | submit | fraud-check | dispute | resolve | cancel | withdraw`
//!   run one state-machine call.
//! - `vesc status | counters | balance` read stored state.
//! - `vesc sweep` cancels every expired, unverified entry.
//! - `vesc journal rebuild | compact | history` maintain the call journal.
//!
//! ```bash
//! vesc create --as alice --id 0x01 --verifier acme --amount 1000
//! vesc lock --as oracle --id 0x01
//! vesc submit --as acme --id 0x01 --payload "result"
//! vesc fraud-check --as oracle --id 0x01 --score 12
//! vesc withdraw --as acme --role verifier
//! ```
//!
//! ## Exit Codes
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | `0`  | success                                                  |
//! | `1`  | host failure: bad arguments, I/O, config or journal      |
//! | `2`  | the engine rejected the call as invalid input            |
//! | `3`  | the call is not allowed in the entry's current state     |
//! | `4`  | the caller is not authorized for the call                |

pub mod escrow;
pub mod journal;
pub mod store;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use vesc_core::{ErrorClass, Timestamp};
use vesc_engine::{EngineConfig, EngineError, EscrowEngine};

use crate::store::{open_engine, StateDir};

/// Default state directory, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".vesc";

/// Config file looked up inside the state directory when `--config` is absent.
pub const STATE_CONFIG_FILE: &str = "vesc.yaml";

/// Everything a subcommand needs.
#[derive(Debug, Clone)]
pub struct Context {
    /// The state directory.
    pub state_dir: PathBuf,
    /// Engine configuration.
    pub config: EngineConfig,
    /// Clock value for this invocation.
    pub now: Timestamp,
    /// Print machine-readable JSON instead of text.
    pub json: bool,
}

impl Context {
    /// Resolve configuration and the clock.
    ///
    /// Configuration comes from `config`, else from `vesc.yaml` inside the
    /// state directory, else defaults.
    pub fn load(state_dir: &Path, config: Option<&Path>, now: Option<&str>, json: bool) -> Result<Self> {
        let in_state = state_dir.join(STATE_CONFIG_FILE);
        let config = match config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None if in_state.is_file() => EngineConfig::load(&in_state)
                .with_context(|| format!("failed to load config {}", in_state.display()))?,
            None => EngineConfig::default(),
        };
        let now = match now {
            Some(value) => parse_clock(value)?,
            None => Timestamp::now(),
        };
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            config,
            now,
            json,
        })
    }

    /// Open the state directory and build an engine over it.
    pub fn engine(&self) -> Result<(EscrowEngine, StateDir)> {
        open_engine(&self.state_dir, &self.config)
            .with_context(|| format!("failed to open state directory {}", self.state_dir.display()))
    }
}

/// Parse a `--now` value: Unix seconds or an RFC 3339 UTC timestamp.
pub fn parse_clock(value: &str) -> Result<Timestamp> {
    match value.parse::<i64>() {
        Ok(secs) => Timestamp::from_epoch_secs(secs).context("invalid --now"),
        Err(_) => Timestamp::parse(value).context("invalid --now"),
    }
}

/// Exit code for an engine error: rejections map to their class, anything
/// else is a host failure.
pub fn exit_code(error: &EngineError) -> u8 {
    match error.escrow().map(|e| e.class()) {
        Some(ErrorClass::Validation) => 2,
        Some(ErrorClass::State) => 3,
        Some(ErrorClass::Authorization) => 4,
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesc_core::{
        AccountId, AuthorizationError, EscrowError, RequestId, Role, StateError, ValidationError,
    };
    use vesc_engine::StoreError;

    #[test]
    fn context_defaults_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::load(dir.path(), None, Some("2026-01-01T00:00:00Z"), false).unwrap();
        assert_eq!(ctx.config, EngineConfig::default());
        assert_eq!(ctx.now, Timestamp::parse("2026-01-01T00:00:00Z").unwrap());
    }

    #[test]
    fn context_reads_config_from_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_CONFIG_FILE), "fee_bps: 100\n").unwrap();
        let ctx = Context::load(dir.path(), None, None, false).unwrap();
        assert_eq!(ctx.config.fee_bps, 100);
    }

    #[test]
    fn clock_accepts_unix_seconds() {
        assert_eq!(parse_clock("86400").unwrap(), Timestamp::from_epoch_secs(86_400).unwrap());
        assert_eq!(
            parse_clock("1970-01-02T00:00:00Z").unwrap(),
            Timestamp::from_epoch_secs(86_400).unwrap()
        );
    }

    #[test]
    fn context_rejects_bad_clock() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Context::load(dir.path(), None, Some("yesterday"), false).is_err());
    }

    #[test]
    fn rejection_exit_codes() {
        let state: EngineError = EscrowError::from(StateError::UnknownRequest {
            request_id: RequestId::parse("0x01").unwrap(),
        })
        .into();
        assert_eq!(exit_code(&state), 3);

        let validation: EngineError = EscrowError::from(ValidationError::ZeroAmount {
            request_id: RequestId::parse("0x01").unwrap(),
        })
        .into();
        assert_eq!(exit_code(&validation), 2);

        let authorization: EngineError = EscrowError::from(AuthorizationError::NotPermitted {
            operation: "lockFunds",
            account: AccountId::derive("mallory"),
            role: Role::Oracle,
        })
        .into();
        assert_eq!(exit_code(&authorization), 4);

        let host: EngineError = StoreError::Inconsistent("torn write".into()).into();
        assert_eq!(exit_code(&host), 1);
    }
}
