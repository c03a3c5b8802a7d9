//! # Engine Configuration
//!
//! [`EngineConfig`] is read from YAML. Every field has a default, so an
//! empty document is a valid configuration for local use.
//!
//! ```yaml
//! fee_bps: 300
//! fee_recipient: platform
//! oracles: [oracle]
//! resolvers: [resolver]
//! gate_oracle: oracle
//! fraud_threshold: 80
//! escrow_ttl_secs: 604800
//! fraud_check_window_secs: 86400
//! dispute_window_secs: 604800
//! verifiers:
//!   - id: verifier
//!     fee: 10
//!     active: true
//! ```
//!
//! Accounts are written either as `0x`-prefixed hex ids or as labels,
//! which are hashed into ids with [`AccountId::derive`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vesc_core::{AccountId, Amount, Caller, ValidationError, BPS_DENOMINATOR, MAX_RISK_SCORE};
use vesc_ledger::policy::{
    DEFAULT_DISPUTE_WINDOW_SECS, DEFAULT_ESCROW_TTL_SECS, DEFAULT_FEE_BPS,
    DEFAULT_FRAUD_CHECK_WINDOW_SECS,
};
use vesc_ledger::{FraudPolicy, LedgerPolicy};

use crate::memory::StaticDirectory;

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// The config path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The YAML did not parse.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds an unacceptable value.
    #[error("invalid config field {field}: {reason}")]
    Invalid {
        /// The field.
        field: &'static str,
        /// Why.
        reason: String,
    },

    /// An account reference did not resolve.
    #[error("invalid account in config: {0}")]
    Account(#[from] ValidationError),
}

/// Resolve an account reference: `0x`-prefixed hex, or a label to derive.
pub fn account_ref(reference: &str) -> Result<AccountId, ValidationError> {
    if reference.starts_with("0x") || reference.starts_with("0X") {
        AccountId::parse(reference)
    } else if reference.is_empty() {
        Err(ValidationError::InvalidIdentifier {
            kind: "account id",
            value: String::new(),
            reason: "empty account reference".to_string(),
        })
    } else {
        Ok(AccountId::derive(reference))
    }
}

/// One verifier directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierListing {
    /// Account reference.
    pub id: String,
    /// Quoted fee.
    #[serde(default)]
    pub fee: Amount,
    /// Whether the verifier accepts work.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Platform fee in basis points.
    pub fee_bps: u16,
    /// Account credited with the platform fee.
    pub fee_recipient: String,
    /// Accounts allowed to act as oracle.
    pub oracles: Vec<String>,
    /// Accounts allowed to resolve disputes.
    pub resolvers: Vec<String>,
    /// Oracle identity the engine uses to report risk-scorer outcomes.
    pub gate_oracle: String,
    /// Risk scores at or above this count as fraud.
    pub fraud_threshold: u8,
    /// Lifetime of a new entry.
    pub escrow_ttl_secs: u64,
    /// Time the fraud check may stay pending before it becomes disputable.
    pub fraud_check_window_secs: u64,
    /// Time a completed entry stays disputable.
    pub dispute_window_secs: u64,
    /// Verifier directory.
    pub verifiers: Vec<VerifierListing>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_FEE_BPS,
            fee_recipient: "platform".to_string(),
            oracles: vec!["oracle".to_string()],
            resolvers: vec!["resolver".to_string()],
            gate_oracle: "oracle".to_string(),
            fraud_threshold: FraudPolicy::default().threshold,
            escrow_ttl_secs: DEFAULT_ESCROW_TTL_SECS,
            fraud_check_window_secs: DEFAULT_FRAUD_CHECK_WINDOW_SECS,
            dispute_window_secs: DEFAULT_DISPUTE_WINDOW_SECS,
            verifiers: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check ranges and account references.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if u64::from(self.fee_bps) > BPS_DENOMINATOR {
            return Err(ConfigError::Invalid {
                field: "fee_bps",
                reason: format!("{} exceeds {BPS_DENOMINATOR}", self.fee_bps),
            });
        }
        if self.fraud_threshold > MAX_RISK_SCORE {
            return Err(ConfigError::Invalid {
                field: "fraud_threshold",
                reason: format!("{} exceeds {MAX_RISK_SCORE}", self.fraud_threshold),
            });
        }
        if self.escrow_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "escrow_ttl_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        let policy = self.policy()?;
        let gate = account_ref(&self.gate_oracle)?;
        if !policy.is_oracle(&gate) {
            return Err(ConfigError::Invalid {
                field: "gate_oracle",
                reason: format!("{} is not listed in oracles", self.gate_oracle),
            });
        }
        for listing in &self.verifiers {
            account_ref(&listing.id)?;
        }
        Ok(())
    }

    /// The ledger policy this configuration describes.
    pub fn policy(&self) -> Result<LedgerPolicy, ConfigError> {
        let mut policy = LedgerPolicy::new(account_ref(&self.fee_recipient)?).with_fee_bps(self.fee_bps);
        for oracle in &self.oracles {
            policy = policy.with_oracle(account_ref(oracle)?);
        }
        for resolver in &self.resolvers {
            policy = policy.with_resolver(account_ref(resolver)?);
        }
        policy.escrow_ttl_secs = self.escrow_ttl_secs;
        policy.fraud_check_window_secs = self.fraud_check_window_secs;
        policy.dispute_window_secs = self.dispute_window_secs;
        Ok(policy)
    }

    /// The score-to-fraud policy for the risk scorer.
    pub fn fraud_policy(&self) -> FraudPolicy {
        FraudPolicy {
            threshold: self.fraud_threshold,
        }
    }

    /// The oracle caller used to report risk-scorer outcomes.
    pub fn gate_oracle(&self) -> Result<Caller, ConfigError> {
        Ok(Caller::oracle(account_ref(&self.gate_oracle)?))
    }

    /// A verifier directory built from the listings.
    pub fn directory(&self) -> Result<StaticDirectory, ConfigError> {
        let mut directory = StaticDirectory::new();
        for listing in &self.verifiers {
            directory.insert(account_ref(&listing.id)?, listing.fee, listing.active);
        }
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = EngineConfig::from_yaml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        let policy = config.policy().unwrap();
        assert_eq!(policy.fee_bps, 300);
        assert_eq!(policy.escrow_ttl_secs, 7 * 24 * 3600);
        assert_eq!(config.fraud_policy().threshold, 80);
    }

    #[test]
    fn yaml_overrides_and_verifiers() {
        let yaml = r#"
fee_bps: 250
verifiers:
  - id: acme
    fee: 10
  - id: "0xbeef"
    fee: 5
    active: false
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.fee_bps, 250);
        assert!(config.verifiers[0].active);
        let directory = config.directory().unwrap();
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn fee_above_denominator_rejected() {
        let err = EngineConfig::from_yaml_str("fee_bps: 10001").unwrap_err();
        assert!(format!("{err}").contains("fee_bps"));
    }

    #[test]
    fn threshold_above_hundred_rejected() {
        let err = EngineConfig::from_yaml_str("fraud_threshold: 101").unwrap_err();
        assert!(format!("{err}").contains("fraud_threshold"));
    }

    #[test]
    fn gate_oracle_must_be_an_oracle() {
        let err = EngineConfig::from_yaml_str("gate_oracle: stranger").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "gate_oracle", .. }));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(matches!(
            EngineConfig::from_yaml_str("fee_percent: 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn account_refs() {
        assert_eq!(account_ref("alice").unwrap(), AccountId::derive("alice"));
        assert_eq!(account_ref("0xaa").unwrap(), AccountId::parse("aa").unwrap());
        assert!(account_ref("0xzz").is_err());
        assert!(account_ref("").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vesc.yaml");
        std::fs::write(&path, "fee_bps: 100\n").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().fee_bps, 100);
        assert!(matches!(
            EngineConfig::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
