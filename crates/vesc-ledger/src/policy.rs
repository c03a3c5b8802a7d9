//! # Ledger Policy
//!
//! The fixed parameters a ledger is operated under: fee rate, fee
//! recipient, the privileged oracle and resolver accounts, and the three
//! time windows. Built once from configuration and passed into every call.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use vesc_core::{AccountId, Amount, ValidationError, BPS_DENOMINATOR};

/// Default platform fee: 3%.
pub const DEFAULT_FEE_BPS: u16 = 300;

/// Default escrow lifetime: 7 days.
pub const DEFAULT_ESCROW_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default time the oracle has to report a fraud check: 24 hours.
pub const DEFAULT_FRAUD_CHECK_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Default time a settled entry stays disputable: 7 days.
pub const DEFAULT_DISPUTE_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Operating parameters for the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    /// Platform fee in basis points.
    pub fee_bps: u16,
    /// Account credited with the platform fee.
    pub fee_recipient: AccountId,
    /// Accounts allowed to act as oracle.
    pub oracles: BTreeSet<AccountId>,
    /// Accounts allowed to resolve disputes.
    pub resolvers: BTreeSet<AccountId>,
    /// Lifetime of a new entry.
    pub escrow_ttl_secs: u64,
    /// How long after submission the fraud check may stay pending before
    /// either party can escalate to a dispute.
    pub fraud_check_window_secs: u64,
    /// How long after settlement a Completed entry may be disputed.
    pub dispute_window_secs: u64,
}

impl LedgerPolicy {
    /// A policy with default rates and windows and no privileged accounts.
    pub fn new(fee_recipient: AccountId) -> Self {
        Self {
            fee_bps: DEFAULT_FEE_BPS,
            fee_recipient,
            oracles: BTreeSet::new(),
            resolvers: BTreeSet::new(),
            escrow_ttl_secs: DEFAULT_ESCROW_TTL_SECS,
            fraud_check_window_secs: DEFAULT_FRAUD_CHECK_WINDOW_SECS,
            dispute_window_secs: DEFAULT_DISPUTE_WINDOW_SECS,
        }
    }

    /// Grant the oracle capability to an account.
    pub fn with_oracle(mut self, oracle: AccountId) -> Self {
        self.oracles.insert(oracle);
        self
    }

    /// Grant the resolver capability to an account.
    pub fn with_resolver(mut self, resolver: AccountId) -> Self {
        self.resolvers.insert(resolver);
        self
    }

    /// Override the fee rate.
    pub fn with_fee_bps(mut self, fee_bps: u16) -> Self {
        self.fee_bps = fee_bps;
        self
    }

    /// Whether `account` may act as oracle.
    pub fn is_oracle(&self, account: &AccountId) -> bool {
        self.oracles.contains(account)
    }

    /// Whether `account` may resolve disputes.
    pub fn is_resolver(&self, account: &AccountId) -> bool {
        self.resolvers.contains(account)
    }

    /// `floor(amount * fee_bps / 10_000)`, computed in 128 bits.
    pub fn platform_fee(&self, amount: Amount) -> Result<Amount, ValidationError> {
        let fee = u128::from(amount) * u128::from(self.fee_bps) / u128::from(BPS_DENOMINATOR);
        Amount::try_from(fee).map_err(|_| ValidationError::ArithmeticOverflow {
            operation: "platform fee",
        })
    }
}
