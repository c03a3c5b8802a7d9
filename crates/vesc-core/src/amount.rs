//! # Amounts
//!
//! Money is a `u64` in the smallest currency unit. Fees are expressed in
//! basis points and computed with floor division.

/// An amount in the smallest currency unit.
pub type Amount = u64;

/// Basis-point denominator: 10 000 bps = 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Highest risk score an oracle may report.
pub const MAX_RISK_SCORE: u8 = 100;
