//! # Caller Roles
//!
//! Every escrow call is made by a [`Caller`]: an account acting in a
//! declared [`Role`]. The state machine checks the role (and, where the
//! call is bound to one party, the account) itself.

use serde::{Deserialize, Serialize};

use crate::identity::AccountId;

/// The capacity in which an account is calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Pays the verification fee and receives refunds.
    User,
    /// Performs the verification and earns the fee.
    Verifier,
    /// Trusted reporter of fund locks and fraud-check outcomes.
    Oracle,
    /// Trusted adjudicator of disputes.
    DisputeResolver,
    /// Platform account that collects the fee share.
    FeeRecipient,
}

impl Role {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Verifier => "VERIFIER",
            Self::Oracle => "ORACLE",
            Self::DisputeResolver => "DISPUTE_RESOLVER",
            Self::FeeRecipient => "FEE_RECIPIENT",
        }
    }

    /// The pending-balance bucket this role withdraws from, if any.
    pub fn balance_kind(&self) -> Option<BalanceKind> {
        match self {
            Self::User => Some(BalanceKind::UserRefund),
            Self::Verifier => Some(BalanceKind::VerifierEarnings),
            Self::FeeRecipient => Some(BalanceKind::PlatformFee),
            Self::Oracle | Self::DisputeResolver => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three pending-balance buckets an account can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceKind {
    /// Refunds owed to a user.
    UserRefund,
    /// Earnings owed to a verifier.
    VerifierEarnings,
    /// Fee share owed to the platform.
    PlatformFee,
}

impl BalanceKind {
    /// All buckets, in codec order.
    pub const ALL: [BalanceKind; 3] = [
        BalanceKind::UserRefund,
        BalanceKind::VerifierEarnings,
        BalanceKind::PlatformFee,
    ];

    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRefund => "USER_REFUND",
            Self::VerifierEarnings => "VERIFIER_EARNINGS",
            Self::PlatformFee => "PLATFORM_FEE",
        }
    }
}

impl std::fmt::Display for BalanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account acting in a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    /// The calling account.
    pub account: AccountId,
    /// The declared role.
    pub role: Role,
}

impl Caller {
    /// Construct a caller.
    pub fn new(account: AccountId, role: Role) -> Self {
        Self { account, role }
    }

    /// Shorthand for a user caller.
    pub fn user(account: AccountId) -> Self {
        Self::new(account, Role::User)
    }

    /// Shorthand for a verifier caller.
    pub fn verifier(account: AccountId) -> Self {
        Self::new(account, Role::Verifier)
    }

    /// Shorthand for an oracle caller.
    pub fn oracle(account: AccountId) -> Self {
        Self::new(account, Role::Oracle)
    }

    /// Shorthand for a dispute-resolver caller.
    pub fn resolver(account: AccountId) -> Self {
        Self::new(account, Role::DisputeResolver)
    }

    /// Shorthand for the fee-recipient caller.
    pub fn fee_recipient(account: AccountId) -> Self {
        Self::new(account, Role::FeeRecipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn withdrawing_roles_map_to_buckets() {
        assert_eq!(Role::User.balance_kind(), Some(BalanceKind::UserRefund));
        assert_eq!(Role::Verifier.balance_kind(), Some(BalanceKind::VerifierEarnings));
        assert_eq!(Role::FeeRecipient.balance_kind(), Some(BalanceKind::PlatformFee));
        assert_eq!(Role::Oracle.balance_kind(), None);
        assert_eq!(Role::DisputeResolver.balance_kind(), None);
    }

    #[test]
    fn role_serde_matches_as_str() {
        for role in [
            Role::User,
            Role::Verifier,
            Role::Oracle,
            Role::DisputeResolver,
            Role::FeeRecipient,
        ] {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }
}
