//! # Fraud-Check Gate and Dispute Resolver
//!
//! Two sources decide where escrowed funds go: an oracle's
//! [`FraudAssessment`] or a resolver's [`Ruling`]. Both reduce to a
//! [`Verdict`] and both converge on the same settlement primitive.
//!
//! The gate never computes risk. Turning a raw score into a fraud flag is
//! the job of a [`FraudPolicy`] owned by whoever feeds the oracle.

use serde::{Deserialize, Serialize};

use vesc_core::{ValidationError, MAX_RISK_SCORE};

/// Where the funds of a settled entry go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Pay the verifier (minus the platform fee).
    ReleaseToVerifier,
    /// Return the full amount to the user.
    RefundUser,
}

impl Verdict {
    /// Whether the verdict favours the user.
    pub fn favors_user(&self) -> bool {
        matches!(self, Self::RefundUser)
    }

    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReleaseToVerifier => "release_to_verifier",
            Self::RefundUser => "refund_user",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An oracle's fraud-check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudAssessment {
    /// Risk score, 0–100.
    pub risk_score: u8,
    /// Whether fraud was detected.
    pub is_fraud: bool,
}

impl FraudAssessment {
    /// Validate the score range.
    pub fn new(risk_score: u8, is_fraud: bool) -> Result<Self, ValidationError> {
        if risk_score > MAX_RISK_SCORE {
            return Err(ValidationError::RiskScoreOutOfRange { score: risk_score });
        }
        Ok(Self {
            risk_score,
            is_fraud,
        })
    }

    /// Fraud refunds the user; otherwise the verifier is paid.
    pub fn verdict(&self) -> Verdict {
        if self.is_fraud {
            Verdict::RefundUser
        } else {
            Verdict::ReleaseToVerifier
        }
    }
}

/// A resolver's ruling on a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruling {
    /// Whether the ruling favours the user.
    pub user_favored: bool,
    /// Free-text resolution.
    pub resolution: String,
}

impl Ruling {
    /// The verdict this ruling implies.
    pub fn verdict(&self) -> Verdict {
        if self.user_favored {
            Verdict::RefundUser
        } else {
            Verdict::ReleaseToVerifier
        }
    }
}

/// Turns a raw risk score into a fraud flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudPolicy {
    /// Scores at or above this are treated as fraud.
    pub threshold: u8,
}

impl Default for FraudPolicy {
    fn default() -> Self {
        Self { threshold: 80 }
    }
}

impl FraudPolicy {
    /// Fraud if the scorer flagged it or the score reaches the threshold.
    pub fn assess(&self, risk_score: u8, flagged: bool) -> Result<FraudAssessment, ValidationError> {
        FraudAssessment::new(risk_score, flagged || risk_score >= self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraud_refunds_user() {
        let a = FraudAssessment::new(92, true).unwrap();
        assert_eq!(a.verdict(), Verdict::RefundUser);
        assert!(a.verdict().favors_user());
    }

    #[test]
    fn clean_check_releases() {
        let a = FraudAssessment::new(10, false).unwrap();
        assert_eq!(a.verdict(), Verdict::ReleaseToVerifier);
    }

    #[test]
    fn score_above_hundred_rejected() {
        assert!(matches!(
            FraudAssessment::new(101, false),
            Err(ValidationError::RiskScoreOutOfRange { score: 101 })
        ));
    }

    #[test]
    fn ruling_verdicts() {
        let for_user = Ruling {
            user_favored: true,
            resolution: "overturned".to_string(),
        };
        let for_verifier = Ruling {
            user_favored: false,
            resolution: "upheld".to_string(),
        };
        assert_eq!(for_user.verdict(), Verdict::RefundUser);
        assert_eq!(for_verifier.verdict(), Verdict::ReleaseToVerifier);
    }

    #[test]
    fn threshold_applies_to_score() {
        let policy = FraudPolicy { threshold: 80 };
        assert!(!policy.assess(79, false).unwrap().is_fraud);
        assert!(policy.assess(80, false).unwrap().is_fraud);
        assert!(policy.assess(5, true).unwrap().is_fraud);
    }
}
