use thiserror::Error;

use crate::domain::lead::{LeadId, LeadStatus};
use crate::domain::run::RunStatus;

/// Failure classes a step can surface. The retryable/fatal split drives the
/// executor's retry policy; everything else is routed through the step's
/// on-failure action or fails the run outright.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("transient capability error: {0}")]
    Transient(String),
    #[error("fatal capability error: {0}")]
    Fatal(String),
    #[error("step `{step}` timed out after {timeout_secs}s")]
    Timeout { step: String, timeout_secs: u64 },
    #[error("daily send budget exhausted for account `{account}` (cap {cap}/day)")]
    BudgetExceeded { account: String, cap: u32 },
    #[error("step visit cap {cap} exceeded; workflow graph is misconfigured or cycling")]
    GraphExhausted { cap: u32 },
    #[error("lead {0} is blacklisted; execution suppressed")]
    LeadBlacklisted(LeadId),
    #[error("approval decision does not match any pending gate for this run")]
    InvalidApprovalToken,
}

impl StepError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Timeout { .. } | Self::BudgetExceeded { .. }
        )
    }

    /// Stable class label recorded in run history.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
            Self::Timeout { .. } => "timeout",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::GraphExhausted { .. } => "graph_exhausted",
            Self::LeadBlacklisted(_) => "lead_blacklisted",
            Self::InvalidApprovalToken => "invalid_approval_token",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid lead transition from {from:?} to {to:?}")]
    InvalidLeadTransition { from: LeadStatus, to: LeadStatus },
    #[error("invalid run transition from {from:?} to {to:?}")]
    InvalidRunTransition { from: RunStatus, to: RunStatus },
    #[error("workflow definition invalid: {0}")]
    InvalidDefinition(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use super::StepError;
    use crate::domain::lead::LeadId;

    #[test]
    fn retryable_classes_match_policy() {
        assert!(StepError::Transient("socket reset".to_string()).is_retryable());
        assert!(StepError::Timeout { step: "mine".to_string(), timeout_secs: 30 }.is_retryable());
        assert!(
            StepError::BudgetExceeded { account: "outbox-1".to_string(), cap: 50 }.is_retryable()
        );

        assert!(!StepError::Fatal("bad payload".to_string()).is_retryable());
        assert!(!StepError::GraphExhausted { cap: 64 }.is_retryable());
        assert!(!StepError::LeadBlacklisted(LeadId("L-1".to_string())).is_retryable());
        assert!(!StepError::InvalidApprovalToken.is_retryable());
    }

    #[test]
    fn class_labels_are_stable() {
        assert_eq!(StepError::Transient(String::new()).class(), "transient");
        assert_eq!(StepError::GraphExhausted { cap: 1 }.class(), "graph_exhausted");
    }
}
