use serde::{Deserialize, Serialize};
use std::fmt;

/// Bind parameters for one statement execution.
pub type Params = Vec<serde_json::Value>;

/// Rows and affected-row count returned by a statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<Vec<serde_json::Value>>,
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn with_rows(rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            rows,
            rows_affected: 0,
        }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }
}

/// Transaction state tracked per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    #[default]
    None,
    Open,
    CommitPending,
}

impl TransactionState {
    /// Only operations started outside a transaction may be replayed.
    pub fn is_retry_safe(self) -> bool {
        self == TransactionState::None
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::None => write!(f, "none"),
            TransactionState::Open => write!(f, "open"),
            TransactionState::CommitPending => write!(f, "commit_pending"),
        }
    }
}

/// What the driver reports while a failover is being handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverStatus {
    InProgress,
    /// A healthy connection to a valid cluster member is in place.
    Completed { host: Option<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverResolution {
    Success,
    Failed,
    TransactionUnknown,
}

impl fmt::Display for FailoverResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverResolution::Success => write!(f, "success"),
            FailoverResolution::Failed => write!(f, "failed"),
            FailoverResolution::TransactionUnknown => write!(f, "transaction_unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetrySameOp,
    Abort,
    PropagateUnknown,
}

impl From<FailoverResolution> for RetryDecision {
    fn from(resolution: FailoverResolution) -> Self {
        match resolution {
            FailoverResolution::Success => RetryDecision::RetrySameOp,
            FailoverResolution::Failed => RetryDecision::Abort,
            FailoverResolution::TransactionUnknown => RetryDecision::PropagateUnknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_none_is_retry_safe() {
        assert!(TransactionState::None.is_retry_safe());
        assert!(!TransactionState::Open.is_retry_safe());
        assert!(!TransactionState::CommitPending.is_retry_safe());
    }

    #[test]
    fn test_resolution_maps_to_decision() {
        assert_eq!(RetryDecision::from(FailoverResolution::Success), RetryDecision::RetrySameOp);
        assert_eq!(RetryDecision::from(FailoverResolution::Failed), RetryDecision::Abort);
        assert_eq!(
            RetryDecision::from(FailoverResolution::TransactionUnknown),
            RetryDecision::PropagateUnknown
        );
    }
}
