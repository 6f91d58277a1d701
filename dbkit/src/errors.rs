use thiserror::Error;
use uuid::Uuid;

use crate::database::failover::FailoverEvent;

/// An error raised by the underlying driver, carried through untouched.
///
/// `class` is the driver's error kind (used as the `error_class` metric
/// label) and `code` is a vendor code such as a SQLSTATE, when the driver
/// provides one. Failover classification matches on these two fields only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{class}: {message}")]
pub struct DriverError {
    pub class: String,
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection error on '{alias}': {source}")]
    Connection {
        alias: String,
        #[source]
        source: DriverError,
    },

    /// A failed statement or transaction call. When a failover was detected
    /// and could not be completed, `failover` holds the resolved event.
    #[error("Query error on '{alias}': {source}")]
    Query {
        alias: String,
        #[source]
        source: DriverError,
        failover: Option<Box<FailoverEvent>>,
    },

    /// A failover interrupted an open transaction. Whether the transaction
    /// committed cannot be known; do not retry without manual checks.
    #[error("Transaction resolution unknown on '{alias}' (operation {operation}, failover {event_id}): {source}")]
    TransactionResolutionUnknown {
        alias: String,
        operation: u64,
        event_id: Uuid,
        #[source]
        source: DriverError,
    },

    #[error("Connection '{0}' is closed")]
    Closed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// The driver error this error was raised from, if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            DbError::Connection { source, .. }
            | DbError::Query { source, .. }
            | DbError::TransactionResolutionUnknown { source, .. } => Some(source),
            DbError::Closed(_) | DbError::Config(_) => None,
        }
    }

    pub fn is_transaction_resolution_unknown(&self) -> bool {
        matches!(self, DbError::TransactionResolutionUnknown { .. })
    }

    /// The failover event attached to an aborted query, if any.
    pub fn failover(&self) -> Option<&FailoverEvent> {
        match self {
            DbError::Query { failover, .. } => failover.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new("OperationalError", "server closed the connection").with_code("08006");
        assert_eq!(err.to_string(), "OperationalError: server closed the connection");
        assert_eq!(err.code.as_deref(), Some("08006"));
    }

    #[test]
    fn test_source_is_preserved() {
        let source = DriverError::new("IntegrityError", "duplicate key");
        let err = DbError::Query {
            alias: "default".to_string(),
            source: source.clone(),
            failover: None,
        };
        assert_eq!(err.driver_error(), Some(&source));
        assert!(err.failover().is_none());
        assert!(!err.is_transaction_resolution_unknown());

        let chained = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(chained.as_deref(), Some("IntegrityError: duplicate key"));
    }

    #[test]
    fn test_closed_has_no_driver_error() {
        assert!(DbError::Closed("default".to_string()).driver_error().is_none());
    }
}
