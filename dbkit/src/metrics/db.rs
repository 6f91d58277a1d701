use std::sync::Arc;
use std::time::Duration;

use super::registry::{MetricKey, MetricsRegistry};

pub const CONNECT_TOTAL: &str = "db_connect_total";
pub const CONNECT_DURATION: &str = "db_connect_duration_seconds";
pub const QUERY_TOTAL: &str = "db_query_total";
pub const QUERY_DURATION: &str = "db_query_duration_seconds";
pub const EXECUTE_MANY_TOTAL: &str = "db_execute_many_total";
pub const TRANSACTION_TOTAL: &str = "db_transaction_total";
pub const ERRORS_TOTAL: &str = "db_errors_total";
pub const CURSOR_CREATED_TOTAL: &str = "db_cursor_created_total";
pub const CLOSE_TOTAL: &str = "db_close_total";
pub const RETRY_AFTER_FAILOVER_TOTAL: &str = "db_retry_after_failover_total";
pub const FAILOVER_SUCCESS_TOTAL: &str = "db_failover_success_total";
pub const FAILOVER_FAILED_TOTAL: &str = "db_failover_failed_total";
pub const TRANSACTION_RESOLUTION_UNKNOWN_TOTAL: &str = "db_transaction_resolution_unknown_total";

const DESCRIPTIONS: &[(&str, &str)] = &[
    (CONNECT_TOTAL, "Database connection attempts by outcome"),
    (CONNECT_DURATION, "Time to establish a database connection in seconds"),
    (QUERY_TOTAL, "Statements executed by outcome"),
    (QUERY_DURATION, "Statement execution time in seconds, retries included"),
    (EXECUTE_MANY_TOTAL, "Parameter sets submitted through execute_many"),
    (TRANSACTION_TOTAL, "Commit and rollback calls by outcome"),
    (ERRORS_TOTAL, "Errors surfaced to callers by driver error class"),
    (CURSOR_CREATED_TOTAL, "Cursors created"),
    (CLOSE_TOTAL, "Connections closed"),
    (RETRY_AFTER_FAILOVER_TOTAL, "Operations replayed after a successful failover"),
    (FAILOVER_SUCCESS_TOTAL, "Failovers completed with the operation retried"),
    (FAILOVER_FAILED_TOTAL, "Failovers that could not be completed"),
    (
        TRANSACTION_RESOLUTION_UNKNOWN_TOTAL,
        "Failovers that interrupted an open transaction",
    ),
];

/// Labels attached to every series emitted for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLabels {
    pub alias: String,
    pub vendor: String,
}

impl ConnectionLabels {
    pub fn new(alias: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            vendor: vendor.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Attempt,
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Attempt => "attempt",
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Database series for one alias/vendor pair, written to a shared registry.
#[derive(Clone)]
pub struct DbMetrics {
    registry: Arc<MetricsRegistry>,
    labels: ConnectionLabels,
}

impl DbMetrics {
    pub fn new(registry: Arc<MetricsRegistry>, labels: ConnectionLabels) -> Self {
        for (name, help) in DESCRIPTIONS {
            registry.describe(name, help);
        }
        Self { registry, labels }
    }

    pub fn labels(&self) -> &ConnectionLabels {
        &self.labels
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn connect(&self, outcome: Outcome) {
        self.registry
            .increment(&self.key(CONNECT_TOTAL).with_label("outcome", outcome.as_str()));
    }

    pub fn connect_duration(&self, elapsed: Duration) {
        self.registry.observe(&self.key(CONNECT_DURATION), elapsed);
    }

    pub fn query(&self, outcome: Outcome) {
        self.registry
            .increment(&self.key(QUERY_TOTAL).with_label("outcome", outcome.as_str()));
    }

    pub fn query_duration(&self, elapsed: Duration) {
        self.registry.observe(&self.key(QUERY_DURATION), elapsed);
    }

    pub fn execute_many(&self, param_sets: usize) {
        self.registry
            .increment_by(&self.key(EXECUTE_MANY_TOTAL), param_sets as u64);
    }

    pub fn transaction(&self, operation: &str, outcome: Outcome) {
        self.registry.increment(
            &self
                .key(TRANSACTION_TOTAL)
                .with_label("operation", operation)
                .with_label("outcome", outcome.as_str()),
        );
    }

    pub fn error(&self, error_class: &str) {
        self.registry
            .increment(&self.key(ERRORS_TOTAL).with_label("error_class", error_class));
    }

    pub fn cursor_created(&self) {
        self.registry.increment(&self.key(CURSOR_CREATED_TOTAL));
    }

    pub fn closed(&self) {
        self.registry.increment(&self.key(CLOSE_TOTAL));
    }

    pub fn retry_after_failover(&self) {
        self.registry.increment(&self.alias_key(RETRY_AFTER_FAILOVER_TOTAL));
    }

    pub fn failover_success(&self) {
        self.registry.increment(&self.alias_key(FAILOVER_SUCCESS_TOTAL));
    }

    pub fn failover_failed(&self) {
        self.registry.increment(&self.alias_key(FAILOVER_FAILED_TOTAL));
    }

    pub fn transaction_resolution_unknown(&self) {
        self.registry
            .increment(&self.alias_key(TRANSACTION_RESOLUTION_UNKNOWN_TOTAL));
    }

    /// Key for `name` labelled with alias and vendor.
    pub fn key(&self, name: &str) -> MetricKey {
        MetricKey::new(name)
            .with_label("alias", self.labels.alias.clone())
            .with_label("vendor", self.labels.vendor.clone())
    }

    /// Key for `name` labelled with alias only (failover series).
    pub fn alias_key(&self, name: &str) -> MetricKey {
        MetricKey::new(name).with_label("alias", self.labels.alias.clone())
    }
}
