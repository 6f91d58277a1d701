// dbkit/src/database/failover.rs
//
// Failover detection and resolution.
//
// A failover-class driver error moves through DETECTED -> WAITING_FOR_DRIVER
// -> RESOLVED. The resolution decides whether the interrupted operation is
// replayed, aborted, or surfaced as a transaction with unknown outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::driver::FailoverAware;
use crate::config::FailoverConfig;
use crate::errors::DriverError;
use crate::metrics::DbMetrics;
use crate::types::{FailoverResolution, FailoverStatus, RetryDecision, TransactionState};

/// A driver error tagged with its failover classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Normal(DriverError),
    Failover(DriverError),
}

/// Matches driver errors against the configured failover signatures.
///
/// Only the error code and error class are compared, exactly. Message text is
/// never inspected, so generic application errors cannot be mistaken for a
/// failover.
#[derive(Debug, Clone)]
pub struct FailoverClassifier {
    signatures: HashSet<String>,
}

impl FailoverClassifier {
    pub fn new(signatures: HashSet<String>) -> Self {
        Self { signatures }
    }

    pub fn is_failover(&self, err: &DriverError) -> bool {
        self.signatures.contains(&err.class)
            || err
                .code
                .as_ref()
                .is_some_and(|code| self.signatures.contains(code))
    }

    pub fn classify(&self, err: DriverError) -> Classified {
        if self.is_failover(&err) {
            Classified::Failover(err)
        } else {
            Classified::Normal(err)
        }
    }
}

/// A resolved failover. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailoverEvent {
    id: Uuid,
    operation: u64,
    detected_at: DateTime<Utc>,
    resolved_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_cause")]
    cause: DriverError,
    transaction: TransactionState,
    resolution: FailoverResolution,
    detail: String,
}

fn serialize_cause<S: serde::Serializer>(cause: &DriverError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&cause.to_string())
}

impl FailoverEvent {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> u64 {
        self.operation
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    pub fn cause(&self) -> &DriverError {
        &self.cause
    }

    /// Transaction state when the failover was detected.
    pub fn transaction(&self) -> TransactionState {
        self.transaction
    }

    pub fn resolution(&self) -> FailoverResolution {
        self.resolution
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn decision(&self) -> RetryDecision {
        RetryDecision::from(self.resolution)
    }
}

/// What the interrupted operation looked like when the failover was detected.
#[derive(Debug, Clone)]
pub struct FailoverContext {
    pub cause: DriverError,
    pub transaction: TransactionState,
    pub operation: u64,
    /// False once the operation has used its retry budget.
    pub retry_available: bool,
}

/// A detected failover that has not been resolved yet.
///
/// If it is dropped unresolved (the waiting future was cancelled) it counts as
/// a failed failover, so every detected event ends with exactly one
/// resolution.
struct DetectedFailover<'a> {
    metrics: &'a DbMetrics,
    id: Uuid,
    operation: u64,
    detected_at: DateTime<Utc>,
    transaction: TransactionState,
    cause: Option<DriverError>,
}

impl<'a> DetectedFailover<'a> {
    fn new(metrics: &'a DbMetrics, ctx: FailoverContext) -> Self {
        let id = Uuid::new_v4();
        warn!(
            "Failover detected on '{}' (event {}, operation {}, transaction {}): {}",
            metrics.labels().alias,
            id,
            ctx.operation,
            ctx.transaction,
            ctx.cause
        );

        Self {
            metrics,
            id,
            operation: ctx.operation,
            detected_at: Utc::now(),
            transaction: ctx.transaction,
            cause: Some(ctx.cause),
        }
    }

    fn resolve(mut self, resolution: FailoverResolution, detail: String) -> FailoverEvent {
        let alias = &self.metrics.labels().alias;
        match resolution {
            FailoverResolution::Success => {
                info!("Database failover completed on '{}', retrying operation {}: {}", alias, self.operation, detail);
                self.metrics.failover_success();
            }
            FailoverResolution::Failed => {
                error!("Database failover failed on '{}': {}", alias, detail);
                self.metrics.failover_failed();
            }
            FailoverResolution::TransactionUnknown => {
                error!("Transaction resolution unknown after failover on '{}': {}", alias, detail);
                self.metrics.transaction_resolution_unknown();
            }
        }

        let cause = self
            .cause
            .take()
            .unwrap_or_else(|| DriverError::new("Unknown", "failover cause missing"));

        FailoverEvent {
            id: self.id,
            operation: self.operation,
            detected_at: self.detected_at,
            resolved_at: Utc::now(),
            cause,
            transaction: self.transaction,
            resolution,
            detail,
        }
    }
}

impl Drop for DetectedFailover<'_> {
    fn drop(&mut self) {
        if let Some(cause) = self.cause.take() {
            warn!(
                "Failover wait cancelled on '{}' (event {}), treating as failed: {}",
                self.metrics.labels().alias,
                self.id,
                cause
            );
            self.metrics.failover_failed();
        }
    }
}

/// Waits for the driver to finish a failover and decides what happens to the
/// interrupted operation.
#[derive(Debug, Clone)]
pub struct FailoverController {
    classifier: FailoverClassifier,
    wait_timeout: Duration,
    poll_interval: Duration,
    max_retries: u32,
}

impl FailoverController {
    pub fn new(config: &FailoverConfig) -> Self {
        Self {
            classifier: FailoverClassifier::new(config.signatures.clone()),
            wait_timeout: config.wait_timeout(),
            poll_interval: config.poll_interval(),
            max_retries: config.max_retries.min(FailoverConfig::MAX_RETRIES),
        }
    }

    pub fn classify(&self, err: DriverError) -> Classified {
        self.classifier.classify(err)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Resolves a detected failover.
    ///
    /// The driver is always given the chance to finish its failover, even when
    /// the outcome is already decided by an open transaction, so the
    /// connection is usable afterwards.
    pub async fn handle<F>(&self, driver: &F, metrics: &DbMetrics, ctx: FailoverContext) -> FailoverEvent
    where
        F: FailoverAware + ?Sized,
    {
        let transaction = ctx.transaction;
        let retry_available = ctx.retry_available;
        let detected = DetectedFailover::new(metrics, ctx);

        let waited = self.wait_for_driver(driver).await;

        let (resolution, detail) = if !transaction.is_retry_safe() {
            let driver_outcome = match &waited {
                Ok(_) => "driver reconnected".to_string(),
                Err(reason) => format!("driver did not recover: {}", reason),
            };
            (
                FailoverResolution::TransactionUnknown,
                format!("failover interrupted a {} transaction; {}", transaction, driver_outcome),
            )
        } else {
            match waited {
                Ok(host) if retry_available => (
                    FailoverResolution::Success,
                    format!(
                        "connected to {}",
                        host.unwrap_or_else(|| "new cluster member".to_string())
                    ),
                ),
                Ok(_) => (
                    FailoverResolution::Failed,
                    "retry budget exhausted for this operation".to_string(),
                ),
                Err(reason) => (FailoverResolution::Failed, reason),
            }
        };

        detected.resolve(resolution, detail)
    }

    async fn wait_for_driver<F>(&self, driver: &F) -> Result<Option<String>, String>
    where
        F: FailoverAware + ?Sized,
    {
        let poll = async {
            loop {
                match driver.failover_status().await {
                    FailoverStatus::InProgress => tokio::time::sleep(self.poll_interval).await,
                    FailoverStatus::Completed { host } => return Ok(host),
                    FailoverStatus::Failed { reason } => return Err(reason),
                }
            }
        };

        match tokio::time::timeout(self.wait_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(format!("failover did not complete within {:?}", self.wait_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ConnectionLabels, MetricsRegistry};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays a fixed sequence of statuses, then repeats the last one.
    struct ScriptedDriver {
        statuses: Mutex<VecDeque<FailoverStatus>>,
    }

    impl ScriptedDriver {
        fn new(statuses: Vec<FailoverStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
            }
        }
    }

    #[async_trait]
    impl FailoverAware for ScriptedDriver {
        async fn failover_status(&self) -> FailoverStatus {
            let mut statuses = self.statuses.lock();
            if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                statuses.front().cloned().unwrap_or(FailoverStatus::InProgress)
            }
        }
    }

    fn metrics() -> DbMetrics {
        DbMetrics::new(
            Arc::new(MetricsRegistry::new()),
            ConnectionLabels::new("default", "postgresql"),
        )
    }

    fn controller() -> FailoverController {
        FailoverController::new(&FailoverConfig {
            wait_timeout_ms: 1_000,
            poll_interval_ms: 10,
            ..FailoverConfig::default()
        })
    }

    fn ctx(transaction: TransactionState, retry_available: bool) -> FailoverContext {
        FailoverContext {
            cause: DriverError::new("OperationalError", "connection reset").with_code("08006"),
            transaction,
            operation: 7,
            retry_available,
        }
    }

    fn count(m: &DbMetrics, name: &str) -> u64 {
        m.registry().counter_value(&m.alias_key(name))
    }

    #[test]
    fn test_classifier_matches_code_or_class_only() {
        let classifier = FailoverClassifier::new(
            ["08006", "FailoverSuccessError"].iter().map(|s| s.to_string()).collect(),
        );

        let by_code = DriverError::new("OperationalError", "reset").with_code("08006");
        let by_class = DriverError::new("FailoverSuccessError", "moved");
        let by_message = DriverError::new("IntegrityError", "08006 FailoverSuccessError");

        assert!(matches!(classifier.classify(by_code), Classified::Failover(_)));
        assert!(matches!(classifier.classify(by_class), Classified::Failover(_)));
        assert!(matches!(classifier.classify(by_message), Classified::Normal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_failover_outside_transaction_retries() {
        let m = metrics();
        let driver = ScriptedDriver::new(vec![
            FailoverStatus::InProgress,
            FailoverStatus::Completed { host: Some("replica-2".to_string()) },
        ]);

        let event = controller().handle(&driver, &m, ctx(TransactionState::None, true)).await;

        assert_eq!(event.resolution(), FailoverResolution::Success);
        assert_eq!(event.decision(), RetryDecision::RetrySameOp);
        assert_eq!(event.operation(), 7);
        assert!(event.detail().contains("replica-2"));
        assert_eq!(count(&m, "db_failover_success_total"), 1);
        assert_eq!(count(&m, "db_failover_failed_total"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_transaction_is_unknown_even_when_driver_recovers() {
        let m = metrics();
        let driver = ScriptedDriver::new(vec![FailoverStatus::Completed { host: None }]);

        let event = controller().handle(&driver, &m, ctx(TransactionState::Open, true)).await;

        assert_eq!(event.decision(), RetryDecision::PropagateUnknown);
        assert_eq!(event.transaction(), TransactionState::Open);
        assert_eq!(count(&m, "db_transaction_resolution_unknown_total"), 1);
        assert_eq!(count(&m, "db_failover_success_total"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_pending_is_unknown_when_driver_fails() {
        let m = metrics();
        let driver = ScriptedDriver::new(vec![FailoverStatus::Failed { reason: "no writer".to_string() }]);

        let event = controller()
            .handle(&driver, &m, ctx(TransactionState::CommitPending, true))
            .await;

        assert_eq!(event.resolution(), FailoverResolution::TransactionUnknown);
        assert!(event.detail().contains("no writer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts() {
        let m = metrics();
        let driver = ScriptedDriver::new(vec![FailoverStatus::InProgress]);

        let event = controller().handle(&driver, &m, ctx(TransactionState::None, true)).await;

        assert_eq!(event.decision(), RetryDecision::Abort);
        assert!(event.detail().contains("did not complete"));
        assert_eq!(count(&m, "db_failover_failed_total"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_aborts() {
        let m = metrics();
        let driver = ScriptedDriver::new(vec![FailoverStatus::Completed { host: None }]);

        let event = controller().handle(&driver, &m, ctx(TransactionState::None, false)).await;

        assert_eq!(event.decision(), RetryDecision::Abort);
        assert_eq!(count(&m, "db_failover_failed_total"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_counts_as_failed() {
        let m = metrics();
        let driver = ScriptedDriver::new(vec![FailoverStatus::InProgress]);
        let controller = controller();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            controller.handle(&driver, &m, ctx(TransactionState::None, true)),
        )
        .await;

        assert!(cancelled.is_err());
        assert_eq!(count(&m, "db_failover_failed_total"), 1);
        assert_eq!(count(&m, "db_failover_success_total"), 0);
    }
}
