use chrono::{DateTime, Utc};
use dbkit::database::Driver;
use dbkit::types::QueryOutput;
use dbkit::{DbError, ManagedConnection, MetricsRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::{FailoverProbeConfig, ProbeConfig};

/// Consecutive failed probes before `/health` reports unhealthy.
const UNHEALTHY_AFTER: u64 = 3;

/// Outcome of a single probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
    /// The statement was interrupted by a failover mid-transaction.
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeStats {
    pub total_probes: u64,
    pub successful_probes: u64,
    pub failed_probes: u64,
    pub unknown_probes: u64,
    pub failovers_observed: u64,
    pub consecutive_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ProbeStats {
    pub fn record(&mut self, result: &Result<QueryOutput, DbError>) -> ProbeOutcome {
        self.total_probes += 1;

        let e = match result {
            Ok(_) => {
                self.successful_probes += 1;
                self.consecutive_failures = 0;
                self.last_success = Some(Utc::now());
                return ProbeOutcome::Success;
            }
            Err(e) => e,
        };

        self.consecutive_failures += 1;
        self.last_error = Some(e.to_string());
        if e.is_transaction_resolution_unknown() {
            self.failovers_observed += 1;
            self.unknown_probes += 1;
            return ProbeOutcome::Unknown;
        }

        if e.failover().is_some() {
            self.failovers_observed += 1;
        }
        self.failed_probes += 1;
        ProbeOutcome::Failure
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_probes > 0 {
            (self.successful_probes as f64 / self.total_probes as f64) * 100.0
        } else {
            100.0
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures < UNHEALTHY_AFTER
    }
}

/// Runs a health statement against one managed connection on a fixed interval.
pub struct Prober<D: Driver> {
    managed: tokio::sync::Mutex<ManagedConnection<D>>,
    probe: ProbeConfig,
    registry: Arc<MetricsRegistry>,
    stats: Mutex<ProbeStats>,
}

impl<D: Driver> Prober<D> {
    pub fn new(driver: Arc<D>, config: &FailoverProbeConfig, registry: Arc<MetricsRegistry>) -> Self {
        let managed = ManagedConnection::new(
            driver,
            config.database.clone(),
            config.failover.clone(),
            registry.clone(),
        );

        Self {
            managed: tokio::sync::Mutex::new(managed),
            probe: config.probe.clone(),
            registry,
            stats: Mutex::new(ProbeStats::default()),
        }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn get_stats(&self) -> ProbeStats {
        self.stats.lock().clone()
    }

    async fn execute_probe(&self) -> Result<QueryOutput, DbError> {
        let mut managed = self.managed.lock().await;
        let conn = managed.ensure_connection().await?;
        let mut cursor = conn.cursor()?;
        cursor.execute(&self.probe.statement, &Vec::new()).await
    }

    pub async fn probe_once(&self) -> ProbeOutcome {
        let result = self.execute_probe().await;
        let outcome = self.stats.lock().record(&result);

        match (&result, outcome) {
            (Ok(output), _) => debug!("Probe succeeded: {} rows", output.rows.len()),
            (Err(e), ProbeOutcome::Unknown) => warn!("Probe outcome unknown after failover: {}", e),
            (Err(e), _) => error!("Probe failed: {}", e),
        }
        outcome
    }

    pub async fn probe_loop(&self) {
        info!(
            "Probing '{}' every {:?}",
            self.probe.statement,
            self.probe.interval()
        );

        let mut ticker = interval(self.probe.interval());
        loop {
            ticker.tick().await;
            self.probe_once().await;
        }
    }

    pub async fn shutdown(&self) {
        self.managed.lock().await.close().await;
        info!("Probe connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbkit::DriverError;

    fn failed() -> Result<QueryOutput, DbError> {
        Err(DbError::Query {
            alias: "default".to_string(),
            source: DriverError::new("Unavailable", "not enough replicas"),
            failover: None,
        })
    }

    #[test]
    fn test_record_counts_outcomes() {
        let mut stats = ProbeStats::default();

        assert_eq!(stats.record(&Ok(QueryOutput::affected(0))), ProbeOutcome::Success);
        assert_eq!(stats.record(&failed()), ProbeOutcome::Failure);

        assert_eq!(stats.total_probes, 2);
        assert_eq!(stats.successful_probes, 1);
        assert_eq!(stats.failed_probes, 1);
        assert_eq!(stats.failovers_observed, 0);
        assert_eq!(stats.success_rate(), 50.0);
        assert!(stats.last_error.as_deref().unwrap().contains("not enough replicas"));
    }

    #[test]
    fn test_record_unknown_outcome() {
        let mut stats = ProbeStats::default();
        let unknown = Err(DbError::TransactionResolutionUnknown {
            alias: "default".to_string(),
            operation: 3,
            event_id: uuid::Uuid::new_v4(),
            source: DriverError::new("BrokenConnection", "reset by peer"),
        });

        assert_eq!(stats.record(&unknown), ProbeOutcome::Unknown);
        assert_eq!(stats.unknown_probes, 1);
        assert_eq!(stats.failovers_observed, 1);
        assert_eq!(stats.consecutive_failures, 1);
        assert!(stats.is_healthy());
    }

    #[test]
    fn test_unhealthy_after_repeated_failures() {
        let mut stats = ProbeStats::default();
        for _ in 0..UNHEALTHY_AFTER {
            stats.record(&failed());
        }
        assert!(!stats.is_healthy());

        stats.record(&Ok(QueryOutput::affected(0)));
        assert!(stats.is_healthy());
        assert!(stats.last_success.is_some());
    }

    #[test]
    fn test_empty_stats_are_healthy() {
        let stats = ProbeStats::default();
        assert!(stats.is_healthy());
        assert_eq!(stats.success_rate(), 100.0);
    }
}
