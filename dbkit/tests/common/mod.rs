//! Scripted in-memory driver shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dbkit::config::{DatabaseConfig, FailoverConfig};
use dbkit::database::{Driver, DriverConnection, DriverCursor, FailoverAware, InstrumentedConnection};
use dbkit::metrics::MetricKey;
use dbkit::types::{FailoverStatus, Params, QueryOutput};
use dbkit::{DriverError, MetricsRegistry};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ALIAS: &str = "default";
pub const VENDOR: &str = "postgresql";

/// Everything the mock driver was asked to do, plus scripted replies.
/// Unscripted calls succeed.
#[derive(Default)]
pub struct MockState {
    pub executed: Mutex<Vec<(String, Params)>>,
    pub executed_many: Mutex<Vec<(String, Vec<Params>)>>,
    pub execute_results: Mutex<VecDeque<Result<QueryOutput, DriverError>>>,
    pub commit_results: Mutex<VecDeque<Result<(), DriverError>>>,
    pub rollback_results: Mutex<VecDeque<Result<(), DriverError>>>,
    pub close_results: Mutex<VecDeque<Result<(), DriverError>>>,
    pub connect_results: Mutex<VecDeque<Result<(), DriverError>>>,
    /// Time `connect` takes before answering.
    pub connect_delay: Mutex<Option<Duration>>,
    /// Replayed in order; the last status repeats.
    pub failover_statuses: Mutex<VecDeque<FailoverStatus>>,
    pub connect_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
    pub rollback_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
}

impl MockState {
    pub fn script_execute(&self, result: Result<QueryOutput, DriverError>) {
        self.execute_results.lock().push_back(result);
    }

    pub fn script_failover(&self, statuses: Vec<FailoverStatus>) {
        *self.failover_statuses.lock() = statuses.into();
    }

    pub fn executed(&self) -> Vec<(String, Params)> {
        self.executed.lock().clone()
    }

    fn next_execute(&self) -> Result<QueryOutput, DriverError> {
        self.execute_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryOutput::with_rows(vec![vec![serde_json::json!(1)]])))
    }
}

pub struct MockDriver {
    pub state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Connection = MockConnection;

    fn vendor(&self) -> &str {
        VENDOR
    }

    async fn connect(&self, _config: &DatabaseConfig) -> Result<MockConnection, DriverError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(Err(e)) = self.state.connect_results.lock().pop_front() {
            return Err(e);
        }
        Ok(MockConnection {
            state: self.state.clone(),
        })
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl FailoverAware for MockConnection {
    async fn failover_status(&self) -> FailoverStatus {
        let mut statuses = self.state.failover_statuses.lock();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses
                .front()
                .cloned()
                .unwrap_or(FailoverStatus::Completed { host: None })
        }
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    type Cursor = MockCursor;

    fn cursor(&self) -> MockCursor {
        MockCursor {
            state: self.state.clone(),
        }
    }

    async fn commit(&self) -> Result<(), DriverError> {
        self.state.commit_calls.fetch_add(1, Ordering::SeqCst);
        self.state.commit_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        self.state.rollback_calls.fetch_add(1, Ordering::SeqCst);
        self.state.rollback_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.close_results.lock().pop_front().unwrap_or(Ok(()))
    }
}

pub struct MockCursor {
    state: Arc<MockState>,
}

#[async_trait]
impl DriverCursor for MockCursor {
    async fn execute(&mut self, statement: &str, params: &Params) -> Result<QueryOutput, DriverError> {
        self.state
            .executed
            .lock()
            .push((statement.to_string(), params.clone()));
        self.state.next_execute()
    }

    async fn execute_many(&mut self, statement: &str, param_list: &[Params]) -> Result<QueryOutput, DriverError> {
        self.state
            .executed_many
            .lock()
            .push((statement.to_string(), param_list.to_vec()));
        self.state.next_execute()
    }
}

pub fn failover_error() -> DriverError {
    DriverError::new("OperationalError", "server closed the connection unexpectedly").with_code("08006")
}

pub fn database_config(autocommit: bool) -> DatabaseConfig {
    DatabaseConfig {
        alias: ALIAS.to_string(),
        autocommit,
        health_check_statement: "SELECT 1".to_string(),
        ..Default::default()
    }
}

pub fn failover_config() -> FailoverConfig {
    FailoverConfig {
        wait_timeout_ms: 1_000,
        poll_interval_ms: 10,
        ..Default::default()
    }
}

pub struct Harness {
    pub conn: InstrumentedConnection<MockConnection>,
    pub state: Arc<MockState>,
    pub registry: Arc<MetricsRegistry>,
}

pub async fn open(autocommit: bool) -> Harness {
    let driver = MockDriver::new();
    let registry = Arc::new(MetricsRegistry::new());
    let conn = InstrumentedConnection::open(
        &driver,
        &database_config(autocommit),
        &failover_config(),
        registry.clone(),
    )
    .await
    .expect("mock connect succeeds");

    Harness {
        conn,
        state: driver.state,
        registry,
    }
}

/// Value of `name{alias, vendor, extra...}`.
pub fn count(registry: &MetricsRegistry, name: &str, extra: &[(&str, &str)]) -> u64 {
    let mut key = MetricKey::new(name)
        .with_label("alias", ALIAS)
        .with_label("vendor", VENDOR);
    for (label, value) in extra {
        key = key.with_label(*label, *value);
    }
    registry.counter_value(&key)
}

/// Value of an alias-only failover series.
pub fn alias_count(registry: &MetricsRegistry, name: &str) -> u64 {
    registry.counter_value(&MetricKey::new(name).with_label("alias", ALIAS))
}

pub fn query_count(registry: &MetricsRegistry, outcome: &str) -> u64 {
    count(registry, "db_query_total", &[("outcome", outcome)])
}

pub fn error_count(registry: &MetricsRegistry, error_class: &str) -> u64 {
    count(registry, "db_errors_total", &[("error_class", error_class)])
}

pub fn duration_samples(registry: &MetricsRegistry) -> u64 {
    registry.histogram_count(
        &MetricKey::new("db_query_duration_seconds")
            .with_label("alias", ALIAS)
            .with_label("vendor", VENDOR),
    )
}
