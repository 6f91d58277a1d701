use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::cursor::InstrumentedCursor;
use super::driver::{Driver, DriverConnection, DriverCursor};
use super::failover::{Classified, FailoverContext, FailoverController, FailoverEvent};
use super::statement::StatementKind;
use crate::config::{DatabaseConfig, FailoverConfig};
use crate::errors::{DbError, DriverError};
use crate::metrics::{ConnectionLabels, DbMetrics, MetricsRegistry, Outcome};
use crate::types::{RetryDecision, TransactionState};

/// What to do after an operation failed.
pub(crate) enum FailureAction {
    Retry,
    Surface(DbError),
}

/// What a proxied call counts its attempt and outcome against.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CallKind {
    Statement,
    Transaction(TransactionOp),
}

/// Outcome accounting for one proxied call.
///
/// Records the attempt on creation. If dropped before `finish` (the caller's
/// future was cancelled, typically during a failover wait) it records a
/// failure and the elapsed time, so every attempt has exactly one outcome.
pub(crate) struct CallGuard<'a> {
    metrics: &'a DbMetrics,
    kind: CallKind,
    started: Instant,
    finished: bool,
}

impl<'a> CallGuard<'a> {
    pub(crate) fn start(metrics: &'a DbMetrics, kind: CallKind) -> Self {
        match kind {
            CallKind::Statement => metrics.query(Outcome::Attempt),
            CallKind::Transaction(op) => metrics.transaction(op.as_str(), Outcome::Attempt),
        }

        Self {
            metrics,
            kind,
            started: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn finish(mut self, succeeded: bool) {
        self.record(if succeeded { Outcome::Success } else { Outcome::Failure });
    }

    fn record(&mut self, outcome: Outcome) {
        self.finished = true;
        self.metrics.query_duration(self.started.elapsed());
        match self.kind {
            CallKind::Statement => self.metrics.query(outcome),
            CallKind::Transaction(op) => self.metrics.transaction(op.as_str(), outcome),
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("{:?} on '{}' cancelled before completion", self.kind, self.metrics.labels().alias);
            self.record(Outcome::Failure);
        }
    }
}

/// State shared by a connection handle and every cursor created from it.
pub(crate) struct ConnectionShared<C: DriverConnection> {
    conn: C,
    metrics: DbMetrics,
    controller: FailoverController,
    autocommit: bool,
    health_check_statement: String,
    transaction: Mutex<TransactionState>,
    last_failover: Mutex<Option<FailoverEvent>>,
    operations: AtomicU64,
    closed: AtomicBool,
}

impl<C: DriverConnection> ConnectionShared<C> {
    pub(crate) fn conn(&self) -> &C {
        &self.conn
    }

    pub(crate) fn metrics(&self) -> &DbMetrics {
        &self.metrics
    }

    pub(crate) fn alias(&self) -> &str {
        &self.metrics.labels().alias
    }

    /// Numbers every cursor statement, commit and rollback on this connection.
    pub(crate) fn next_operation(&self) -> u64 {
        self.operations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn max_retries(&self) -> u32 {
        self.controller.max_retries()
    }

    pub(crate) fn transaction_state(&self) -> TransactionState {
        *self.transaction.lock()
    }

    fn set_transaction_state(&self, state: TransactionState) {
        let mut current = self.transaction.lock();
        if *current != state {
            debug!("Transaction state on '{}': {} -> {}", self.alias(), *current, state);
            *current = state;
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed(self.alias().to_string()));
        }
        Ok(())
    }

    /// Records the end of a cursor statement and applies its effect on the
    /// transaction state.
    pub(crate) fn finish_statement(&self, statement: &str, call: CallGuard<'_>, succeeded: bool) {
        call.finish(succeeded);
        if succeeded {
            let current = self.transaction_state();
            let next = StatementKind::classify(statement).next_state(current, self.autocommit);
            self.set_transaction_state(next);
        }
    }

    /// Classifies a driver error and, for failovers, waits for the driver and
    /// decides between replaying the operation and surfacing an error.
    ///
    /// Every surfaced error is counted once in `db_errors_total`.
    pub(crate) async fn handle_failure(
        &self,
        err: DriverError,
        transaction: TransactionState,
        operation: u64,
        retry_available: bool,
    ) -> FailureAction {
        let cause = match self.controller.classify(err) {
            Classified::Normal(err) => {
                self.metrics.error(&err.class);
                return FailureAction::Surface(DbError::Query {
                    alias: self.alias().to_string(),
                    source: err,
                    failover: None,
                });
            }
            Classified::Failover(cause) => cause,
        };

        let ctx = FailoverContext {
            cause,
            transaction,
            operation,
            retry_available,
        };
        let event = self.controller.handle(&self.conn, &self.metrics, ctx).await;
        *self.last_failover.lock() = Some(event.clone());

        match event.decision() {
            RetryDecision::RetrySameOp => {
                self.metrics.retry_after_failover();
                FailureAction::Retry
            }
            RetryDecision::Abort => {
                self.metrics.error(&event.cause().class);
                FailureAction::Surface(DbError::Query {
                    alias: self.alias().to_string(),
                    source: event.cause().clone(),
                    failover: Some(Box::new(event)),
                })
            }
            RetryDecision::PropagateUnknown => {
                // the interrupted transaction did not survive the old server connection
                self.set_transaction_state(TransactionState::None);
                self.metrics.error(&event.cause().class);
                FailureAction::Surface(DbError::TransactionResolutionUnknown {
                    alias: self.alias().to_string(),
                    operation: event.operation(),
                    event_id: event.id(),
                    source: event.cause().clone(),
                })
            }
        }
    }
}

impl<C: DriverConnection> Drop for ConnectionShared<C> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            debug!("Connection '{}' released without close()", self.alias());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionOp {
    Commit,
    Rollback,
}

impl TransactionOp {
    fn as_str(self) -> &'static str {
        match self {
            TransactionOp::Commit => "commit",
            TransactionOp::Rollback => "rollback",
        }
    }
}

/// A driver connection with metrics and failover handling.
///
/// A handle is meant for one logical caller at a time; concurrent use must be
/// serialised by the owner (typically a pool). Separate handles are
/// independent.
pub struct InstrumentedConnection<C: DriverConnection> {
    shared: Arc<ConnectionShared<C>>,
}

impl<C: DriverConnection> InstrumentedConnection<C> {
    /// Connect through `driver`, counting the attempt and its outcome.
    ///
    /// A driver error is returned as `DbError::Connection` with the original
    /// error as its source.
    pub async fn open<D>(
        driver: &D,
        config: &DatabaseConfig,
        failover: &FailoverConfig,
        registry: Arc<MetricsRegistry>,
    ) -> Result<Self, DbError>
    where
        D: Driver<Connection = C>,
    {
        failover.validate()?;

        let vendor = config
            .vendor
            .clone()
            .unwrap_or_else(|| driver.vendor().to_string());
        let metrics = DbMetrics::new(registry, ConnectionLabels::new(config.alias.clone(), vendor));

        metrics.connect(Outcome::Attempt);
        let start = Instant::now();

        let timeout = config.connect_timeout();
        let connected = if timeout.is_zero() {
            driver.connect(config).await
        } else {
            match tokio::time::timeout(timeout, driver.connect(config)).await {
                Ok(result) => result,
                Err(_) => Err(DriverError::new(
                    "ConnectTimeout",
                    format!("no connection within {:?}", timeout),
                )),
            }
        };

        match connected {
            Ok(conn) => {
                metrics.connect(Outcome::Success);
                metrics.connect_duration(start.elapsed());
                info!(
                    "Successfully connected '{}' ({}) to {:?}",
                    config.alias,
                    metrics.labels().vendor,
                    config.contact_points()
                );

                Ok(Self {
                    shared: Arc::new(ConnectionShared {
                        conn,
                        metrics,
                        controller: FailoverController::new(failover),
                        autocommit: config.autocommit,
                        health_check_statement: config.health_check_statement.clone(),
                        transaction: Mutex::new(TransactionState::None),
                        last_failover: Mutex::new(None),
                        operations: AtomicU64::new(0),
                        closed: AtomicBool::new(false),
                    }),
                })
            }
            Err(source) => {
                metrics.connect(Outcome::Failure);
                error!("Failed to connect '{}': {}", config.alias, source);
                Err(DbError::Connection {
                    alias: config.alias.clone(),
                    source,
                })
            }
        }
    }

    /// Create a cursor. No I/O is performed.
    pub fn cursor(&self) -> Result<InstrumentedCursor<C>, DbError> {
        self.shared.ensure_open()?;
        self.shared.metrics.cursor_created();
        Ok(InstrumentedCursor::new(self.shared.conn.cursor(), self.shared.clone()))
    }

    pub async fn commit(&self) -> Result<(), DbError> {
        self.transaction_op(TransactionOp::Commit).await
    }

    pub async fn rollback(&self) -> Result<(), DbError> {
        self.transaction_op(TransactionOp::Rollback).await
    }

    async fn transaction_op(&self, op: TransactionOp) -> Result<(), DbError> {
        let shared = &self.shared;
        shared.ensure_open()?;

        if op == TransactionOp::Commit && shared.transaction_state() == TransactionState::Open {
            shared.set_transaction_state(TransactionState::CommitPending);
        }

        let operation = shared.next_operation();
        let call = CallGuard::start(&shared.metrics, CallKind::Transaction(op));
        let mut retries_left = shared.max_retries();

        let result = loop {
            let transaction = shared.transaction_state();
            let attempt = match op {
                TransactionOp::Commit => shared.conn.commit().await,
                TransactionOp::Rollback => shared.conn.rollback().await,
            };

            match attempt {
                Ok(()) => break Ok(()),
                Err(err) => match shared
                    .handle_failure(err, transaction, operation, retries_left > 0)
                    .await
                {
                    FailureAction::Retry => {
                        retries_left -= 1;
                        debug!("Retrying {} on '{}' after failover", op.as_str(), shared.alias());
                    }
                    FailureAction::Surface(e) => break Err(e),
                },
            }
        };

        call.finish(result.is_ok());
        if result.is_ok() {
            shared.set_transaction_state(TransactionState::None);
        }
        result
    }

    /// Close the connection. Safe to call more than once; only the first call
    /// reaches the driver and is counted. A driver error during close is
    /// logged and counted, never returned.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!("Connection '{}' already closed", self.shared.alias());
            return;
        }

        self.shared.metrics.closed();
        self.shared.set_transaction_state(TransactionState::None);

        match self.shared.conn.close().await {
            Ok(()) => info!("Closed connection '{}'", self.shared.alias()),
            Err(e) => {
                self.shared.metrics.error(&e.class);
                warn!("Error closing connection '{}': {}", self.shared.alias(), e);
            }
        }
    }

    /// Runs the health-check statement on an uninstrumented driver cursor.
    pub async fn is_usable(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut cursor = self.shared.conn.cursor();
        match cursor
            .execute(&self.shared.health_check_statement, &Vec::new())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Connection '{}' is not usable: {}", self.shared.alias(), e);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.shared.transaction_state()
    }

    /// The most recent resolved failover on this connection.
    pub fn last_failover(&self) -> Option<FailoverEvent> {
        self.shared.last_failover.lock().clone()
    }

    pub fn labels(&self) -> &ConnectionLabels {
        self.shared.metrics.labels()
    }

    pub fn metrics(&self) -> &DbMetrics {
        &self.shared.metrics
    }

    /// The wrapped driver connection.
    pub fn get_connection(&self) -> &C {
        self.shared.conn()
    }
}
