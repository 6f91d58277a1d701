use std::sync::Arc;
use tracing::debug;

use super::connection::{CallGuard, CallKind, ConnectionShared, FailureAction};
use super::driver::{DriverConnection, DriverCursor};
use crate::errors::DbError;
use crate::types::{Params, QueryOutput};

/// A driver cursor with per-statement metrics and failover retry.
///
/// Each call gets a new operation number from the connection, shared with
/// commits, rollbacks and other cursors. A replay after failover reuses the
/// number of the operation it replays, so logs and failover events can be
/// matched to the original call.
pub struct InstrumentedCursor<C: DriverConnection> {
    cursor: C::Cursor,
    shared: Arc<ConnectionShared<C>>,
    operations: u64,
}

impl<C: DriverConnection> InstrumentedCursor<C> {
    pub(crate) fn new(cursor: C::Cursor, shared: Arc<ConnectionShared<C>>) -> Self {
        Self {
            cursor,
            shared,
            operations: 0,
        }
    }

    /// Number of statements started on this cursor.
    pub fn operations(&self) -> u64 {
        self.operations
    }

    pub async fn execute(&mut self, statement: &str, params: &Params) -> Result<QueryOutput, DbError> {
        self.shared.ensure_open()?;
        self.operations += 1;
        let operation = self.shared.next_operation();

        let call = CallGuard::start(self.shared.metrics(), CallKind::Statement);
        let mut retries_left = self.shared.max_retries();

        let result = loop {
            let transaction = self.shared.transaction_state();
            match self.cursor.execute(statement, params).await {
                Ok(output) => break Ok(output),
                Err(err) => match self
                    .shared
                    .handle_failure(err, transaction, operation, retries_left > 0)
                    .await
                {
                    FailureAction::Retry => {
                        retries_left -= 1;
                        debug!("Replaying operation {} on '{}'", operation, self.shared.alias());
                    }
                    FailureAction::Surface(e) => break Err(e),
                },
            }
        };

        self.shared.finish_statement(statement, call, result.is_ok());
        result
    }

    pub async fn execute_many(&mut self, statement: &str, param_list: &[Params]) -> Result<QueryOutput, DbError> {
        self.shared.ensure_open()?;
        self.operations += 1;
        let operation = self.shared.next_operation();

        let call = CallGuard::start(self.shared.metrics(), CallKind::Statement);
        self.shared.metrics().execute_many(param_list.len());
        let mut retries_left = self.shared.max_retries();

        let result = loop {
            let transaction = self.shared.transaction_state();
            match self.cursor.execute_many(statement, param_list).await {
                Ok(output) => break Ok(output),
                Err(err) => match self
                    .shared
                    .handle_failure(err, transaction, operation, retries_left > 0)
                    .await
                {
                    FailureAction::Retry => {
                        retries_left -= 1;
                        debug!(
                            "Replaying execute_many operation {} ({} parameter sets) on '{}'",
                            operation,
                            param_list.len(),
                            self.shared.alias()
                        );
                    }
                    FailureAction::Surface(e) => break Err(e),
                },
            }
        };

        self.shared.finish_statement(statement, call, result.is_ok());
        result
    }
}
