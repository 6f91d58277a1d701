// dbkit/src/database/driver.rs
//
// Narrow interface to the underlying database driver. The proxies in this
// crate only ever talk to a driver through these traits.

use async_trait::async_trait;

use crate::config::DatabaseConfig;
use crate::errors::DriverError;
use crate::types::{FailoverStatus, Params, QueryOutput};

/// Opens connections for one database vendor.
#[async_trait]
pub trait Driver: Send + Sync {
    type Connection: DriverConnection;

    /// Vendor name used in the `vendor` metric label.
    fn vendor(&self) -> &str;

    async fn connect(&self, config: &DatabaseConfig) -> Result<Self::Connection, DriverError>;
}

/// The driver's own failover signal.
#[async_trait]
pub trait FailoverAware: Send + Sync {
    /// Polled while a failover is being handled. Reports whether the driver
    /// has finished moving to a healthy cluster member.
    async fn failover_status(&self) -> FailoverStatus;
}

/// One open driver connection.
///
/// Methods take `&self`: a connection is shared between its cursors, and the
/// driver is expected to reconnect underneath them on failover.
#[async_trait]
pub trait DriverConnection: FailoverAware + 'static {
    type Cursor: DriverCursor;

    /// Creates a cursor. Must not perform I/O.
    fn cursor(&self) -> Self::Cursor;

    async fn commit(&self) -> Result<(), DriverError>;

    async fn rollback(&self) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait DriverCursor: Send {
    async fn execute(&mut self, statement: &str, params: &Params) -> Result<QueryOutput, DriverError>;

    async fn execute_many(
        &mut self,
        statement: &str,
        param_list: &[Params],
    ) -> Result<QueryOutput, DriverError>;
}
