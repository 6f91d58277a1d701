use std::sync::Arc;
use tracing::info;

use super::connection::InstrumentedConnection;
use super::driver::Driver;
use crate::config::{DatabaseConfig, FailoverConfig};
use crate::errors::DbError;
use crate::metrics::MetricsRegistry;

/// Owns at most one instrumented connection for an alias and reopens it when
/// it stops answering the health check.
pub struct ManagedConnection<D: Driver> {
    driver: Arc<D>,
    config: DatabaseConfig,
    failover: FailoverConfig,
    registry: Arc<MetricsRegistry>,
    connection: Option<InstrumentedConnection<D::Connection>>,
}

impl<D: Driver> ManagedConnection<D> {
    pub fn new(
        driver: Arc<D>,
        config: DatabaseConfig,
        failover: FailoverConfig,
        registry: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            driver,
            config,
            failover,
            registry,
            connection: None,
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The current connection, if one is open.
    pub fn connection(&self) -> Option<&InstrumentedConnection<D::Connection>> {
        self.connection.as_ref()
    }

    pub async fn connect(&mut self) -> Result<&InstrumentedConnection<D::Connection>, DbError> {
        let conn = InstrumentedConnection::open(
            self.driver.as_ref(),
            &self.config,
            &self.failover,
            self.registry.clone(),
        )
        .await?;
        Ok(self.connection.insert(conn))
    }

    /// Returns a usable connection, opening one if there is none and replacing
    /// the current one if it fails the health check.
    pub async fn ensure_connection(&mut self) -> Result<&InstrumentedConnection<D::Connection>, DbError> {
        let usable = match &self.connection {
            None => false,
            Some(conn) if conn.is_closed() => false,
            Some(conn) => {
                if conn.is_usable().await {
                    true
                } else {
                    info!("Connection '{}' is not usable, reconnecting", self.config.alias);
                    false
                }
            }
        };

        if !usable {
            self.close().await;
            return self.connect().await;
        }

        match &self.connection {
            Some(conn) => Ok(conn),
            None => Err(DbError::Closed(self.config.alias.clone())),
        }
    }

    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close().await;
        }
    }
}
