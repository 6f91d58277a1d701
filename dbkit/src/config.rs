use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::errors::DbError;

/// Connection parameters for one database alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Logical name of the connection, used as the `alias` metric label.
    pub alias: String,
    /// Overrides the driver's vendor name in the `vendor` metric label.
    pub vendor: Option<String>,
    pub hosts: Vec<String>,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
    /// Per-request timeout applied by the driver once connected.
    pub socket_timeout_secs: u64,
    /// When set, statements outside an explicit `BEGIN` never open a transaction.
    pub autocommit: bool,
    pub health_check_statement: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            alias: "default".to_string(),
            vendor: None,
            hosts: vec!["localhost".to_string()],
            port: 9042,
            database: "system".to_string(),
            username: None,
            password: None,
            connect_timeout_secs: 30,
            socket_timeout_secs: 30,
            autocommit: false,
            health_check_statement: "SELECT now() FROM system.local".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    pub fn contact_points(&self) -> Vec<String> {
        self.hosts
            .iter()
            .map(|host| format!("{}:{}", host, self.port))
            .collect()
    }
}

/// Failover detection and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Driver error codes or error classes that mark a failover. Matched exactly.
    pub signatures: HashSet<String>,
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Automatic retries per operation after a successful failover. At most 1.
    pub max_retries: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        let signatures = [
            // PostgreSQL connection exception class
            "08001",
            "08003",
            "08006",
            // admin_shutdown, raised when a writer is demoted
            "57P01",
            "BrokenConnection",
            "ConnectionPoolError",
        ];

        Self {
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
            wait_timeout_ms: 30_000,
            poll_interval_ms: 250,
            max_retries: 1,
        }
    }
}

impl FailoverConfig {
    pub const MAX_RETRIES: u32 = 1;

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn with_signatures<I, S>(mut self, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signatures = signatures.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), DbError> {
        if self.max_retries > Self::MAX_RETRIES {
            return Err(DbError::Config(format!(
                "max_retries must be at most {}, got {}",
                Self::MAX_RETRIES,
                self.max_retries
            )));
        }
        if self.wait_timeout_ms == 0 {
            return Err(DbError::Config("wait_timeout_ms must be greater than zero".to_string()));
        }
        if self.signatures.iter().any(|s| s.trim().is_empty()) {
            return Err(DbError::Config("failover signatures must not be empty strings".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_port: u16,
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            log_level: "info".to_string(),
        }
    }
}
