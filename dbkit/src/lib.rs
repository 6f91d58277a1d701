//! Instrumented database access with failover-aware retry.
//!
//! [`InstrumentedConnection`] and [`InstrumentedCursor`] wrap a driver
//! connection and cursor, count every operation into a shared
//! [`MetricsRegistry`], and handle driver failovers: an operation started
//! outside a transaction is replayed once after the driver reconnects, while
//! one interrupted inside a transaction surfaces as
//! [`DbError::TransactionResolutionUnknown`].

pub mod config;
pub mod database;
pub mod errors;
pub mod metrics;
pub mod types;

pub use config::{DatabaseConfig, FailoverConfig, ObservabilityConfig};
pub use database::{InstrumentedConnection, InstrumentedCursor, ManagedConnection};
pub use errors::{DbError, DriverError};
pub use metrics::{MetricKey, MetricsRegistry};
