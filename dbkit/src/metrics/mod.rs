pub mod db;
pub mod registry;

pub use db::{ConnectionLabels, DbMetrics, Outcome};
pub use registry::{MetricKey, MetricsRegistry};
