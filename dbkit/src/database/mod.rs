pub mod connection;
pub mod cursor;
pub mod driver;
pub mod failover;
pub mod managed;
pub mod scylla;
pub mod statement;

pub use connection::InstrumentedConnection;
pub use cursor::InstrumentedCursor;
pub use driver::{Driver, DriverConnection, DriverCursor, FailoverAware};
pub use failover::{Classified, FailoverClassifier, FailoverController, FailoverEvent};
pub use managed::ManagedConnection;
pub use self::scylla::{ScyllaConnection, ScyllaDriver};
pub use statement::StatementKind;
