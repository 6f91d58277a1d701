// dbkit/src/database/scylla.rs
//
// ScyllaDB / Cassandra 4.x implementation of the driver traits.
//
// CQL has no multi-statement transactions, so commit and rollback are no-ops
// and the proxy should be configured with `autocommit: true`. The scylla
// driver refreshes topology on its own; failover status is reported by
// refreshing metadata and running a health query until it succeeds.

use async_trait::async_trait;
use scylla::batch::Batch;
use scylla::execution_profile::ExecutionProfile;
use scylla::frame::response::result::{CqlValue, Row};
use scylla::transport::errors::QueryError;
use scylla::{Session, SessionBuilder};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info};

use super::driver::{Driver, DriverConnection, DriverCursor, FailoverAware};
use crate::config::DatabaseConfig;
use crate::errors::DriverError;
use crate::types::{FailoverStatus, Params, QueryOutput};

const HEALTH_QUERY: &str = "SELECT now() FROM system.local";

#[derive(Debug, Clone, Default)]
pub struct ScyllaDriver;

impl ScyllaDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for ScyllaDriver {
    type Connection = ScyllaConnection;

    fn vendor(&self) -> &str {
        "scylla"
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<ScyllaConnection, DriverError> {
        ScyllaConnection::new(config).await
    }
}

/// ScyllaDB session wrapper
pub struct ScyllaConnection {
    session: Arc<Session>,
    keyspace: String,
}

impl ScyllaConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DriverError> {
        let contact_points = config.contact_points();
        info!("Connecting to ScyllaDB cluster: {:?}", contact_points);

        let mut session_builder = SessionBuilder::new()
            .known_nodes(&contact_points)
            .connection_timeout(config.connect_timeout())
            .use_keyspace(&config.database, true);

        let profile = ExecutionProfile::builder()
            .request_timeout(Some(config.socket_timeout()))
            .build();
        session_builder = session_builder.default_execution_profile_handle(profile.into_handle());

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            session_builder = session_builder.user(username, password);
        }

        let session = session_builder.build().await.map_err(|e| DriverError {
            class: error_class(&e),
            code: None,
            message: format!("Failed to connect to ScyllaDB: {}", e),
        })?;

        info!("Successfully connected to ScyllaDB keyspace: {}", config.database);

        Ok(Self {
            session: Arc::new(session),
            keyspace: config.database.clone(),
        })
    }

    pub fn get_session(&self) -> &Session {
        &self.session
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }
}

#[async_trait]
impl FailoverAware for ScyllaConnection {
    async fn failover_status(&self) -> FailoverStatus {
        if let Err(e) = self.session.refresh_metadata().await {
            debug!("Topology refresh still failing: {}", e);
            return FailoverStatus::InProgress;
        }

        match self.session.query_unpaged(HEALTH_QUERY, ()).await {
            Ok(_) => FailoverStatus::Completed { host: None },
            Err(e) => {
                debug!("Health query still failing: {}", e);
                FailoverStatus::InProgress
            }
        }
    }
}

#[async_trait]
impl DriverConnection for ScyllaConnection {
    type Cursor = ScyllaCursor;

    fn cursor(&self) -> ScyllaCursor {
        ScyllaCursor {
            session: self.session.clone(),
        }
    }

    async fn commit(&self) -> Result<(), DriverError> {
        debug!("CQL has no transactions; commit is a no-op");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        debug!("CQL has no transactions; rollback is a no-op");
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        // the session's pools shut down when the last Arc<Session> is dropped
        Ok(())
    }
}

pub struct ScyllaCursor {
    session: Arc<Session>,
}

impl ScyllaCursor {
    async fn run(&self, statement: &str, params: &Params) -> Result<QueryOutput, DriverError> {
        let values = bind_values(params)?;
        let result = self.session.query_unpaged(statement, values).await?;

        let rows = result
            .rows
            .unwrap_or_default()
            .iter()
            .map(row_to_json)
            .collect();
        Ok(QueryOutput::with_rows(rows))
    }
}

#[async_trait]
impl DriverCursor for ScyllaCursor {
    async fn execute(&mut self, statement: &str, params: &Params) -> Result<QueryOutput, DriverError> {
        self.run(statement, params).await
    }

    /// Sends every parameter set in one batch, so a failure applies none of
    /// them and a replay cannot duplicate writes.
    async fn execute_many(&mut self, statement: &str, param_list: &[Params]) -> Result<QueryOutput, DriverError> {
        if param_list.is_empty() {
            return Ok(QueryOutput::affected(0));
        }

        let mut batch = Batch::default();
        let mut values = Vec::with_capacity(param_list.len());
        for params in param_list {
            batch.append_statement(statement);
            values.push(bind_values(params)?);
        }

        self.session.batch(&batch, values).await?;
        Ok(QueryOutput::affected(param_list.len() as u64))
    }
}

impl From<QueryError> for DriverError {
    fn from(err: QueryError) -> Self {
        let code = match &err {
            QueryError::DbError(db_error, _) => Some(error_class(db_error)),
            _ => None,
        };

        DriverError {
            class: error_class(&err),
            code,
            message: err.to_string(),
        }
    }
}

/// Variant name of a driver error, e.g. `BrokenConnection` or `Unavailable`.
fn error_class(err: &impl Debug) -> String {
    let debug = format!("{:?}", err);
    debug
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

fn bind_values(params: &Params) -> Result<Vec<Option<CqlValue>>, DriverError> {
    params.iter().map(json_to_cql_value).collect()
}

/// `null` binds as an unset column; a `null` inside a list has no CQL
/// representation and is rejected.
fn json_to_cql_value(value: &serde_json::Value) -> Result<Option<CqlValue>, DriverError> {
    let value = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Bool(b) => CqlValue::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => CqlValue::BigInt(i),
            None => CqlValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => CqlValue::Text(s.clone()),
        serde_json::Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                match json_to_cql_value(item)? {
                    Some(v) => list.push(v),
                    None => {
                        return Err(DriverError::new(
                            "InvalidParameter",
                            "null elements are not allowed in CQL collections",
                        ))
                    }
                }
            }
            CqlValue::List(list)
        }
        serde_json::Value::Object(_) => CqlValue::Text(value.to_string()),
    };
    Ok(Some(value))
}

fn cql_to_json(value: &CqlValue) -> serde_json::Value {
    use serde_json::json;

    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => json!(s),
        CqlValue::Boolean(b) => json!(b),
        CqlValue::TinyInt(i) => json!(i),
        CqlValue::SmallInt(i) => json!(i),
        CqlValue::Int(i) => json!(i),
        CqlValue::BigInt(i) => json!(i),
        CqlValue::Float(f) => json!(f),
        CqlValue::Double(f) => json!(f),
        CqlValue::Uuid(u) => json!(u.to_string()),
        CqlValue::List(items) | CqlValue::Set(items) => {
            serde_json::Value::Array(items.iter().map(cql_to_json).collect())
        }
        CqlValue::Empty => serde_json::Value::Null,
        other => json!(format!("{:?}", other)),
    }
}

fn row_to_json(row: &Row) -> Vec<serde_json::Value> {
    row.columns
        .iter()
        .map(|column| column.as_ref().map(cql_to_json).unwrap_or(serde_json::Value::Null))
        .collect()
}
