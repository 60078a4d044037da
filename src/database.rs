//! Database administration.
//!
//! Thin unary calls on the control connection; every call goes through the
//! connection's token guard.

use std::sync::Arc;

use serde_json::Value;

use crate::connection::stub::ServerStub;
use crate::error::{DriverError, DriverResult};
use crate::protocol::{ControlBody, ControlResponse};

/// Handle to one database on the server.
#[derive(Clone)]
pub struct Database {
    name: String,
    stub: Arc<ServerStub>,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full schema of the database as a definition query.
    pub async fn schema(&self) -> DriverResult<String> {
        let data = call_data(
            &self.stub,
            ControlBody::DatabaseSchema {
                name: self.name.clone(),
            },
        )
        .await?;
        extract_str(&data, "schema")
    }

    /// The type definitions only, without constraints.
    pub async fn type_schema(&self) -> DriverResult<String> {
        let data = call_data(
            &self.stub,
            ControlBody::DatabaseTypeSchema {
                name: self.name.clone(),
            },
        )
        .await?;
        extract_str(&data, "schema")
    }

    /// Deletes the database on the server.
    pub async fn delete(self) -> DriverResult<()> {
        self.stub
            .call(ControlBody::DatabaseDelete { name: self.name })
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

/// Database administration on one connection.
pub struct DatabaseManager {
    stub: Arc<ServerStub>,
}

impl DatabaseManager {
    pub(crate) fn new(stub: Arc<ServerStub>) -> Self {
        Self { stub }
    }

    pub async fn all(&self) -> DriverResult<Vec<Database>> {
        let data = call_data(&self.stub, ControlBody::DatabasesAll).await?;
        let names = data
            .get("databases")
            .and_then(|d| d.as_array())
            .ok_or_else(|| DriverError::Protocol("malformed database list".to_string()))?;
        Ok(names
            .iter()
            .filter_map(|n| n.as_str())
            .map(|name| Database {
                name: name.to_string(),
                stub: Arc::clone(&self.stub),
            })
            .collect())
    }

    pub async fn contains(&self, name: &str) -> DriverResult<bool> {
        let data = call_data(
            &self.stub,
            ControlBody::DatabasesContains {
                name: name.to_string(),
            },
        )
        .await?;
        data.get("contains")
            .and_then(|c| c.as_bool())
            .ok_or_else(|| DriverError::Protocol("malformed contains response".to_string()))
    }

    pub async fn create(&self, name: &str) -> DriverResult<Database> {
        self.stub
            .call(ControlBody::DatabasesCreate {
                name: name.to_string(),
            })
            .await?;
        tracing::debug!(server = %self.stub.address(), database = name, "database created");
        Ok(Database {
            name: name.to_string(),
            stub: Arc::clone(&self.stub),
        })
    }

    pub async fn get(&self, name: &str) -> DriverResult<Database> {
        if !self.contains(name).await? {
            return Err(DriverError::Server(crate::error::ServerError::new(
                "DATABASE_NOT_FOUND",
                format!("database not found: {}", name),
            )));
        }
        Ok(Database {
            name: name.to_string(),
            stub: Arc::clone(&self.stub),
        })
    }
}

async fn call_data(stub: &ServerStub, body: ControlBody) -> DriverResult<Value> {
    match stub.call(body).await? {
        ControlResponse::Ok { data: Some(data) } => Ok(data),
        ControlResponse::Ok { data: None } => Ok(Value::Null),
        other => Err(DriverError::Protocol(format!(
            "unexpected response: {:?}",
            other
        ))),
    }
}

fn extract_str(data: &Value, field: &str) -> DriverResult<String> {
    data.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| DriverError::Protocol(format!("missing field {:?} in response", field)))
}
