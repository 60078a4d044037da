//! Message types for the StrataDB driver protocol.
//!
//! Two message families share the frame codec: lock-step control messages on
//! a server's control connection, and correlated request/response envelopes
//! on the duplex stream owned by one transaction. Correlation identifiers
//! travel as 16-byte binary UUIDs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ServerError;
use crate::options::{QueryOptions, TransactionOptions, TransactionType};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DRIVER_LANG: &str = "rust";
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A unary request on the control connection. The `auth` field carries the
/// current bearer token, when one is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    pub body: ControlBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlBody {
    ConnectionOpen {
        protocol_version: u32,
        driver_lang: String,
        driver_version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    TokenCreate {
        username: String,
        password: String,
    },
    Ping,
    /// Promotes this connection to a transaction stream; everything after
    /// the acknowledgement is request/response envelopes.
    StreamAttach,
    DatabasesAll,
    DatabasesContains {
        name: String,
    },
    DatabasesCreate {
        name: String,
    },
    DatabaseDelete {
        name: String,
    },
    DatabaseSchema {
        name: String,
    },
    DatabaseTypeSchema {
        name: String,
    },
    UsersAll,
    UsersContains {
        username: String,
    },
    UsersCreate {
        username: String,
        password: String,
    },
    UserUpdate {
        username: String,
        new_username: String,
        new_password: String,
    },
    UserDelete {
        username: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    ConnectionOpen {
        #[serde(with = "uuid::serde::compact")]
        connection_id: Uuid,
        server_duration_millis: u64,
        token: String,
        databases: Vec<String>,
    },
    Pong {
        timestamp: i64,
    },
    Error {
        error: ServerError,
    },
}

impl ControlResponse {
    pub fn ok(data: Value) -> Self {
        ControlResponse::Ok { data: Some(data) }
    }

    pub fn ok_empty() -> Self {
        ControlResponse::Ok { data: None }
    }

    pub fn error(error: ServerError) -> Self {
        ControlResponse::Error { error }
    }

    pub fn pong() -> Self {
        ControlResponse::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A logical request multiplexed onto a transaction's duplex stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(with = "uuid::serde::compact")]
    pub req_id: Uuid,
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "req", rename_all = "snake_case")]
pub enum RequestBody {
    Open {
        database: String,
        transaction_type: TransactionType,
        options: TransactionOptions,
        network_latency_millis: u64,
    },
    Commit,
    Rollback,
    Close,
    StreamContinue,
    /// No-op keepalive for this transaction's stream.
    Ping,
    Query {
        query: String,
        options: QueryOptions,
    },
}

/// One response fragment for a logical request. Streaming requests may
/// receive many `Part` envelopes under one `req_id` before a terminal one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(with = "uuid::serde::compact")]
    pub req_id: Uuid,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "res", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Terminal result of a single-answer request.
    Done { payload: Value },
    /// One fragment of a streamed answer.
    Part { payload: Value },
    /// Flow-control marker for streamed answers.
    StreamSignal { signal: StreamSignal },
    /// Terminal error for the request.
    Error { error: ServerError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSignal {
    /// The server paused; send `StreamContinue` to receive more parts.
    Continue,
    /// The stream is exhausted.
    Done,
}
