//! In-process StrataDB server imitation for driver integration tests.
//!
//! Speaks the real wire protocol over a loopback TCP listener: magic
//! preamble, framed control messages, and per-transaction envelope streams
//! after a stream attach. Behavior is scripted through `MockConfig`.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use uuid::Uuid;

use stratadb_driver::protocol::{
    ControlBody, ControlRequest, ControlResponse, FrameReader, FrameWriter, RequestBody,
    RequestEnvelope, ResponseBody, ResponseEnvelope, StreamSignal, DRIVER_MAGIC,
};
use stratadb_driver::{DriverResult, ServerError};

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "password";

#[derive(Clone)]
pub struct MockConfig {
    pub databases: Vec<String>,
    pub users: Vec<String>,
    /// Token accepted for connections that authenticate by token alone.
    pub preissued_token: Option<String>,
    /// Reject the next N authenticated calls with a token expiry.
    pub expire_calls: usize,
    /// Make token renewal fail with an authentication error.
    pub fail_token_renewal: bool,
    /// Answer commits with this error instead of success.
    pub fail_commit: Option<ServerError>,
    /// Never answer transaction open requests.
    pub hold_open: bool,
    /// Answer transaction open requests, then drop the stream.
    pub drop_stream_after_open: bool,
    /// Terminal payloads keyed by query text.
    pub answers: HashMap<String, Value>,
    /// Streamed fragments keyed by query text.
    pub stream_rows: HashMap<String, Vec<Value>>,
    /// Fragments sent before each flow-control pause.
    pub stream_batch_size: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            databases: vec!["inventory".to_string()],
            users: vec![USERNAME.to_string()],
            preissued_token: None,
            expire_calls: 0,
            fail_token_renewal: false,
            fail_commit: None,
            hold_open: false,
            drop_stream_after_open: false,
            answers: HashMap::new(),
            stream_rows: HashMap::new(),
            stream_batch_size: 2,
        }
    }
}

struct MockState {
    valid_tokens: HashSet<String>,
    tokens_issued: usize,
    expire_remaining: usize,
    last_token_seen: Option<String>,
    transaction_pings: usize,
    databases: Vec<String>,
    users: Vec<String>,
}

pub struct MockServer {
    address: String,
    state: Arc<Mutex<MockState>>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn spawn(config: MockConfig) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let mut valid_tokens = HashSet::new();
        if let Some(token) = &config.preissued_token {
            valid_tokens.insert(token.clone());
        }
        let state = Arc::new(Mutex::new(MockState {
            valid_tokens,
            tokens_issued: 0,
            expire_remaining: config.expire_calls,
            last_token_seen: None,
            transaction_pings: 0,
            databases: config.databases.clone(),
            users: config.users.clone(),
        }));

        let config = Arc::new(config);
        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state, config).await;
                });
            }
        });

        MockServer {
            address,
            state,
            accept_task,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn tokens_issued(&self) -> usize {
        self.state.lock().unwrap().tokens_issued
    }

    pub fn last_token_seen(&self) -> Option<String> {
        self.state.lock().unwrap().last_token_seen.clone()
    }

    /// Keepalive envelopes received on transaction streams.
    pub fn transaction_pings(&self) -> usize {
        self.state.lock().unwrap().transaction_pings
    }

    /// Arms token expiry for the next N authenticated calls.
    pub fn arm_expiry(&self, calls: usize) {
        self.state.lock().unwrap().expire_remaining = calls;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

fn token_expired() -> ControlResponse {
    ControlResponse::error(ServerError::new("TOKEN_EXPIRED", "token expired"))
}

fn issue_token(state: &mut MockState) -> String {
    state.tokens_issued += 1;
    let token = format!("token-{}", state.tokens_issued);
    state.valid_tokens.insert(token.clone());
    token
}

/// Validates the bearer token of an already-authenticated call, consuming
/// one armed expiry if any are pending.
fn check_auth(state: &mut MockState, auth: &Option<String>) -> Result<(), ControlResponse> {
    if state.expire_remaining > 0 {
        state.expire_remaining -= 1;
        if let Some(token) = auth {
            state.valid_tokens.remove(token);
        }
        return Err(token_expired());
    }
    match auth {
        Some(token) if state.valid_tokens.contains(token) => Ok(()),
        _ => Err(token_expired()),
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<MockState>>,
    config: Arc<MockConfig>,
) -> DriverResult<()> {
    let (read, write) = stream.into_split();
    let mut read = read;

    let mut magic = [0u8; 16];
    if read.read_exact(&mut magic).await.is_err() || magic != DRIVER_MAGIC {
        return Ok(());
    }

    let mut reader = FrameReader::new(read);
    let mut writer = FrameWriter::new(write);

    while let Some(request) = reader.read_frame::<ControlRequest>().await? {
        state.lock().unwrap().last_token_seen = request.auth.clone();
        let response = match request.body {
            ControlBody::ConnectionOpen {
                username, password, ..
            } => {
                let mut state = state.lock().unwrap();
                let authorized = match (&username, &password) {
                    (Some(u), Some(p)) => u == USERNAME && p == PASSWORD,
                    _ => request
                        .auth
                        .as_ref()
                        .is_some_and(|t| state.valid_tokens.contains(t)),
                };
                if authorized {
                    let token = match &request.auth {
                        Some(token) if username.is_none() => token.clone(),
                        _ => issue_token(&mut state),
                    };
                    ControlResponse::ConnectionOpen {
                        connection_id: Uuid::new_v4(),
                        server_duration_millis: 0,
                        token,
                        databases: state.databases.clone(),
                    }
                } else {
                    ControlResponse::error(ServerError::new("AUTH_FAILED", "invalid credentials"))
                }
            }
            ControlBody::TokenCreate { username, password } => {
                if config.fail_token_renewal {
                    ControlResponse::error(ServerError::new("AUTH_FAILED", "renewal rejected"))
                } else if username == USERNAME && password == PASSWORD {
                    let mut state = state.lock().unwrap();
                    let token = issue_token(&mut state);
                    ControlResponse::ok(json!({ "token": token }))
                } else {
                    ControlResponse::error(ServerError::new("AUTH_FAILED", "invalid credentials"))
                }
            }
            ControlBody::StreamAttach => {
                let auth_result = check_auth(&mut state.lock().unwrap(), &request.auth);
                match auth_result {
                    Ok(()) => {
                        writer.write_frame(&ControlResponse::ok_empty()).await?;
                        return serve_envelopes(reader, writer, state, config).await;
                    }
                    Err(response) => response,
                }
            }
            body => {
                let mut state = state.lock().unwrap();
                match check_auth(&mut state, &request.auth) {
                    Ok(()) => control_response(&mut state, body),
                    Err(response) => response,
                }
            }
        };
        writer.write_frame(&response).await?;
    }
    Ok(())
}

fn control_response(state: &mut MockState, body: ControlBody) -> ControlResponse {
    match body {
        ControlBody::Ping => ControlResponse::pong(),
        ControlBody::DatabasesAll => ControlResponse::ok(json!({ "databases": state.databases })),
        ControlBody::DatabasesContains { name } => {
            ControlResponse::ok(json!({ "contains": state.databases.contains(&name) }))
        }
        ControlBody::DatabasesCreate { name } => {
            if state.databases.contains(&name) {
                ControlResponse::error(ServerError::new("DATABASE_EXISTS", "already exists"))
            } else {
                state.databases.push(name);
                ControlResponse::ok_empty()
            }
        }
        ControlBody::DatabaseDelete { name } => {
            state.databases.retain(|d| d != &name);
            ControlResponse::ok_empty()
        }
        ControlBody::DatabaseSchema { name } => {
            ControlResponse::ok(json!({ "schema": format!("define # schema of {}", name) }))
        }
        ControlBody::DatabaseTypeSchema { name } => {
            ControlResponse::ok(json!({ "schema": format!("define # types of {}", name) }))
        }
        ControlBody::UsersAll => ControlResponse::ok(json!({ "users": state.users })),
        ControlBody::UsersContains { username } => {
            ControlResponse::ok(json!({ "contains": state.users.contains(&username) }))
        }
        ControlBody::UsersCreate { username, .. } => {
            state.users.push(username);
            ControlResponse::ok_empty()
        }
        ControlBody::UserUpdate { username, .. } => {
            if state.users.contains(&username) {
                ControlResponse::ok_empty()
            } else {
                ControlResponse::error(ServerError::new("USER_NOT_FOUND", "no such user"))
            }
        }
        ControlBody::UserDelete { username } => {
            state.users.retain(|u| u != &username);
            ControlResponse::ok_empty()
        }
        other => ControlResponse::error(ServerError::new(
            "UNSUPPORTED",
            format!("unsupported operation: {:?}", other),
        )),
    }
}

async fn serve_envelopes<R, W>(
    mut reader: FrameReader<R>,
    mut writer: FrameWriter<W>,
    state: Arc<Mutex<MockState>>,
    config: Arc<MockConfig>,
) -> DriverResult<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut pending_streams: HashMap<Uuid, Vec<Value>> = HashMap::new();

    while let Some(envelope) = reader.read_frame::<RequestEnvelope>().await? {
        let req_id = envelope.req_id;
        match envelope.body {
            RequestBody::Open { .. } => {
                if config.hold_open {
                    continue;
                }
                send_done(&mut writer, req_id, json!({})).await?;
                if config.drop_stream_after_open {
                    return Ok(());
                }
            }
            RequestBody::Ping => {
                state.lock().unwrap().transaction_pings += 1;
                send_done(&mut writer, req_id, json!({})).await?;
            }
            RequestBody::Query { query, .. } => {
                if let Some(rows) = config.stream_rows.get(&query) {
                    let mut remaining = rows.clone();
                    remaining.reverse();
                    send_stream_batch(&mut writer, req_id, &mut remaining, config.stream_batch_size)
                        .await?;
                    if !remaining.is_empty() {
                        pending_streams.insert(req_id, remaining);
                    }
                } else if let Some(payload) = config.answers.get(&query) {
                    send_done(&mut writer, req_id, payload.clone()).await?;
                } else {
                    send_done(&mut writer, req_id, json!({ "answer_type": "ok" })).await?;
                }
            }
            RequestBody::StreamContinue => {
                if let Some(mut remaining) = pending_streams.remove(&req_id) {
                    send_stream_batch(&mut writer, req_id, &mut remaining, config.stream_batch_size)
                        .await?;
                    if !remaining.is_empty() {
                        pending_streams.insert(req_id, remaining);
                    }
                }
            }
            RequestBody::Commit => match &config.fail_commit {
                Some(error) => {
                    writer
                        .write_frame(&ResponseEnvelope {
                            req_id,
                            body: ResponseBody::Error {
                                error: error.clone(),
                            },
                        })
                        .await?;
                }
                None => send_done(&mut writer, req_id, json!({})).await?,
            },
            RequestBody::Rollback | RequestBody::Close => {
                send_done(&mut writer, req_id, json!({})).await?;
            }
        }
    }
    Ok(())
}

async fn send_done<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    req_id: Uuid,
    payload: Value,
) -> DriverResult<()> {
    writer
        .write_frame(&ResponseEnvelope {
            req_id,
            body: ResponseBody::Done { payload },
        })
        .await
}

/// Sends up to one batch of fragments, then either a pause marker (more
/// fragments remain) or the terminal marker.
async fn send_stream_batch<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    req_id: Uuid,
    remaining: &mut Vec<Value>,
    batch_size: usize,
) -> DriverResult<()> {
    for _ in 0..batch_size {
        let Some(payload) = remaining.pop() else {
            break;
        };
        writer
            .write_frame(&ResponseEnvelope {
                req_id,
                body: ResponseBody::Part { payload },
            })
            .await?;
    }
    let signal = if remaining.is_empty() {
        StreamSignal::Done
    } else {
        StreamSignal::Continue
    };
    writer
        .write_frame(&ResponseEnvelope {
            req_id,
            body: ResponseBody::StreamSignal { signal },
        })
        .await?;
    Ok(())
}

pub fn credentials() -> stratadb_driver::Credentials {
    stratadb_driver::Credentials::new(USERNAME, PASSWORD)
}
