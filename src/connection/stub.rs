//! Typed RPC stub for one server, wrapping every call in the token guard.
//!
//! The guard hides routine token rotation: a call that fails with a token
//! expiry is retried exactly once after a blocking renewal, and only when
//! long-lived credentials are held. Any other failure, including a second
//! expiry or a failed renewal, propagates unmodified. The token cell is
//! only ever written here, and always as a complete replacement.

use std::time::Instant;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::connection::multiplexer::{BoxedRead, BoxedWrite};
use crate::connection::transport::Transport;
use crate::error::{DriverError, DriverResult};
use crate::options::Credentials;
use crate::protocol::{ControlBody, ControlResponse, DRIVER_LANG, DRIVER_VERSION, PROTOCOL_VERSION};

/// Result of the connection-open handshake.
pub(crate) struct HandshakeInfo {
    pub connection_id: Uuid,
    pub network_latency_millis: u64,
    pub databases: Vec<String>,
}

pub(crate) struct ServerStub {
    transport: Transport,
    credentials: Option<Credentials>,
    token: RwLock<Option<String>>,
}

impl ServerStub {
    pub(crate) fn new(
        transport: Transport,
        credentials: Option<Credentials>,
        token: Option<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            token: RwLock::new(token),
        }
    }

    pub(crate) fn address(&self) -> &str {
        self.transport.address()
    }

    /// Performs the connection-open handshake: exchanges protocol and driver
    /// version tags, obtains the initial token, and derives a clock-skew
    /// adjusted network latency estimate from the observed round trip.
    pub(crate) async fn open(&self) -> DriverResult<HandshakeInfo> {
        let body = ControlBody::ConnectionOpen {
            protocol_version: PROTOCOL_VERSION,
            driver_lang: DRIVER_LANG.to_string(),
            driver_version: DRIVER_VERSION.to_string(),
            username: self.credentials.as_ref().map(|c| c.username.clone()),
            password: self.credentials.as_ref().map(|c| c.password.clone()),
        };

        let start = Instant::now();
        let response = self.call_raw(body).await?;
        let round_trip_millis = start.elapsed().as_millis() as u64;

        match response {
            ControlResponse::ConnectionOpen {
                connection_id,
                server_duration_millis,
                token,
                databases,
            } => {
                *self.token.write().await = Some(token);
                let network_latency_millis =
                    round_trip_millis.saturating_sub(server_duration_millis).max(1);
                Ok(HandshakeInfo {
                    connection_id,
                    network_latency_millis,
                    databases,
                })
            }
            other => Err(DriverError::Protocol(format!(
                "unexpected connection open response: {:?}",
                other
            ))),
        }
    }

    /// A unary call through the token guard.
    pub(crate) async fn call(&self, body: ControlBody) -> DriverResult<ControlResponse> {
        match self.call_raw(body.clone()).await {
            Err(e) if e.is_token_expired() && self.credentials.is_some() => {
                self.renew_token().await?;
                self.call_raw(body).await
            }
            other => other,
        }
    }

    /// Opens a transaction stream through the token guard.
    pub(crate) async fn open_transaction_stream(&self) -> DriverResult<(BoxedRead, BoxedWrite)> {
        let auth = self.token.read().await.clone();
        match self.transport.open_transaction_stream(auth).await {
            Err(e) if e.is_token_expired() && self.credentials.is_some() => {
                self.renew_token().await?;
                let auth = self.token.read().await.clone();
                self.transport.open_transaction_stream(auth).await
            }
            other => other,
        }
    }

    pub(crate) async fn ping(&self) -> DriverResult<()> {
        match self.call(ControlBody::Ping).await? {
            ControlResponse::Pong { .. } => Ok(()),
            other => Err(DriverError::Protocol(format!(
                "unexpected ping response: {:?}",
                other
            ))),
        }
    }

    pub(crate) async fn close(&self) {
        self.transport.close().await;
    }

    async fn call_raw(&self, body: ControlBody) -> DriverResult<ControlResponse> {
        let auth = self.token.read().await.clone();
        self.transport.call(auth, body).await
    }

    /// One blocking renewal against the stored long-lived credentials. The
    /// replacement token is written wholesale; concurrent readers never see
    /// a partial update.
    async fn renew_token(&self) -> DriverResult<()> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| DriverError::IllegalState("token renewal without credentials".to_string()))?;
        tracing::debug!("authentication token expired, renewing");

        *self.token.write().await = None;
        let response = self
            .call_raw(ControlBody::TokenCreate {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            })
            .await?;
        match response {
            ControlResponse::Ok { data: Some(data) } => {
                let token = data
                    .get("token")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| DriverError::Protocol("no token in renewal response".to_string()))?
                    .to_string();
                *self.token.write().await = Some(token);
                tracing::debug!("authentication token renewed");
                Ok(())
            }
            other => Err(DriverError::Protocol(format!(
                "unexpected token renewal response: {:?}",
                other
            ))),
        }
    }
}
