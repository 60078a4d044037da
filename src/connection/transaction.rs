//! Transaction sessions.
//!
//! A transaction owns one duplex stream (through its multiplexer), a
//! lifecycle state machine, and a keepalive task. Requests are only
//! accepted while the transaction is open; closing resolves everything
//! still pending and tears the stream down exactly once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::answer::QueryAnswer;
use crate::connection::multiplexer::{Multiplexer, RowStream};
use crate::connection::stub::ServerStub;
use crate::error::{DriverError, DriverResult};
use crate::options::{QueryOptions, TransactionOptions, TransactionType};
use crate::protocol::RequestBody;

/// Interval of the advisory ping that keeps the server-side transaction
/// from idling out.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Initializing,
    Open,
    Committing,
    RollingBack,
    Closing,
    Closed,
}

struct TransactionInner {
    id: Uuid,
    database: String,
    transaction_type: TransactionType,
    options: TransactionOptions,
    mux: Multiplexer,
    state: Mutex<TxState>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

/// An open transaction against one StrataDB server.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    /// Establishes the duplex stream, sends the open control message, and
    /// starts the keepalive. Failure leaves no partial state behind.
    pub(crate) async fn open(
        stub: Arc<ServerStub>,
        database: &str,
        transaction_type: TransactionType,
        options: TransactionOptions,
        network_latency_millis: u64,
        on_deregister: impl FnOnce(Uuid) + Send + 'static,
    ) -> DriverResult<Transaction> {
        let (read, write) = stub.open_transaction_stream().await?;
        let mux = Multiplexer::spawn(read, write);

        let open_call = mux.single(RequestBody::Open {
            database: database.to_string(),
            transaction_type,
            options: options.clone(),
            network_latency_millis,
        });
        let acquire_timeout = options
            .schema_lock_acquire_timeout_millis
            .or(options.transaction_timeout_millis);
        let opened = match acquire_timeout {
            Some(millis) => {
                match tokio::time::timeout(Duration::from_millis(millis), open_call).await {
                    Ok(result) => result,
                    Err(_) => Err(DriverError::Timeout(
                        "waiting to open the transaction".to_string(),
                    )),
                }
            }
            None => open_call.await,
        };
        if let Err(e) = opened {
            mux.close(None);
            return Err(e);
        }

        let id = Uuid::new_v4();
        // The keepalive travels as an envelope on this transaction's own
        // stream; a control-connection ping carries no transaction identity.
        let keepalive = tokio::spawn({
            let mux = mux.clone();
            async move {
                let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = mux.single(RequestBody::Ping).await {
                        tracing::warn!(transaction_id = %id, "keepalive ping failed: {}", e);
                    }
                }
            }
        });

        let inner = Arc::new(TransactionInner {
            id,
            database: database.to_string(),
            transaction_type,
            options,
            mux,
            state: Mutex::new(TxState::Open),
            keepalive: Mutex::new(Some(keepalive)),
        });

        // Stream death from any side finalizes the session: state, keepalive
        // and registry entry all go, exactly once.
        let weak = Arc::downgrade(&inner);
        inner.mux.on_close(move |_cause| {
            if let Some(inner) = weak.upgrade() {
                *inner.state.lock().unwrap() = TxState::Closed;
                if let Some(task) = inner.keepalive.lock().unwrap().take() {
                    task.abort();
                }
            }
            on_deregister(id);
        });

        Ok(Transaction { inner })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.inner.transaction_type
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.inner.options
    }

    pub fn is_open(&self) -> bool {
        *self.inner.state.lock().unwrap() == TxState::Open && self.inner.mux.is_open()
    }

    /// Runs a query expecting a single terminal result; the payload is
    /// relayed verbatim.
    pub async fn execute(&self, query: &str, options: QueryOptions) -> DriverResult<Value> {
        self.check_open()?;
        self.inner
            .mux
            .single(RequestBody::Query {
                query: query.to_string(),
                options,
            })
            .await
    }

    /// Runs a query and interprets the result payload as a typed answer.
    pub async fn query(&self, query: &str) -> DriverResult<QueryAnswer> {
        let payload = self.execute(query, QueryOptions::default()).await?;
        QueryAnswer::from_value(payload)
    }

    /// Runs a query expecting a streamed answer; fragments arrive lazily in
    /// server order.
    pub fn stream(&self, query: &str, options: QueryOptions) -> DriverResult<RowStream> {
        self.check_open()?;
        self.inner.mux.stream(RequestBody::Query {
            query: query.to_string(),
            options,
        })
    }

    /// Commits the transaction. Whether or not the commit message succeeds,
    /// the transaction is closed afterwards; the commit error, if any, is
    /// the one surfaced.
    pub async fn commit(&self) -> DriverResult<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                TxState::Open => *state = TxState::Committing,
                TxState::Closing | TxState::Closed => return Err(self.inner.mux.closed_error()),
                _ => return Err(DriverError::NotOpen),
            }
        }
        let result = self.inner.mux.single(RequestBody::Commit).await;
        self.close_internal().await;
        result.map(|_| ())
    }

    /// Rolls the transaction back. The transaction stays open afterwards,
    /// unless the message itself reveals the stream is unusable.
    pub async fn rollback(&self) -> DriverResult<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                TxState::Open => *state = TxState::RollingBack,
                TxState::Closing | TxState::Closed => return Err(self.inner.mux.closed_error()),
                _ => return Err(DriverError::NotOpen),
            }
        }
        let result = self.inner.mux.single(RequestBody::Rollback).await;
        match result {
            Ok(_) => {
                self.restore_open();
                Ok(())
            }
            Err(
                e @ (DriverError::TransactionClosed | DriverError::TransactionClosedWithCause(_)),
            ) => {
                self.close_internal().await;
                Err(e)
            }
            Err(e) => {
                self.restore_open();
                Err(e)
            }
        }
    }

    /// Closes the transaction. Idempotent: the teardown happens exactly
    /// once; concurrent or repeated calls are no-ops.
    pub async fn close(&self) -> DriverResult<()> {
        self.close_internal().await;
        Ok(())
    }

    /// Registers a callback fired exactly once when the transaction's
    /// stream closes, with the terminating fault if there was one.
    pub fn on_close(&self, callback: impl FnOnce(Option<DriverError>) + Send + 'static) {
        self.inner.mux.on_close(callback);
    }

    async fn close_internal(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if matches!(*state, TxState::Closing | TxState::Closed) {
                return;
            }
            *state = TxState::Closing;
        }
        if self.inner.mux.is_open() {
            // Tell the server; a failure here only means the stream is
            // already gone.
            let _ = self.inner.mux.single(RequestBody::Close).await;
        }
        self.inner.mux.close(None);
    }

    fn restore_open(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if *state == TxState::RollingBack {
            *state = TxState::Open;
        }
    }

    fn check_open(&self) -> DriverResult<()> {
        let state = *self.inner.state.lock().unwrap();
        match state {
            TxState::Open if self.inner.mux.is_open() => Ok(()),
            TxState::Open | TxState::Closing | TxState::Closed => {
                Err(self.inner.mux.closed_error())
            }
            TxState::Initializing | TxState::Committing | TxState::RollingBack => {
                Err(DriverError::NotOpen)
            }
        }
    }
}
