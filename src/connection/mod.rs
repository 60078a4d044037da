//! Driver connection: the registry of server bindings and open
//! transactions.

mod builder;
pub(crate) mod multiplexer;
pub(crate) mod stub;
pub(crate) mod transaction;
pub(crate) mod transport;

pub use builder::DriverBuilder;
pub use multiplexer::RowStream;
pub use transaction::Transaction;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::database::DatabaseManager;
use crate::error::{DriverError, DriverResult};
use crate::options::{Credentials, DriverOptions, TransactionOptions, TransactionType};
use crate::user::UserManager;
use stub::ServerStub;
use transport::Transport;

/// One server binding: the transport/stub pair for a single address, plus
/// what the connection handshake told us about it.
pub(crate) struct ServerConnection {
    stub: Arc<ServerStub>,
    connection_id: Uuid,
    network_latency_millis: u64,
}

struct DriverInner {
    servers: Mutex<HashMap<String, Arc<ServerConnection>>>,
    transactions: Mutex<HashMap<Uuid, Transaction>>,
    is_open: AtomicBool,
}

/// A connection to a StrataDB deployment. Owns one server binding per
/// address and the set of live transactions; closing the driver cascades
/// to both.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("is_open", &self.inner.is_open)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Connects with username/password credentials and default options.
    pub async fn connect(address: &str, credentials: Credentials) -> DriverResult<Driver> {
        DriverBuilder::new(address)
            .credentials(credentials)
            .connect()
            .await
    }

    pub(crate) async fn open(
        address: &str,
        credentials: Option<Credentials>,
        token: Option<String>,
        options: DriverOptions,
    ) -> DriverResult<Driver> {
        let transport = Transport::connect(address, &options).await?;
        let stub = Arc::new(ServerStub::new(transport, credentials, token));
        let handshake = stub.open().await?;
        tracing::info!(
            address,
            connection_id = %handshake.connection_id,
            latency_millis = handshake.network_latency_millis,
            databases = handshake.databases.len(),
            "driver connection opened"
        );

        let server = Arc::new(ServerConnection {
            stub,
            connection_id: handshake.connection_id,
            network_latency_millis: handshake.network_latency_millis,
        });
        let mut servers = HashMap::new();
        servers.insert(address.to_string(), server);

        Ok(Driver {
            inner: Arc::new(DriverInner {
                servers: Mutex::new(servers),
                transactions: Mutex::new(HashMap::new()),
                is_open: AtomicBool::new(true),
            }),
        })
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open.load(Ordering::SeqCst)
    }

    /// The server-assigned identifier of this connection.
    pub fn connection_id(&self) -> Option<Uuid> {
        let servers = self.inner.servers.lock().unwrap();
        servers.values().next().map(|s| s.connection_id)
    }

    /// Verifies the connection with one round trip on the control
    /// connection.
    pub async fn ping(&self) -> DriverResult<()> {
        if !self.is_open() {
            return Err(DriverError::NotOpen);
        }
        self.pick_server()?.stub.ping().await
    }

    /// Opens a transaction with default options.
    pub async fn transaction(
        &self,
        database: &str,
        transaction_type: TransactionType,
    ) -> DriverResult<Transaction> {
        self.transaction_with_options(database, transaction_type, TransactionOptions::default())
            .await
    }

    /// Opens a transaction against a chosen server binding. On failure no
    /// transaction record is registered.
    pub async fn transaction_with_options(
        &self,
        database: &str,
        transaction_type: TransactionType,
        options: TransactionOptions,
    ) -> DriverResult<Transaction> {
        if !self.is_open() {
            return Err(DriverError::NotOpen);
        }
        let server = self.pick_server()?;

        let registry = Arc::downgrade(&self.inner);
        let transaction = Transaction::open(
            Arc::clone(&server.stub),
            database,
            transaction_type,
            options,
            server.network_latency_millis,
            move |id| {
                if let Some(inner) = registry.upgrade() {
                    inner.transactions.lock().unwrap().remove(&id);
                }
            },
        )
        .await?;

        {
            let mut transactions = self.inner.transactions.lock().unwrap();
            if transactions.contains_key(&transaction.id()) {
                drop(transactions);
                let _ = transaction.close().await;
                return Err(DriverError::IllegalState(format!(
                    "transaction id already registered: {}",
                    transaction.id()
                )));
            }
            transactions.insert(transaction.id(), transaction.clone());
        }
        // The stream can die between open and registration; the deregister
        // callback has then already run and removed nothing.
        if !transaction.is_open() {
            let mut transactions = self.inner.transactions.lock().unwrap();
            transactions.remove(&transaction.id());
        }
        Ok(transaction)
    }

    pub fn databases(&self) -> DriverResult<DatabaseManager> {
        if !self.is_open() {
            return Err(DriverError::NotOpen);
        }
        Ok(DatabaseManager::new(Arc::clone(&self.pick_server()?.stub)))
    }

    pub fn users(&self) -> DriverResult<UserManager> {
        if !self.is_open() {
            return Err(DriverError::NotOpen);
        }
        Ok(UserManager::new(Arc::clone(&self.pick_server()?.stub)))
    }

    /// The number of transactions currently registered.
    pub fn open_transaction_count(&self) -> usize {
        self.inner.transactions.lock().unwrap().len()
    }

    /// Closes every live transaction (best-effort, continuing past
    /// individual failures), then tears down every server binding.
    pub async fn close(&self) {
        if !self.inner.is_open.swap(false, Ordering::SeqCst) {
            return;
        }
        let transactions: Vec<Transaction> = {
            let mut map = self.inner.transactions.lock().unwrap();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for transaction in transactions {
            if let Err(e) = transaction.close().await {
                tracing::warn!(transaction_id = %transaction.id(), "failed to close transaction: {}", e);
            }
        }
        let servers: Vec<Arc<ServerConnection>> = {
            let map = self.inner.servers.lock().unwrap();
            map.values().cloned().collect()
        };
        for server in servers {
            server.stub.close().await;
        }
        tracing::info!("driver connection closed");
    }

    fn pick_server(&self) -> DriverResult<Arc<ServerConnection>> {
        let servers = self.inner.servers.lock().unwrap();
        servers
            .values()
            .next()
            .cloned()
            .ok_or(DriverError::NotOpen)
    }
}
