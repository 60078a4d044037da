//! Connection and transaction options.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

/// Long-lived credentials used for the initial token exchange and for
/// transparent token renewal.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Connection settings (TLS encryption, etc.) for connecting to StrataDB.
///
/// A root CA path that does not exist is rejected here, at construction
/// time, not when the first connection is attempted.
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    tls_enabled: bool,
    tls_root_ca: Option<PathBuf>,
}

impl DriverOptions {
    pub fn new(tls_enabled: bool, tls_root_ca: Option<&Path>) -> DriverResult<Self> {
        if let Some(path) = tls_root_ca {
            if !path.exists() {
                return Err(DriverError::Config(format!(
                    "TLS root CA file does not exist: {}",
                    path.display()
                )));
            }
        }
        Ok(Self {
            tls_enabled,
            tls_root_ca: tls_root_ca.map(|p| p.to_path_buf()),
        })
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls_enabled
    }

    pub fn tls_root_ca(&self) -> Option<&Path> {
        self.tls_root_ca.as_deref()
    }
}

/// The type of data access a transaction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Read,
    Write,
    Schema,
}

/// Per-transaction overrides of the server's default behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Timeout after which the server kills the transaction, preventing
    /// leaks from transactions that were never closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_timeout_millis: Option<u64>,
    /// How long to wait if opening the transaction is blocked by an
    /// exclusive schema write lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_lock_acquire_timeout_millis: Option<u64>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_timeout_millis(mut self, millis: u64) -> DriverResult<Self> {
        if millis < 1 {
            return Err(DriverError::Config(
                "transaction timeout must be positive".to_string(),
            ));
        }
        self.transaction_timeout_millis = Some(millis);
        Ok(self)
    }

    pub fn schema_lock_acquire_timeout_millis(mut self, millis: u64) -> DriverResult<Self> {
        if millis < 1 {
            return Err(DriverError::Config(
                "schema lock acquire timeout must be positive".to_string(),
            ));
        }
        self.schema_lock_acquire_timeout_millis = Some(millis);
        Ok(self)
    }
}

/// Per-query options, relayed to the server verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_instance_types: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch_size: Option<u64>,
}
