//! Builder for driver connections.

use std::path::PathBuf;

use crate::connection::Driver;
use crate::error::DriverResult;
use crate::options::{Credentials, DriverOptions};

/// Configures and opens a [`Driver`].
///
/// Authentication is either long-lived credentials (the driver renews its
/// token transparently when the server expires it) or a pre-issued token
/// (expiry then surfaces to the caller).
pub struct DriverBuilder {
    address: String,
    credentials: Option<Credentials>,
    token: Option<String>,
    tls_enabled: bool,
    tls_root_ca: Option<PathBuf>,
}

impl DriverBuilder {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            credentials: None,
            token: None,
            tls_enabled: false,
            tls_root_ca: None,
        }
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Uses a pre-issued authentication token instead of credentials.
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    /// Trusts the given PEM root CA instead of the system store. Implies
    /// TLS.
    pub fn tls_root_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_enabled = true;
        self.tls_root_ca = Some(path.into());
        self
    }

    /// Validates the configuration and opens the connection.
    pub async fn connect(self) -> DriverResult<Driver> {
        let options = DriverOptions::new(self.tls_enabled, self.tls_root_ca.as_deref())?;
        Driver::open(&self.address, self.credentials, self.token, options).await
    }
}
