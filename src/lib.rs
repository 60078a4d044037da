//! Rust driver for StrataDB.
//!
//! The driver speaks the StrataDB wire protocol over TCP (optionally TLS):
//! a lock-step control connection per server for unary calls, and one
//! dedicated duplex stream per transaction on which concurrent requests are
//! multiplexed by 16-byte correlation ids.
//!
//! ```no_run
//! use stratadb_driver::{Credentials, Driver, TransactionType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver =
//!         Driver::connect("localhost:7687", Credentials::new("admin", "password")).await?;
//!
//!     let tx = driver.transaction("inventory", TransactionType::Write).await?;
//!     tx.query("insert $p isa person, has name \"alice\";").await?;
//!     tx.commit().await?;
//!
//!     driver.close().await;
//!     Ok(())
//! }
//! ```

pub mod answer;
pub mod connection;
pub mod database;
pub mod error;
pub mod options;
pub mod protocol;
pub mod user;

pub use answer::{ConceptRow, QueryAnswer};
pub use connection::{Driver, DriverBuilder, RowStream, Transaction};
pub use database::{Database, DatabaseManager};
pub use error::{DriverError, DriverResult, ServerError};
pub use options::{Credentials, DriverOptions, QueryOptions, TransactionOptions, TransactionType};
pub use user::{User, UserManager};
