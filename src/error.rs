//! Error types and result handling for user-cdc-watcher.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use user_cdc_watcher::{Error, Result};
//!
//! fn connect_to_broker() -> Result<()> {
//!     // Simulating a connection error
//!     Err(Error::Connection("broker unreachable".to_string()))
//! }
//!
//! match connect_to_broker() {
//!     Ok(()) => println!("Connected"),
//!     Err(Error::Connection(msg)) => eprintln!("Connection error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use crate::cdc::Operation;
use thiserror::Error;

/// The main error type for user-cdc-watcher operations.
///
/// Variants follow the failure classes of the consumer: configuration,
/// connection, decoding and cancellation. Handler failures are not
/// represented here; they belong to the caller and are only logged.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, reported at connect time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure while loading configuration sources.
    #[error("Configuration source error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// Kafka client or consumer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The record could not be parsed into a CDC envelope.
    #[error("failed to unmarshal CDC envelope: {0}")]
    Decode(#[from] serde_json::Error),

    /// The envelope carried an empty operation code.
    #[error("missing operation type in payload")]
    MissingOperation,

    /// A row image required by the operation was null.
    #[error("missing '{field}' data for operation '{op}'")]
    MissingField {
        /// Either `before` or `after`
        field: &'static str,
        /// The operation that requires the field
        op: Operation,
    },

    /// The operation code is not one of `c`, `u`, `d`, `r`.
    #[error("unknown operation type: {0}")]
    UnknownOperation(String),

    /// Structurally valid envelope with an unusable value.
    #[error("Invalid message format: {message}")]
    InvalidMessage {
        /// Description of what was invalid
        message: String,
    },

    /// Generic connection error not covered by specific types.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Every connection attempt failed.
    #[error("failed to connect after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The last connection failure
        #[source]
        source: Box<Error>,
    },

    /// The connection manager has been closed.
    #[error("connection manager is closed")]
    ManagerClosed,

    /// The liveness probe against the current connection failed.
    #[error("connection is not alive")]
    ConnectionNotAlive,

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// The owning cancellation token fired.
    ///
    /// This is the graceful shutdown path of the read loop rather than
    /// a failure.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` when the error signals cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns `true` for errors that must not be retried.
    pub(crate) fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigFile(_))
    }
}

/// A convenient Result type alias for user-cdc-watcher operations.
///
/// This is equivalent to `std::result::Result<T, user_cdc_watcher::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
