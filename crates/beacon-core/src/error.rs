//! Unified error types for the beacon scan core.
//!
//! [`BeaconError`] covers the failures the core reports to its callers:
//! a full or closed command queue, an invalid region, and persistence
//! problems. Errors that only travel inside the core stay in their own
//! modules ([`EnvelopeError`] is logged by the dispatcher, [`DeliveryError`]
//! is handled by the scan service, [`ConfigError`] is returned by
//! [`Config::load`]).
//!
//! None of these errors is fatal to the hosting process. Command errors mean
//! "command ignored", persistence errors mean "assume no prior state".
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//!
//! fn require_region(unique_id: &str) -> Result<()> {
//!     if unique_id.is_empty() {
//!         return Err(BeaconError::InvalidRegion("unique id is empty".into()));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`EnvelopeError`]: crate::envelope::EnvelopeError
//! [`DeliveryError`]: crate::callback::DeliveryError
//! [`ConfigError`]: crate::config::ConfigError
//! [`Config::load`]: crate::config::Config::load

use thiserror::Error;

/// The unified error type for all beacon core operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // COMMAND QUEUE ERRORS
    // =========================================================================
    /// The inbound command queue is at capacity; the message was dropped.
    #[error("Command queue is full; message dropped")]
    QueueFull,

    /// The dispatcher has shut down; the message was dropped.
    #[error("Command queue is closed; message dropped")]
    QueueClosed,

    // =========================================================================
    // REGION ERRORS
    // =========================================================================
    /// A region could not be constructed from the supplied identity.
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// A Bluetooth address filter is not in `XX:XX:XX:XX:XX:XX` form.
    #[error("Invalid Bluetooth address: '{0}'. Expected format XX:XX:XX:XX:XX:XX")]
    InvalidBluetoothAddress(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading monitoring state.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Background work was requested outside of a Tokio runtime.
    #[error("No async runtime available: {0}")]
    RuntimeUnavailable(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beacon core operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Returns `true` if a message was refused by the command queue.
    #[inline]
    #[must_use]
    pub const fn is_queue_error(&self) -> bool {
        matches!(self, Self::QueueFull | Self::QueueClosed)
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError(_) | Self::IoError(_) | Self::RuntimeUnavailable(_)
        )
    }

    /// Returns `true` if retrying later may succeed.
    ///
    /// A full queue drains on its own; a closed one never reopens.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull)
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidRegion(_) | Self::InvalidBluetoothAddress(_) => 400,

            Self::PersistenceError(_) | Self::RuntimeUnavailable(_) | Self::IoError(_) => 500,

            Self::QueueFull | Self::QueueClosed => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::QueueFull => "QUEUE_FULL",
            Self::QueueClosed => "QUEUE_CLOSED",
            Self::InvalidRegion(_) => "INVALID_REGION",
            Self::InvalidBluetoothAddress(_) => "INVALID_BLUETOOTH_ADDRESS",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
