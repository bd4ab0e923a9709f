//! # beacon-core
//!
//! Control core for a background beacon scanning service.
//!
//! Clients subscribe to regions over a message channel. The core keeps the
//! table of ranged regions and the table of monitored regions, and drives one
//! shared, duty-cycled scanner: it runs while at least one region is ranged or
//! monitored and stops as soon as none are.
//!
//! ## Architecture
//!
//! - [`envelope`] / [`bundle`] - Wire encoding of scan/region commands
//! - [`dispatcher`] - Bounded inbound queue and the serialized command consumer
//! - [`service`] - The scan service owning both tables and the scanner decision
//! - [`ranging`] - Ranged region table and per-cycle beacon accumulation
//! - [`monitoring`] - Monitored region tracker with enter/exit transitions
//! - [`storage`] - Durable snapshot of monitoring state
//! - [`controller`] - Contract for the duty-cycled scanner
//! - [`callback`] - Result delivery to subscribing clients
//! - [`region`] - Region and beacon model
//! - [`config`] - Layered configuration
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bundle;
pub mod callback;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod monitoring;
pub mod ranging;
pub mod region;
pub mod service;
pub mod storage;

// Re-export primary types for convenience
pub use bundle::{Bundle, BundleValue};
#[cfg(any(test, feature = "mock-scanner"))]
pub use callback::RecordingDelivery;
pub use callback::{CallbackTarget, DeliveryError, MonitoringData, RangingData, ResultDelivery};
pub use config::{Config, ConfigError, ConfigResult};
#[cfg(any(test, feature = "mock-scanner"))]
pub use controller::{MockScanController, ScannerCall};
pub use controller::ScanController;
pub use dispatcher::{channel, CommandSender, DispatchOutcome, DispatchStats, Dispatcher};
pub use envelope::{
    Command, CommandData, CommandKind, EnvelopeError, Message, RangeUpdatePeriods, ScanPeriods,
    ScanSettings, SettingsData,
};
pub use error::{BeaconError, Result};
pub use monitoring::{MonitoringStatus, RegionState};
pub use ranging::RangedRegions;
pub use region::{is_valid_mac_address, Beacon, Region};
pub use service::{CycleReport, ScanService};
pub use storage::{default_data_dir, StatusPersister, StatusStore};
