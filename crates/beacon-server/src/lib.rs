//! # beacon-server
//!
//! Host process for the beacon scan core.
//!
//! Accepts scan/region command envelopes over HTTP, runs the dispatcher and a
//! simulated duty-cycled scanner, and buffers results per callback target
//! until clients poll for them.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod mailbox;
pub mod simulator;
pub mod state;
