//! Forward-looking storage-state engine for a population of electric
//! vehicle chargers subscribed to a single energy tariff inside a
//! smart-grid simulation.
//!
//! The library's only real surface is [`storage`]; [`config`],
//! [`telemetry`], and [`sim`] are the ambient harness that wires engines
//! together for the demo binary and are not part of the engine's own
//! contract.

pub mod config;
pub mod error;
pub mod sim;
pub mod storage;
pub mod telemetry;
