//! Virtual Power Plant dispatch engine.
//!
//! Tracks a fleet of distributed energy resources, splits aggregate
//! import/export targets across them in merit order and drives the targets
//! from time-based grid service schedules or grid frequency events.

/// Command-line parsing for the binary.
pub mod cli;
pub mod config;
/// Operator console verbs.
pub mod console;
pub mod devices;
pub mod io;
pub mod runtime;
/// Aggregation, dispatch and grid service modules.
pub mod sim;
pub mod telemetry;
/// Outbound commands and inbound resource events.
pub mod transport;
