//! Braslet: BLE client for a fitness wristband.
//!
//! Scans for nearby peripherals, connects to one, subscribes to its telemetry
//! characteristic and decodes each JSON notification into a
//! [`TelemetryRecord`](domain::models::TelemetryRecord).

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;
