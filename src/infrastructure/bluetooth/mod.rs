//! Bluetooth Module
//!
//! Discovery of nearby wearables and streaming of their telemetry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 DeviceSessionController                  │
//! │     (command entry point, owns at most one session)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - timed   │  │ - endpoint │  │ - UUIDs  │
//! │   scan    │  │   lookup   │  │ - JSON   │
//! │ - dedup   │  │ - notify   │  │   decode │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       └──────┬───────┘
//!              ▼
//!        ┌───────────┐
//!        │   Radio   │  (bluest backend, or a mock in tests)
//!        └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - Capability trait over the platform BLE stack
//! - [`protocol`] - Telemetry endpoint UUIDs and payload decoding
//! - [`scanner`] - Time-bounded discovery session
//! - [`connection`] - Connection session from connect to teardown
//! - [`service`] - Controller that serializes scan/connect commands

#[cfg(feature = "bluest")]
pub mod bluest_radio;
pub mod connection;
#[cfg(test)]
pub(crate) mod mock;
pub mod protocol;
pub mod radio;
pub mod scanner;
pub mod service;

pub use service::DeviceSessionController;
