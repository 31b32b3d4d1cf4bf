// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # probe-plus-ble
//!
//! A Rust client for Probe Plus wireless meat probes, which report through
//! a relay hub over Bluetooth Low Energy.
//!
//! The client waits for the relay to advertise, connects, subscribes to its
//! notification characteristic and turns every frame into a
//! [`MeasurementRecord`] delivered to registered listeners. When the relay
//! goes out of range the client goes back to waiting for it.
//!
//! ## Features
//!
//! - **Advertisement-driven connection**: Connects only when the relay is seen
//! - **Automatic recovery**: Failed or dropped connections re-arm discovery
//! - **Frame decoding**: Temperature, battery, voltage and signal strength
//! - **Listener fan-out**: Any number of listeners, isolated from each other
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use probe_plus_ble::{PlatformBackend, ProbeConfig, ProbeCoordinator, Result};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let backend = Arc::new(PlatformBackend::new().await?);
//!     let config = ProbeConfig::new("AA:BB:CC:DD:EE:FF");
//!     let coordinator = ProbeCoordinator::new(backend, config)?;
//!
//!     let _handle = coordinator.add_listener(|record| {
//!         for (sensor, value) in record.present() {
//!             println!("{}: {} {}", sensor, value, sensor.unit());
//!         }
//!     });
//!
//!     coordinator.start().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     coordinator.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod broadcaster;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod protocol;
pub mod supervisor;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience
pub use ble::{ConnectionState, PlatformBackend};
pub use broadcaster::{ListenerHandle, UpdateBroadcaster};
pub use config::ProbeConfig;
pub use coordinator::ProbeCoordinator;
pub use data::{MeasurementRecord, SensorKind};
pub use error::{ConnectionError, DecodeError, Error, Result};
pub use protocol::{decode, FrameType};
pub use supervisor::ConnectionSupervisor;
