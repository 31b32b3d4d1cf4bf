//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy side of the client:
//! the transport seams, the btleplug backend, advertisement watching and
//! the connection state type.

pub mod connection;
pub mod platform;
pub mod transport;
pub mod uuids;
pub mod watcher;

pub use connection::ConnectionState;
pub use platform::PlatformBackend;
pub use transport::{
    Advertisement, AdvertisementSource, AdvertisementStream, BleBackend, NotificationLink,
    Transport,
};
pub use uuids::*;
pub use watcher::{AdvertisementCallback, AdvertisementWatcher, WatchEvent};
