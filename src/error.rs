//! Error types for the probe-plus-ble crate.

use thiserror::Error;

use crate::data::SensorKind;
use crate::protocol::FrameType;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The advertisement stream could not be subscribed to.
    ///
    /// Returned by `start()` so the host can report the device as not found.
    #[error("Advertisement watcher unavailable: {reason}")]
    WatcherUnavailable {
        /// Description of why the stream is unavailable.
        reason: String,
    },

    /// A connection-level failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A notification frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

/// Failure to turn a notification frame into a measurement record.
///
/// Always recovered locally: the frame is logged and dropped, the
/// connection stays up.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The frame is shorter than its discriminator requires.
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Frame type, if the discriminator byte was present.
        frame_type: Option<FrameType>,
        /// Minimum length required.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// The discriminator byte matches no known layout.
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// A decoded value falls outside the physically valid range of its field.
    #[error("{sensor} out of range: {value}")]
    OutOfRange {
        /// The sensor the value belongs to.
        sensor: SensorKind,
        /// The decoded value.
        value: f64,
    },
}

/// Failure on the transport path, recovered by waiting for the next advertisement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The transport could not open a connection.
    #[error("Connection failed: {reason}")]
    EstablishmentFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Subscribing to the notification characteristic failed.
    #[error("Notification subscription failed: {reason}")]
    SubscriptionFailed {
        /// Description of why the subscription failed.
        reason: String,
    },

    /// The device dropped an established connection.
    #[error("Connection lost")]
    UnsolicitedDisconnect,
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
