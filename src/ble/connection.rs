//! Connection state of the probe relay.

/// Lifecycle state of a connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not started.
    #[default]
    Idle,
    /// Waiting for the device to advertise.
    AwaitingAdvertisement,
    /// Opening the connection and subscribing to notifications.
    Connecting,
    /// Connected and receiving notifications.
    Connected,
    /// Tearing down after `stop()`.
    ShuttingDown,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::ShuttingDown)
    }

    /// Check if the supervisor is running (anything but `Idle`).
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::AwaitingAdvertisement => write!(f, "AwaitingAdvertisement"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}
