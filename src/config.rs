//! Connection configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::PROBE_PLUS_NOTIFY_UUID;
use crate::error::{Error, Result};

/// Configuration for supervising one probe relay.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProbeConfig {
    /// Address of the relay to connect to.
    pub address: String,
    /// Characteristic the relay sends measurement frames on.
    pub notify_characteristic: Uuid,
    /// Upper bound for each of the connect and subscribe steps.
    pub connect_timeout: Duration,
    /// How long `start()` looks for the relay before giving up.
    ///
    /// `None` skips the lookup and waits for the relay indefinitely.
    pub discovery_timeout: Option<Duration>,
}

impl ProbeConfig {
    /// Default connect/subscribe timeout (30 seconds).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default discovery window at start (30 seconds).
    pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a configuration for `address` with default settings.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            notify_characteristic: PROBE_PLUS_NOTIFY_UUID,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: Some(Self::DEFAULT_DISCOVERY_TIMEOUT),
        }
    }

    /// Use a different notification characteristic.
    pub fn with_notify_characteristic(mut self, uuid: Uuid) -> Self {
        self.notify_characteristic = uuid;
        self
    }

    /// Set the connect/subscribe timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the discovery window, or `None` to start without looking first.
    pub fn with_discovery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParameter` for an empty address or a zero
    /// timeout or discovery window.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::InvalidParameter {
                name: "address".to_string(),
                value: format!("{:?}", self.address),
            });
        }

        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidParameter {
                name: "connect_timeout".to_string(),
                value: format!("{:?}", self.connect_timeout),
            });
        }

        if self.discovery_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidParameter {
                name: "discovery_timeout".to_string(),
                value: format!("{:?}", self.discovery_timeout),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProbeConfig::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(config.notify_characteristic, PROBE_PLUS_NOTIFY_UUID);
        assert_eq!(config.connect_timeout, ProbeConfig::DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(
            config.discovery_timeout,
            Some(ProbeConfig::DEFAULT_DISCOVERY_TIMEOUT)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let uuid = Uuid::from_u128(0x1234);
        let config = ProbeConfig::new("AA:BB:CC:DD:EE:FF")
            .with_notify_characteristic(uuid)
            .with_connect_timeout(Duration::from_secs(5))
            .with_discovery_timeout(None);
        assert_eq!(config.notify_characteristic, uuid);
        assert_eq!(config.discovery_timeout, None);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_empty_address() {
        let err = ProbeConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "address"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let err = ProbeConfig::new("AA:BB:CC:DD:EE:FF")
            .with_connect_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "connect_timeout"));
    }

    #[test]
    fn test_validate_rejects_zero_discovery_window() {
        let err = ProbeConfig::new("AA:BB:CC:DD:EE:FF")
            .with_discovery_timeout(Some(Duration::ZERO))
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "discovery_timeout"));
    }
}
