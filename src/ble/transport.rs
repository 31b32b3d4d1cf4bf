//! Seams between the supervisor and the host Bluetooth stack.
//!
//! The supervisor only talks to the stack through these traits. The
//! `platform` module implements them on top of btleplug; tests use an
//! in-memory fake.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{ConnectionError, Result};

/// An advertisement seen by the host scanner.
#[derive(Debug, Clone)]
pub struct Advertisement<D> {
    /// Address of the advertising device.
    pub address: String,
    /// Handle the transport needs to connect to the device.
    pub device: D,
    /// Raw manufacturer payload.
    pub payload: Vec<u8>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl<D> Advertisement<D> {
    /// Check if this advertisement comes from `address`.
    ///
    /// Hosts report MAC addresses in either case, so the comparison
    /// ignores ASCII case.
    pub fn is_from(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

/// Stream of advertisements. Dropping it ends the subscription.
pub type AdvertisementStream<D> = BoxStream<'static, Advertisement<D>>;

/// Source of nearby-device advertisements.
#[async_trait]
pub trait AdvertisementSource: Send + Sync + 'static {
    /// Device handle carried by advertisements.
    type Device: Clone + Send + Sync + 'static;

    /// Open a new advertisement subscription.
    ///
    /// # Errors
    ///
    /// Returns `Error::WatcherUnavailable` if the stream cannot be opened.
    async fn advertisements(&self) -> Result<AdvertisementStream<Self::Device>>;

    /// Look for `address` for at most `window`.
    ///
    /// Returns `Ok(None)` if the device did not advertise in time.
    ///
    /// # Errors
    ///
    /// Returns `Error::WatcherUnavailable` if the stream cannot be opened.
    async fn find_device(&self, address: &str, window: Duration) -> Result<Option<Self::Device>> {
        let advertisements = self.advertisements().await?;
        Ok(first_from(advertisements, address, window).await)
    }
}

/// Take the device handle of the first advertisement from `address`,
/// giving up after `window` or when the stream ends.
pub async fn first_from<D>(
    mut advertisements: AdvertisementStream<D>,
    address: &str,
    window: Duration,
) -> Option<D> {
    let search = async {
        while let Some(advertisement) = advertisements.next().await {
            if advertisement.is_from(address) {
                return Some(advertisement.device);
            }
        }
        None
    };

    tokio::time::timeout(window, search).await.unwrap_or(None)
}

/// Opens connections to advertised devices.
#[async_trait]
pub trait Transport<D: Send + 'static>: Send + Sync + 'static {
    /// Connect to `device`. May retry internally; the outcome is final.
    async fn connect(
        &self,
        device: D,
        address: &str,
    ) -> std::result::Result<Box<dyn NotificationLink>, ConnectionError>;
}

/// An open connection that can deliver notification frames.
#[async_trait]
pub trait NotificationLink: Send + Sync {
    /// Subscribe to notifications on `characteristic`.
    ///
    /// Each notification is delivered as one frame on the returned channel.
    /// The channel closes when the device disconnects.
    async fn subscribe(
        &self,
        characteristic: Uuid,
    ) -> std::result::Result<mpsc::Receiver<Bytes>, ConnectionError>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Everything the supervisor needs from a host stack.
pub trait BleBackend: AdvertisementSource + Transport<<Self as AdvertisementSource>::Device> {}

impl<T> BleBackend for T where T: AdvertisementSource + Transport<<T as AdvertisementSource>::Device> {}
