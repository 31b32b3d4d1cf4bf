//! btleplug-backed implementation of the transport traits.
//!
//! Provides scanning, connection establishment and notification delivery
//! on the host Bluetooth adapter.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{
    first_from, Advertisement, AdvertisementSource, AdvertisementStream, NotificationLink,
    Transport,
};
use crate::ble::uuids::is_probe_plus_service;
use crate::error::{ConnectionError, Error, Result};

/// Host Bluetooth stack backed by btleplug.
pub struct PlatformBackend {
    /// The BLE adapter to scan and connect with.
    adapter: Adapter,
    /// Connection attempts per `connect()` call.
    connect_attempts: u32,
    /// Delay between connection attempts.
    retry_delay: Duration,
    /// Timeout for a single connection attempt.
    attempt_timeout: Duration,
    /// Capacity of the frame channel handed to the supervisor.
    frame_buffer: usize,
    /// Adapter scan shared by every open advertisement stream.
    scan: ScanControl,
}

impl PlatformBackend {
    /// Create a backend on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a backend on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            scan: ScanControl::new(adapter.clone()),
            adapter,
            connect_attempts: 3,
            retry_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
            frame_buffer: 64,
        }
    }

    /// Set the connection retry parameters.
    pub fn set_connect_params(
        &mut self,
        attempts: u32,
        retry_delay: Duration,
        attempt_timeout: Duration,
    ) {
        self.connect_attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self.attempt_timeout = attempt_timeout;
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

/// Turn a central event into an advertisement, if it concerns a peripheral.
async fn advertisement_from_event(
    adapter: &Adapter,
    event: CentralEvent,
) -> Option<Advertisement<Peripheral>> {
    let id = match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => id,
        _ => return None,
    };

    let peripheral = match adapter.peripheral(&id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return None;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return None,
    };

    let payload = properties
        .manufacturer_data
        .values()
        .flatten()
        .copied()
        .collect();

    Some(Advertisement {
        address: properties.address.to_string(),
        device: peripheral,
        payload,
        rssi: properties.rssi,
    })
}

/// Check if a scan start failed only because a scan is already running.
///
/// BlueZ answers a second `StartDiscovery` from the same client with
/// `org.bluez.Error.InProgress`.
fn is_scan_in_progress(error: &btleplug::Error) -> bool {
    let message = error.to_string();
    message.contains("InProgress") || message.contains("in progress")
}

/// Reference-counted control of the adapter scan.
///
/// The first open stream starts the scan and the last one to close stops
/// it. Both transitions happen under one async lock so a stop queued by a
/// dropped stream cannot overtake the start for the next one.
#[derive(Clone)]
struct ScanControl {
    adapter: Adapter,
    streams: Arc<tokio::sync::Mutex<usize>>,
}

impl ScanControl {
    fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            streams: Arc::new(tokio::sync::Mutex::new(0)),
        }
    }

    async fn acquire(&self) -> Result<ScanGuard> {
        let mut streams = self.streams.lock().await;

        if *streams == 0 {
            match self.adapter.start_scan(ScanFilter::default()).await {
                Ok(()) => debug!("BLE scan started"),
                Err(e) if is_scan_in_progress(&e) => debug!("BLE scan already running"),
                Err(e) => {
                    return Err(Error::WatcherUnavailable {
                        reason: e.to_string(),
                    })
                }
            }
        }

        *streams += 1;
        trace!("Open advertisement streams: {}", *streams);

        Ok(ScanGuard {
            control: Some(self.clone()),
        })
    }

    async fn release(&self) {
        let mut streams = self.streams.lock().await;
        *streams = streams.saturating_sub(1);
        trace!("Open advertisement streams: {}", *streams);

        if *streams == 0 {
            match self.adapter.stop_scan().await {
                Ok(()) => debug!("BLE scan stopped"),
                Err(e) => debug!("Failed to stop BLE scan: {}", e),
            }
        }
    }
}

/// Keeps the scan running while alive.
struct ScanGuard {
    control: Option<ScanControl>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { control.release().await });
            }
            Err(_) => warn!("No runtime to stop the BLE scan on"),
        }
    }
}

/// Advertisement stream holding a share of the adapter scan.
struct ScanningStream {
    inner: BoxStream<'static, Advertisement<Peripheral>>,
    _guard: ScanGuard,
}

impl Stream for ScanningStream {
    type Item = Advertisement<Peripheral>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[async_trait]
impl AdvertisementSource for PlatformBackend {
    type Device = Peripheral;

    async fn advertisements(&self) -> Result<AdvertisementStream<Peripheral>> {
        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| Error::WatcherUnavailable {
                reason: e.to_string(),
            })?;

        let guard = self.scan.acquire().await?;

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move { advertisement_from_event(&adapter, event).await }
        });

        Ok(ScanningStream {
            inner: stream.boxed(),
            _guard: guard,
        }
        .boxed())
    }

    async fn find_device(&self, address: &str, window: Duration) -> Result<Option<Peripheral>> {
        // Devices the host already knows about are found without a scan.
        if let Ok(peripherals) = self.adapter.peripherals().await {
            for peripheral in peripherals {
                if let Ok(Some(properties)) = peripheral.properties().await {
                    if properties.address.to_string().eq_ignore_ascii_case(address) {
                        debug!("{} already known to the adapter", address);
                        return Ok(Some(peripheral));
                    }
                }
            }
        }

        let advertisements = self.advertisements().await?;
        Ok(first_from(advertisements, address, window).await)
    }
}

#[async_trait]
impl Transport<Peripheral> for PlatformBackend {
    async fn connect(
        &self,
        device: Peripheral,
        address: &str,
    ) -> std::result::Result<Box<dyn NotificationLink>, ConnectionError> {
        if device.is_connected().await.unwrap_or(false) {
            info!("Peripheral {} already connected at BLE level", address);
        } else {
            let mut attempts = 0;
            loop {
                attempts += 1;
                debug!(
                    "Connection attempt {} of {} to {}",
                    attempts, self.connect_attempts, address
                );

                let result = tokio::time::timeout(self.attempt_timeout, device.connect()).await;
                let failure = match result {
                    Ok(Ok(())) => break,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("timed out after {:?}", self.attempt_timeout),
                };

                warn!(
                    "Connection attempt {} to {} failed: {}",
                    attempts, address, failure
                );

                if attempts >= self.connect_attempts {
                    return Err(ConnectionError::EstablishmentFailed {
                        reason: format!("Failed after {} attempts: {}", attempts, failure),
                    });
                }

                tokio::time::sleep(self.retry_delay).await;
            }
        }

        device
            .discover_services()
            .await
            .map_err(|e| ConnectionError::EstablishmentFailed {
                reason: format!("Service discovery failed: {}", e),
            })?;

        info!("Connected to {}", address);

        Ok(Box::new(PlatformLink {
            adapter: self.adapter.clone(),
            peripheral: device,
            address: address.to_string(),
            frame_buffer: self.frame_buffer,
            forwarder: Mutex::new(None),
        }))
    }
}

/// An open connection to a peripheral.
struct PlatformLink {
    adapter: Adapter,
    peripheral: Peripheral,
    address: String,
    frame_buffer: usize,
    /// Task moving notifications into the frame channel.
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl NotificationLink for PlatformLink {
    async fn subscribe(
        &self,
        characteristic: Uuid,
    ) -> std::result::Result<mpsc::Receiver<Bytes>, ConnectionError> {
        let subscription_failed = |e: btleplug::Error| ConnectionError::SubscriptionFailed {
            reason: e.to_string(),
        };

        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or_else(|| ConnectionError::SubscriptionFailed {
                reason: format!("Characteristic not found: {}", characteristic),
            })?;

        debug!(
            "Found characteristic {} (relay service: {}), properties: {:?}",
            characteristic,
            is_probe_plus_service(&target.service_uuid),
            target.properties
        );

        // Open both streams before subscribing so no early frame or
        // disconnect is missed.
        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(subscription_failed)?;
        let mut events = self.adapter.events().await.map_err(subscription_failed)?;

        self.peripheral
            .subscribe(&target)
            .await
            .map_err(subscription_failed)?;

        debug!("Subscribed to notifications from {}", characteristic);

        let (frame_tx, frame_rx) = mpsc::channel(self.frame_buffer);
        let peripheral_id = self.peripheral.id();
        let address = self.address.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => match notification {
                        Some(n) if n.uuid == characteristic => {
                            trace!("Notification from {}: {:02X?}", address, n.value);
                            if frame_tx.send(Bytes::from(n.value)).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            debug!("Notification stream for {} ended", address);
                            break;
                        }
                    },
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                            info!("Device {} disconnected", address);
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        if let Some(previous) = self.forwarder.lock().replace(handle) {
            previous.abort();
        }

        Ok(frame_rx)
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }

        self.peripheral.disconnect().await.map_err(Error::Bluetooth)?;
        debug!("Disconnected from {}", self.address);

        Ok(())
    }
}

impl Drop for PlatformLink {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }
    }
}
