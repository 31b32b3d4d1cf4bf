//! Advertisement watcher.
//!
//! Watches the advertisement stream for one target address and calls back
//! whenever that device is seen.

use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::ble::transport::AdvertisementSource;
use crate::error::{Error, Result};

/// What an armed watcher reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<D> {
    /// The target advertised; carries its device handle.
    Advertised(D),
    /// The advertisement stream ended by itself. The watcher is disarmed.
    StreamEnded,
}

/// Callback invoked for every watcher event.
pub type AdvertisementCallback<D> = Arc<dyn Fn(WatchEvent<D>) + Send + Sync>;

/// Filters advertisements down to a single target device.
///
/// The watcher can be armed and disarmed repeatedly. Arming replaces any
/// previous subscription instead of stacking a second one.
pub struct AdvertisementWatcher<S: AdvertisementSource> {
    /// Where advertisements come from.
    source: Arc<S>,
    /// Target address.
    address: String,
    /// Task forwarding matching advertisements to the callback.
    task: Option<JoinHandle<()>>,
}

impl<S: AdvertisementSource> AdvertisementWatcher<S> {
    /// Create a disarmed watcher for `address`.
    pub fn new(source: Arc<S>, address: impl Into<String>) -> Self {
        Self {
            source,
            address: address.into(),
            task: None,
        }
    }

    /// Arm the watcher.
    ///
    /// # Errors
    ///
    /// Returns `Error::WatcherUnavailable` if the advertisement stream cannot
    /// be opened. The watcher is left disarmed in that case.
    pub async fn start(&mut self, callback: AdvertisementCallback<S::Device>) -> Result<()> {
        self.stop();

        let mut advertisements = self.source.advertisements().await.map_err(|e| match e {
            Error::WatcherUnavailable { .. } => e,
            other => Error::WatcherUnavailable {
                reason: other.to_string(),
            },
        })?;

        let address = self.address.clone();
        debug!("Watching advertisements for {}", address);

        let handle = tokio::spawn(async move {
            while let Some(advertisement) = advertisements.next().await {
                if !advertisement.is_from(&address) {
                    trace!("Ignoring advertisement from {}", advertisement.address);
                    continue;
                }

                debug!(
                    "Target {} advertised (rssi: {:?})",
                    address, advertisement.rssi
                );
                callback(WatchEvent::Advertised(advertisement.device));
            }

            debug!("Advertisement stream for {} ended", address);
            callback(WatchEvent::StreamEnded);
        });

        self.task = Some(handle);

        Ok(())
    }

    /// Disarm the watcher. No-op if already disarmed.
    pub fn stop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
            debug!("Stopped watching advertisements for {}", self.address);
        }
    }

    /// Check if the watcher is armed.
    pub fn is_armed(&self) -> bool {
        self.task
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Get the target address.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl<S: AdvertisementSource> Drop for AdvertisementWatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
