//! Lifecycle coordinator.
//!
//! The outer surface of the crate: one coordinator per configured relay.
//! It builds the supervisor on `start()`, tears it down on `stop()` and
//! keeps the listener registry across restarts.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::ble::connection::ConnectionState;
use crate::ble::transport::BleBackend;
use crate::broadcaster::{ListenerHandle, UpdateBroadcaster};
use crate::config::ProbeConfig;
use crate::data::MeasurementRecord;
use crate::error::{Error, Result};
use crate::supervisor::ConnectionSupervisor;

/// Starts, stops and observes the connection to one probe relay.
///
/// # Example
///
/// ```no_run
/// use probe_plus_ble::{PlatformBackend, ProbeConfig, ProbeCoordinator};
/// use std::sync::Arc;
///
/// # async fn example() -> probe_plus_ble::Result<()> {
/// let backend = Arc::new(PlatformBackend::new().await?);
/// let coordinator = ProbeCoordinator::new(backend, ProbeConfig::new("AA:BB:CC:DD:EE:FF"))?;
///
/// let _handle = coordinator.add_listener(|record| {
///     if let Some(t) = record.probe_temperature {
///         println!("Probe: {:.1}°C", t);
///     }
/// });
///
/// coordinator.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct ProbeCoordinator<B: BleBackend> {
    backend: Arc<B>,
    config: ProbeConfig,
    broadcaster: Arc<UpdateBroadcaster>,
    /// The running supervisor, if started.
    supervisor: Mutex<Option<ConnectionSupervisor<B>>>,
}

impl<B: BleBackend> ProbeCoordinator<B> {
    /// Create a stopped coordinator.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParameter` if the configuration is unusable.
    pub fn new(backend: Arc<B>, config: ProbeConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            config,
            broadcaster: Arc::new(UpdateBroadcaster::new()),
            supervisor: Mutex::new(None),
        })
    }

    /// Start supervising the relay.
    ///
    /// A running supervisor is stopped first, so calling this twice never
    /// leaves two connections or two advertisement subscriptions. With a
    /// discovery window configured, the relay must advertise within it
    /// before supervision begins; `stop()` waits for that lookup.
    ///
    /// # Errors
    ///
    /// Returns `Error::WatcherUnavailable` if advertisements cannot be
    /// watched or the relay is not found in the discovery window. The
    /// coordinator is stopped in that case.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.supervisor.lock().await;

        if let Some(previous) = slot.take() {
            debug!("Restarting coordinator for {}", self.address());
            previous.stop().await;
        }

        if let Some(window) = self.config.discovery_timeout {
            self.find_relay(window).await?;
        }

        let supervisor = ConnectionSupervisor::new(
            self.backend.clone(),
            self.config.clone(),
            self.broadcaster.clone(),
        );
        supervisor.start().await?;

        info!("Coordinator started for {}", self.address());
        *slot = Some(supervisor);

        Ok(())
    }

    async fn find_relay(&self, window: Duration) -> Result<()> {
        debug!("Looking for {} for up to {:?}", self.address(), window);

        match self.backend.find_device(self.address(), window).await? {
            Some(_) => {
                debug!("Found {}", self.address());
                Ok(())
            }
            None => {
                warn!("Device {} not found within {:?}", self.address(), window);
                Err(Error::WatcherUnavailable {
                    reason: format!("device {} not found", self.address()),
                })
            }
        }
    }

    /// Stop supervising and release every handle. No-op when stopped.
    pub async fn stop(&self) {
        let supervisor = self.supervisor.lock().await.take();

        if let Some(supervisor) = supervisor {
            supervisor.stop().await;
            info!("Coordinator stopped for {}", self.address());
        }
    }

    /// Register a listener for decoded records.
    ///
    /// Listeners stay registered across `stop()` and `start()`.
    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&MeasurementRecord) + Send + Sync + 'static,
    {
        self.broadcaster.add_listener(callback)
    }

    /// Unregister a listener.
    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.broadcaster.remove_listener(handle);
    }

    /// Get the current connection state. `Idle` when stopped.
    pub async fn connection_state(&self) -> ConnectionState {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .map(|s| s.state())
            .unwrap_or_default()
    }

    /// Subscribe to state changes of the running supervisor.
    ///
    /// Returns `None` when stopped. The receiver follows one supervisor;
    /// subscribe again after a restart.
    pub async fn subscribe_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .map(|s| s.subscribe_state())
    }

    /// Check if the coordinator is started and its supervisor still alive.
    ///
    /// Turns false if the supervisor went idle on its own, which happens
    /// when the advertisement source disappears for good.
    pub async fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .map(|s| s.state().is_active())
            .unwrap_or(false)
    }

    /// Get the relay address.
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Get the configuration.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Get the shared broadcaster.
    pub fn broadcaster(&self) -> &Arc<UpdateBroadcaster> {
        &self.broadcaster
    }
}

impl<B: BleBackend> Drop for ProbeCoordinator<B> {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.stop_detached();
        }
    }
}
