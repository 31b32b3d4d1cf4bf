//! Connection supervisor.
//!
//! Owns the single connection to the probe relay. The supervisor waits for
//! the relay to advertise, connects, subscribes to measurement frames and
//! publishes decoded records. When the connection fails or drops it goes
//! back to waiting for the next advertisement instead of retrying blindly.
//!
//! All changes to the state, the link and the watcher happen while holding
//! the connect lock. Awaiting the transport itself happens outside of it so
//! that `stop()` can cancel a pending attempt.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::connection::ConnectionState;
use crate::ble::transport::{BleBackend, NotificationLink};
use crate::ble::watcher::{AdvertisementCallback, AdvertisementWatcher, WatchEvent};
use crate::broadcaster::UpdateBroadcaster;
use crate::config::ProbeConfig;
use crate::error::{ConnectionError, Result};
use crate::protocol::decode;

/// Pause before re-arming after the advertisement stream ends by itself.
const STREAM_RESTART_DELAY: Duration = Duration::from_millis(500);

/// State guarded by the connect lock.
struct Core<B: BleBackend> {
    /// Current state.
    state: ConnectionState,
    /// Advertisement watcher for the target.
    watcher: AdvertisementWatcher<B>,
    /// The open link, present only while connected.
    link: Option<Box<dyn NotificationLink>>,
    /// Generation of the current connection attempt.
    attempt: u64,
    /// Dropping this cancels the pending attempt.
    cancel: Option<oneshot::Sender<()>>,
    /// Task decoding frames of the open link.
    pump: Option<JoinHandle<()>>,
}

struct Inner<B: BleBackend> {
    backend: Arc<B>,
    config: ProbeConfig,
    broadcaster: Arc<UpdateBroadcaster>,
    /// The connect lock.
    core: Mutex<Core<B>>,
    state_tx: watch::Sender<ConnectionState>,
    last_frame_at: RwLock<Option<DateTime<Utc>>>,
}

/// Supervises the connection to one probe relay.
pub struct ConnectionSupervisor<B: BleBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: BleBackend> Clone for ConnectionSupervisor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: BleBackend> ConnectionSupervisor<B> {
    /// Create an idle supervisor publishing to `broadcaster`.
    pub fn new(backend: Arc<B>, config: ProbeConfig, broadcaster: Arc<UpdateBroadcaster>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let watcher = AdvertisementWatcher::new(backend.clone(), config.address.clone());

        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                broadcaster,
                core: Mutex::new(Core {
                    state: ConnectionState::Idle,
                    watcher,
                    link: None,
                    attempt: 0,
                    cancel: None,
                    pump: None,
                }),
                state_tx,
                last_frame_at: RwLock::new(None),
            }),
        }
    }

    /// Start waiting for the relay to advertise.
    ///
    /// Does nothing if already started.
    ///
    /// # Errors
    ///
    /// Returns `Error::WatcherUnavailable` if advertisements cannot be
    /// watched. The supervisor stays idle in that case.
    pub async fn start(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;

        if core.state != ConnectionState::Idle {
            debug!("Supervisor for {} already started", self.address());
            return Ok(());
        }

        info!("Starting supervisor for {}", self.address());

        self.inner
            .set_state(&mut core, ConnectionState::AwaitingAdvertisement);

        if let Err(e) = self.inner.arm_watcher(&mut core).await {
            self.inner.set_state(&mut core, ConnectionState::Idle);
            return Err(e);
        }

        Ok(())
    }

    /// Stop supervising and release every handle.
    ///
    /// A pending connection attempt is abandoned, not awaited. Calling this
    /// when already idle, or while another stop is in progress, is a no-op.
    pub async fn stop(&self) {
        let mut core = self.inner.core.lock().await;

        if matches!(
            core.state,
            ConnectionState::Idle | ConnectionState::ShuttingDown
        ) {
            debug!("Supervisor for {} already stopped", self.address());
            return;
        }

        info!("Stopping supervisor for {}", self.address());

        self.inner.set_state(&mut core, ConnectionState::ShuttingDown);

        if core.cancel.take().is_some() {
            debug!("Cancelled pending connection attempt {}", core.attempt);
        }

        core.watcher.stop();

        if let Some(pump) = core.pump.take() {
            pump.abort();
        }

        let link = core.link.take();
        drop(core);

        // Closing can hang on the host stack; the lock stays free meanwhile.
        if let Some(link) = link {
            close_link(link.as_ref(), self.address()).await;
        }

        let mut core = self.inner.core.lock().await;
        if core.state == ConnectionState::ShuttingDown {
            self.inner.set_state(&mut core, ConnectionState::Idle);
        }
    }

    /// Stop from a synchronous context such as `Drop`.
    ///
    /// Runs `stop()` on the current runtime. Outside a runtime the tasks are
    /// aborted if the connect lock is free, and the link closes when dropped.
    pub fn stop_detached(self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { self.stop().await });
            }
            Err(_) => {
                if let Ok(mut core) = self.inner.core.try_lock() {
                    core.cancel = None;
                    core.watcher.stop();
                    if let Some(pump) = core.pump.take() {
                        pump.abort();
                    }
                    core.link = None;
                }
            }
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Get the address being supervised.
    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    /// Time the last notification frame arrived, decodable or not.
    pub fn last_frame_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_frame_at.read()
    }

    /// Check if the advertisement watcher is armed.
    pub async fn is_watching(&self) -> bool {
        self.inner.core.lock().await.watcher.is_armed()
    }

    /// Feed an advertisement sighting as if the watcher had reported it.
    #[cfg(test)]
    pub(crate) async fn handle_advertisement(&self, device: B::Device) {
        self.inner.clone().on_advertisement(device).await;
    }
}

impl<B: BleBackend> Inner<B> {
    fn address(&self) -> &str {
        &self.config.address
    }

    /// Update the state and notify observers.
    fn set_state(&self, core: &mut Core<B>, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut core.state, new_state);

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
            self.state_tx.send_replace(new_state);
        }
    }

    /// Arm the watcher so sightings of the target call `on_advertisement`.
    async fn arm_watcher(self: &Arc<Self>, core: &mut Core<B>) -> Result<()> {
        let weak = Arc::downgrade(self);
        let callback: AdvertisementCallback<B::Device> =
            Arc::new(move |event: WatchEvent<B::Device>| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };

                match event {
                    WatchEvent::Advertised(device) => {
                        tokio::spawn(inner.on_advertisement(device));
                    }
                    WatchEvent::StreamEnded => {
                        tokio::spawn(inner.on_stream_ended());
                    }
                }
            });

        core.watcher.start(callback).await
    }

    /// Go back to waiting for an advertisement.
    async fn rearm(self: &Arc<Self>, core: &mut Core<B>) {
        self.set_state(core, ConnectionState::AwaitingAdvertisement);

        if let Err(e) = self.arm_watcher(core).await {
            error!("Failed to re-arm watcher for {}: {}", self.address(), e);
            self.set_state(core, ConnectionState::Idle);
        }
    }

    /// Handle a sighting of the target.
    ///
    /// Boxed because the attempt it spawns can end up re-arming the watcher,
    /// which spawns this again.
    fn on_advertisement(self: Arc<Self>, device: B::Device) -> BoxFuture<'static, ()> {
        async move {
            let mut core = self.core.lock().await;

            if core.state != ConnectionState::AwaitingAdvertisement || core.link.is_some() {
                trace!(
                    "Ignoring advertisement from {} while {}",
                    self.address(),
                    core.state
                );
                return;
            }

            self.set_state(&mut core, ConnectionState::Connecting);
            core.watcher.stop();

            core.attempt += 1;
            let attempt = core.attempt;
            let (cancel_tx, cancel_rx) = oneshot::channel();
            core.cancel = Some(cancel_tx);
            drop(core);

            tokio::spawn(self.run_attempt(attempt, device, cancel_rx));
        }
        .boxed()
    }

    /// Connect and subscribe, unless cancelled first.
    async fn run_attempt(
        self: Arc<Self>,
        attempt: u64,
        device: B::Device,
        mut cancel: oneshot::Receiver<()>,
    ) {
        let timeout = self.config.connect_timeout;
        info!("Connecting to probe {} (attempt {})", self.address(), attempt);

        let connected = tokio::select! {
            result = tokio::time::timeout(timeout, self.backend.connect(device, self.address())) => Some(result),
            _ = &mut cancel => None,
        };

        let link = match connected {
            None => {
                debug!("Connection attempt {} abandoned", attempt);
                return;
            }
            Some(Ok(Ok(link))) => link,
            Some(Ok(Err(e))) => {
                self.fail_attempt(attempt, e, None).await;
                return;
            }
            Some(Err(_)) => {
                let e = ConnectionError::EstablishmentFailed {
                    reason: format!("timed out after {:?}", timeout),
                };
                self.fail_attempt(attempt, e, None).await;
                return;
            }
        };

        let characteristic = self.config.notify_characteristic;
        let subscribed = tokio::select! {
            result = tokio::time::timeout(timeout, link.subscribe(characteristic)) => Some(result),
            _ = &mut cancel => None,
        };

        let frames = match subscribed {
            None => {
                debug!("Connection attempt {} abandoned after connecting", attempt);
                close_link(link.as_ref(), self.address()).await;
                return;
            }
            Some(Ok(Ok(frames))) => frames,
            Some(Ok(Err(e))) => {
                self.fail_attempt(attempt, e, Some(link)).await;
                return;
            }
            Some(Err(_)) => {
                let e = ConnectionError::SubscriptionFailed {
                    reason: format!("timed out after {:?}", timeout),
                };
                self.fail_attempt(attempt, e, Some(link)).await;
                return;
            }
        };

        self.complete_attempt(attempt, link, frames).await;
    }

    /// Record a successful attempt, unless it was superseded meanwhile.
    async fn complete_attempt(
        self: &Arc<Self>,
        attempt: u64,
        link: Box<dyn NotificationLink>,
        frames: mpsc::Receiver<Bytes>,
    ) {
        let mut core = self.core.lock().await;

        if core.attempt != attempt || core.state != ConnectionState::Connecting {
            debug!("Discarding stale connection from attempt {}", attempt);
            drop(core);
            close_link(link.as_ref(), self.address()).await;
            return;
        }

        core.cancel = None;
        core.link = Some(link);
        core.pump = Some(tokio::spawn(self.clone().pump(attempt, frames)));
        self.set_state(&mut core, ConnectionState::Connected);

        info!("Connected to probe {}", self.address());
    }

    /// Clean up after a failed attempt and wait for the next advertisement.
    async fn fail_attempt(
        self: &Arc<Self>,
        attempt: u64,
        error: ConnectionError,
        link: Option<Box<dyn NotificationLink>>,
    ) {
        warn!("Connection to {} failed: {}", self.address(), error);

        if let Some(link) = link {
            close_link(link.as_ref(), self.address()).await;
        }

        let mut core = self.core.lock().await;
        if core.attempt != attempt || core.state != ConnectionState::Connecting {
            return;
        }

        core.cancel = None;
        self.rearm(&mut core).await;
    }

    /// Decode and publish frames until the link closes.
    async fn pump(self: Arc<Self>, attempt: u64, mut frames: mpsc::Receiver<Bytes>) {
        while let Some(frame) = frames.recv().await {
            *self.last_frame_at.write() = Some(Utc::now());

            match decode(&frame) {
                Ok(record) => self.broadcaster.publish(&record),
                Err(e) => debug!("Dropping frame {:02X?}: {}", &frame[..], e),
            }
        }

        self.on_disconnect(attempt).await;
    }

    /// Handle the frame channel closing while connected.
    async fn on_disconnect(self: &Arc<Self>, attempt: u64) {
        let mut core = self.core.lock().await;

        if core.attempt != attempt || core.state != ConnectionState::Connected {
            return;
        }

        warn!(
            "Probe {}: {}",
            self.address(),
            ConnectionError::UnsolicitedDisconnect
        );

        core.pump = None;
        let link = core.link.take();
        self.rearm(&mut core).await;
        drop(core);

        if let Some(link) = link {
            close_link(link.as_ref(), self.address()).await;
        }
    }

    /// Handle the advertisement stream ending on its own.
    ///
    /// Waits briefly, then re-arms if nothing else has changed meanwhile.
    /// A failed re-arm leaves the supervisor idle. Boxed for the same reason
    /// as `on_advertisement`.
    fn on_stream_ended(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            warn!(
                "Advertisement stream for {} ended, re-arming in {:?}",
                self.address(),
                STREAM_RESTART_DELAY
            );
            tokio::time::sleep(STREAM_RESTART_DELAY).await;

            let mut core = self.core.lock().await;
            if core.state != ConnectionState::AwaitingAdvertisement || core.watcher.is_armed() {
                return;
            }

            self.rearm(&mut core).await;
        }
        .boxed()
    }
}

/// Close a link, logging instead of failing.
async fn close_link(link: &dyn NotificationLink, address: &str) {
    if let Err(e) = link.disconnect().await {
        debug!("Error closing link to {}: {}", address, e);
    }
}
