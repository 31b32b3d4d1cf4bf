//! In-memory BLE backend for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ble::transport::{
    Advertisement, AdvertisementSource, AdvertisementStream, NotificationLink, Transport,
};
use crate::error::{ConnectionError, Error, Result};

/// Address the tests treat as the probe relay.
pub const TARGET: &str = "AA:BB:CC:DD:EE:FF";

/// Build an advertisement whose device handle is the address itself.
pub fn advertisement(address: &str) -> Advertisement<String> {
    Advertisement {
        address: address.to_string(),
        device: address.to_string(),
        payload: vec![],
        rssi: Some(-60),
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
struct FakeState {
    subscribers: Vec<mpsc::UnboundedSender<Advertisement<String>>>,
    frame_tx: Option<mpsc::Sender<Bytes>>,
    connect_failures: usize,
    subscribe_failures: usize,
    connect_delay: Duration,
    disconnect_delay: Duration,
    unavailable: bool,
}

/// Scriptable stand-in for the host Bluetooth stack.
#[derive(Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    connect_attempts: AtomicUsize,
    open_links: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an advertisement to every open subscription.
    pub fn advertise(&self, advertisement: Advertisement<String>) {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        for tx in &state.subscribers {
            let _ = tx.send(advertisement.clone());
        }
    }

    /// Number of advertisement subscriptions still being listened to.
    pub fn live_subscriptions(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// Push a notification frame on the open link.
    pub async fn send_frame(&self, frame: &[u8]) {
        let tx = self.state.lock().frame_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(Bytes::copy_from_slice(frame)).await;
        }
    }

    /// End every open advertisement stream, as if the adapter went away.
    pub fn close_advertisements(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Simulate the device going out of range.
    pub fn drop_connection(&self) {
        self.state.lock().frame_tx = None;
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().connect_failures = count;
    }

    pub fn fail_next_subscribes(&self, count: usize) {
        self.state.lock().subscribe_failures = count;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    /// Make closing a link take `delay`.
    pub fn set_disconnect_delay(&self, delay: Duration) {
        self.state.lock().disconnect_delay = delay;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn open_links(&self) -> usize {
        self.open_links.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdvertisementSource for FakeBackend {
    type Device = String;

    async fn advertisements(&self) -> Result<AdvertisementStream<String>> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(Error::WatcherUnavailable {
                reason: "no adapter".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|advertisement| (advertisement, rx))
        })
        .boxed())
    }
}

#[async_trait]
impl Transport<String> for FakeBackend {
    async fn connect(
        &self,
        _device: String,
        address: &str,
    ) -> std::result::Result<Box<dyn NotificationLink>, ConnectionError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.state.lock();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(ConnectionError::EstablishmentFailed {
                    reason: format!("{} refused", address),
                });
            }
        }

        self.open_links.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeLink {
            state: self.state.clone(),
            open_links: self.open_links.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeLink {
    state: Arc<Mutex<FakeState>>,
    open_links: Arc<AtomicUsize>,
    closed: AtomicBool,
}

#[async_trait]
impl NotificationLink for FakeLink {
    async fn subscribe(
        &self,
        _characteristic: Uuid,
    ) -> std::result::Result<mpsc::Receiver<Bytes>, ConnectionError> {
        let mut state = self.state.lock();
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(ConnectionError::SubscriptionFailed {
                reason: "characteristic missing".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(16);
        state.frame_tx = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<()> {
        let delay = self.state.lock().disconnect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.closed.swap(true, Ordering::SeqCst) {
            self.open_links.fetch_sub(1, Ordering::SeqCst);
        }
        self.state.lock().frame_tx = None;
        Ok(())
    }
}
