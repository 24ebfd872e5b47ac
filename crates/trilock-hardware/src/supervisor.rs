//! Supervised proximity link.
//!
//! [`SupervisedLink`] is the live [`ProximityLink`]: it owns a background task
//! that scans advertisements through a [`BleTransport`], connects to the first
//! authorized device that is close enough, reports the connection edges on an
//! event channel and reconnects with exponential backoff.
//!
//! ```text
//!            ┌──────── backoff ◄──── connect failed
//!            ▼                              ▲
//!   scan ──► authorized & near? ──► stop_scan ──► connect
//!            ▲                                     │ ok
//!            │                                     ▼
//!            └─── Left ◄── disconnect signal ◄── Entered
//! ```
//!
//! The task stops when the event receiver is dropped or
//! [`SupervisedLink::shutdown`] is called.
//!
//! # Examples
//!
//! ```
//! use trilock_hardware::mock::MockTransport;
//! use trilock_hardware::supervisor::{SupervisedLink, SupervisorConfig};
//! use trilock_core::config::LinkConfig;
//! use trilock_hardware::traits::ProximityLink;
//! use trilock_hardware::types::{Advertisement, ProximityEvent};
//!
//! #[tokio::main]
//! async fn main() -> trilock_hardware::Result<()> {
//!     let (transport, radio) = MockTransport::new();
//!     let config = SupervisorConfig::from(&LinkConfig::default());
//!     let (link, mut events) = SupervisedLink::start(transport, config);
//!     link.set_authorized_ids(vec!["AA:BB".to_string()]);
//!
//!     radio.advertise(Advertisement::new("AA:BB", Some(-60)))?;
//!     assert!(matches!(events.recv().await, Some(ProximityEvent::Entered { .. })));
//!     assert!(link.send_unlock_signal().await?);
//!
//!     link.shutdown();
//!     Ok(())
//! }
//! ```

use crate::{
    Result,
    traits::{BleTransport, ProximityLink},
    types::{
        AuthorizedIds, ProximityEvent, UNLOCK_CHARACTERISTIC_UUID, UNLOCK_PAYLOAD,
        UNLOCK_SERVICE_UUID,
    },
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use trilock_core::config::LinkConfig;
use trilock_core::constants::{
    DEFAULT_RECONNECT_INITIAL_MS, DEFAULT_RECONNECT_MAX_MS, DEFAULT_RSSI_THRESHOLD_DBM,
    DEFAULT_WRITE_TIMEOUT_MS,
};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Tuning for the supervised link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Minimum advertisement RSSI (dBm) that counts as near.
    pub rssi_threshold_dbm: i16,

    /// First retry delay after a failed attempt.
    pub reconnect_initial: Duration,

    /// Upper bound for the retry delay.
    pub reconnect_max: Duration,

    /// Bound on a single unlock write.
    pub write_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            rssi_threshold_dbm: DEFAULT_RSSI_THRESHOLD_DBM,
            reconnect_initial: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

impl From<&LinkConfig> for SupervisorConfig {
    fn from(link: &LinkConfig) -> Self {
        Self {
            rssi_threshold_dbm: link.rssi_threshold_dbm,
            reconnect_initial: Duration::from_millis(link.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(link.reconnect_max_ms),
            write_timeout: Duration::from_millis(link.write_timeout_ms),
        }
    }
}

/// Exponential backoff, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns double, capped.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Connection state shared between the supervisor task and unlock writers.
#[derive(Debug, Default)]
struct LinkShared {
    authorized: AuthorizedIds,
    connected: Mutex<Option<String>>,
}

impl LinkShared {
    fn connected(&self) -> Option<String> {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_connected(&self, device_id: Option<String>) {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner) = device_id;
    }
}

/// Live proximity link driving a [`BleTransport`].
pub struct SupervisedLink<T: BleTransport> {
    transport: Arc<T>,
    shared: Arc<LinkShared>,
    write_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: BleTransport> SupervisedLink<T> {
    /// Spawn the supervisor task and return the link plus its event stream.
    ///
    /// The authorization list starts empty; nothing connects until
    /// [`ProximityLink::set_authorized_ids`] is called.
    pub fn start(transport: T, config: SupervisorConfig) -> (Self, mpsc::Receiver<ProximityEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(transport);
        let shared = Arc::new(LinkShared::default());

        let task = tokio::spawn(supervise(
            Arc::clone(&transport),
            Arc::clone(&shared),
            config,
            event_tx,
        ));

        let link = Self {
            transport,
            shared,
            write_timeout: config.write_timeout,
            task: Mutex::new(Some(task)),
        };
        (link, event_rx)
    }

    /// Abort the supervisor task. Idempotent.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            self.shared.set_connected(None);
            debug!("Proximity supervisor stopped");
        }
    }
}

impl<T: BleTransport> Drop for SupervisedLink<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: BleTransport> ProximityLink for SupervisedLink<T> {
    async fn send_unlock_signal(&self) -> Result<bool> {
        let Some(device_id) = self.shared.connected() else {
            debug!("Unlock requested with no device connected");
            return Ok(false);
        };

        let write = self.transport.write(
            &device_id,
            UNLOCK_SERVICE_UUID,
            UNLOCK_CHARACTERISTIC_UUID,
            UNLOCK_PAYLOAD,
        );

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => {
                info!(device = %device_id, "Unlock command acknowledged");
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!(device = %device_id, error = %e, "Unlock write failed");
                Ok(false)
            }
            Err(_) => {
                warn!(
                    device = %device_id,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Unlock write timed out"
                );
                Ok(false)
            }
        }
    }

    fn set_authorized_ids(&self, ids: Vec<String>) {
        debug!(count = ids.len(), "Authorization list updated");
        self.shared.authorized.replace(ids);
    }

    fn connected_device(&self) -> Option<String> {
        self.shared.connected()
    }
}

/// Scan, connect and report until the event receiver goes away.
async fn supervise<T: BleTransport>(
    transport: Arc<T>,
    shared: Arc<LinkShared>,
    config: SupervisorConfig,
    events: mpsc::Sender<ProximityEvent>,
) {
    let mut backoff = Backoff::new(config.reconnect_initial, config.reconnect_max);

    while !events.is_closed() {
        let advertisement = match transport.next_advertisement().await {
            Ok(advertisement) => advertisement,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Scan failed, backing off");
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        let device_id = advertisement.device_id.clone();
        if !shared.authorized.contains(&device_id) {
            trace!(device = %device_id, "Ignoring unauthorized advertiser");
            continue;
        }
        if !advertisement.is_near(config.rssi_threshold_dbm) {
            trace!(
                device = %device_id,
                rssi = ?advertisement.rssi,
                threshold = config.rssi_threshold_dbm,
                "Authorized advertiser out of range"
            );
            continue;
        }

        if let Err(e) = transport.stop_scan().await {
            warn!(error = %e, "Failed to stop scan before connecting");
        }

        debug!(device = %device_id, "Connecting");
        let disconnected = match transport.connect(&device_id).await {
            Ok(signal) => signal,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    device = %device_id,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Connection failed, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        backoff.reset();
        shared.set_connected(Some(device_id.clone()));
        info!(device = %device_id, "Proximity device connected");

        if events
            .send(ProximityEvent::Entered {
                device_id: device_id.clone(),
            })
            .await
            .is_err()
        {
            let _ = transport.disconnect(&device_id).await;
            shared.set_connected(None);
            break;
        }

        // A dropped sender counts as a disconnect.
        let _ = disconnected.await;

        shared.set_connected(None);
        info!(device = %device_id, "Proximity device disconnected");

        if events
            .send(ProximityEvent::Left { device_id })
            .await
            .is_err()
        {
            break;
        }
    }

    debug!("Proximity event receiver closed, supervisor exiting");
}
