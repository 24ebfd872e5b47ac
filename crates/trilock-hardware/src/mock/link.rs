//! Mock proximity link for testing and development.
//!
//! The mock lets tests drive proximity edges directly and script how the
//! relay answers unlock commands, without any Bluetooth stack.

use crate::{
    Result, TransportError,
    traits::ProximityLink,
    types::{AuthorizedIds, ProximityEvent},
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Capacity of the proximity event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// How the mock relay answers the next unlock command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockResponse {
    /// Transport acknowledged the write.
    Acknowledged,

    /// Write completed but was not acknowledged.
    Unacknowledged,

    /// Transport failed with the given error.
    Fail(TransportError),
}

#[derive(Debug)]
struct MockLinkState {
    connected: Option<String>,
    script: VecDeque<UnlockResponse>,
    default_response: UnlockResponse,
    unlock_calls: usize,
}

/// Mock proximity link.
///
/// # Examples
///
/// ```
/// use trilock_hardware::mock::{MockProximityLink, UnlockResponse};
/// use trilock_hardware::traits::ProximityLink;
/// use trilock_hardware::types::ProximityEvent;
///
/// #[tokio::main]
/// async fn main() -> trilock_hardware::Result<()> {
///     let (link, handle, mut events) = MockProximityLink::new();
///     link.set_authorized_ids(vec!["AA:BB".to_string()]);
///
///     handle.enter("AA:BB").await?;
///     assert_eq!(
///         events.recv().await,
///         Some(ProximityEvent::Entered { device_id: "AA:BB".to_string() })
///     );
///
///     handle.queue_unlock_response(UnlockResponse::Unacknowledged);
///     assert!(!link.send_unlock_signal().await?);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockProximityLink {
    state: Arc<Mutex<MockLinkState>>,
    authorized: AuthorizedIds,
}

impl MockProximityLink {
    /// Create a mock link, its control handle, and the proximity event stream.
    pub fn new() -> (Self, MockLinkHandle, mpsc::Receiver<ProximityEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(MockLinkState {
            connected: None,
            script: VecDeque::new(),
            default_response: UnlockResponse::Acknowledged,
            unlock_calls: 0,
        }));
        let authorized = AuthorizedIds::default();

        let link = Self {
            state: Arc::clone(&state),
            authorized: authorized.clone(),
        };
        let handle = MockLinkHandle {
            state,
            authorized,
            event_tx,
        };

        (link, handle, event_rx)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockLinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProximityLink for MockProximityLink {
    async fn send_unlock_signal(&self) -> Result<bool> {
        let response = {
            let mut state = self.lock_state();
            state.unlock_calls += 1;
            if state.connected.is_none() {
                return Ok(false);
            }
            state
                .script
                .pop_front()
                .unwrap_or_else(|| state.default_response.clone())
        };

        match response {
            UnlockResponse::Acknowledged => Ok(true),
            UnlockResponse::Unacknowledged => Ok(false),
            UnlockResponse::Fail(error) => Err(error),
        }
    }

    fn set_authorized_ids(&self, ids: Vec<String>) {
        self.authorized.replace(ids);
    }

    fn connected_device(&self) -> Option<String> {
        self.lock_state().connected.clone()
    }
}

/// Handle for controlling a mock proximity link.
#[derive(Debug, Clone)]
pub struct MockLinkHandle {
    state: Arc<Mutex<MockLinkState>>,
    authorized: AuthorizedIds,
    event_tx: mpsc::Sender<ProximityEvent>,
}

impl MockLinkHandle {
    /// Simulate an authorized device coming into range.
    ///
    /// Returns `Ok(false)` without emitting anything if the device is not in
    /// the authorized list or a device is already connected.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ChannelClosed` if the event receiver was dropped.
    pub async fn enter(&self, device_id: &str) -> Result<bool> {
        if !self.authorized.contains(device_id) {
            return Ok(false);
        }
        {
            let mut state = self.lock_state();
            if state.connected.is_some() {
                return Ok(false);
            }
            state.connected = Some(device_id.to_string());
        }

        self.emit(ProximityEvent::Entered {
            device_id: device_id.to_string(),
        })
        .await?;
        Ok(true)
    }

    /// Simulate the connected device going out of range.
    ///
    /// Returns `Ok(false)` if nothing was connected.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ChannelClosed` if the event receiver was dropped.
    pub async fn leave(&self) -> Result<bool> {
        let Some(device_id) = self.lock_state().connected.take() else {
            return Ok(false);
        };

        self.emit(ProximityEvent::Left { device_id }).await?;
        Ok(true)
    }

    /// Queue a response for the next unlock command.
    pub fn queue_unlock_response(&self, response: UnlockResponse) {
        self.lock_state().script.push_back(response);
    }

    /// Set the response used once the queue is empty.
    pub fn set_default_response(&self, response: UnlockResponse) {
        self.lock_state().default_response = response;
    }

    /// Number of unlock commands received so far.
    pub fn unlock_calls(&self) -> usize {
        self.lock_state().unlock_calls
    }

    /// Current authorization list as seen by the link.
    pub fn authorized_ids(&self) -> Vec<String> {
        self.authorized.snapshot()
    }

    async fn emit(&self, event: ProximityEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockLinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
