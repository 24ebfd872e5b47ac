//! Mock Bluetooth transport for exercising the supervised link.
//!
//! Advertisements are fed through the handle and delivered in order.
//! Connection attempts consume scripted outcomes (successful by default),
//! and every successful connection can be dropped from the handle to
//! simulate the peripheral walking out of range.

use crate::{
    Result, TransportError,
    traits::{BleTransport, DisconnectSignal},
    types::Advertisement,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};

/// A characteristic write recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub device_id: String,
    pub service: String,
    pub characteristic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct TransportState {
    connect_script: VecDeque<Result<()>>,
    write_script: VecDeque<Result<()>>,
    write_latency: Option<Duration>,
    disconnect_signals: HashMap<String, oneshot::Sender<()>>,
    connect_attempts: Vec<String>,
    writes: Vec<RecordedWrite>,
    scan_stops: usize,
}

/// Mock implementation of [`BleTransport`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
    advertisements: Arc<AsyncMutex<mpsc::UnboundedReceiver<Advertisement>>>,
}

impl MockTransport {
    /// Create a mock transport and its control handle.
    pub fn new() -> (Self, MockTransportHandle) {
        let (adv_tx, adv_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(TransportState::default()));

        let transport = Self {
            state: Arc::clone(&state),
            advertisements: Arc::new(AsyncMutex::new(adv_rx)),
        };
        let handle = MockTransportHandle { state, adv_tx };

        (transport, handle)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BleTransport for MockTransport {
    async fn next_advertisement(&self) -> Result<Advertisement> {
        let mut rx = self.advertisements.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| TransportError::scan_failed("advertisement source closed"))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.lock_state().scan_stops += 1;
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<DisconnectSignal> {
        let mut state = self.lock_state();
        state.connect_attempts.push(device_id.to_string());
        state.connect_script.pop_front().unwrap_or(Ok(()))?;

        let (tx, rx) = oneshot::channel();
        state.disconnect_signals.insert(device_id.to_string(), tx);
        Ok(rx)
    }

    async fn write(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        payload: &[u8],
    ) -> Result<()> {
        let latency = self.lock_state().write_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock_state();
        if !state.disconnect_signals.contains_key(device_id) {
            return Err(TransportError::disconnected(device_id));
        }
        state.write_script.pop_front().unwrap_or(Ok(()))?;
        state.writes.push(RecordedWrite {
            device_id: device_id.to_string(),
            service: service.to_string(),
            characteristic: characteristic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<()> {
        // Dropping the sender completes the disconnect signal.
        self.lock_state().disconnect_signals.remove(device_id);
        Ok(())
    }
}

/// Handle for controlling a mock transport.
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<TransportState>>,
    adv_tx: mpsc::UnboundedSender<Advertisement>,
}

impl MockTransportHandle {
    /// Deliver an advertisement to the scanner.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ChannelClosed` if the transport was dropped.
    pub fn advertise(&self, advertisement: Advertisement) -> Result<()> {
        self.adv_tx
            .send(advertisement)
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Script the outcome of the next connection attempt.
    pub fn queue_connect_result(&self, result: Result<()>) {
        self.lock_state().connect_script.push_back(result);
    }

    /// Script the outcome of the next characteristic write.
    pub fn queue_write_result(&self, result: Result<()>) {
        self.lock_state().write_script.push_back(result);
    }

    /// Delay every characteristic write by `latency` before it completes.
    pub fn set_write_latency(&self, latency: Duration) {
        self.lock_state().write_latency = Some(latency);
    }

    /// Drop the connection to `device_id` as if the peripheral went away.
    ///
    /// Returns `false` if the device was not connected.
    pub fn drop_connection(&self, device_id: &str) -> bool {
        match self.lock_state().disconnect_signals.remove(device_id) {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Device ids passed to `connect`, in order.
    pub fn connect_attempts(&self) -> Vec<String> {
        self.lock_state().connect_attempts.clone()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock_state().writes.clone()
    }

    pub fn scan_stops(&self) -> usize {
        self.lock_state().scan_stops
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.lock_state().disconnect_signals.contains_key(device_id)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advertisements_delivered_in_order() {
        let (transport, handle) = MockTransport::new();
        handle.advertise(Advertisement::new("A", Some(-40))).unwrap();
        handle.advertise(Advertisement::new("B", Some(-90))).unwrap();

        assert_eq!(transport.next_advertisement().await.unwrap().device_id, "A");
        assert_eq!(transport.next_advertisement().await.unwrap().device_id, "B");
    }

    #[tokio::test]
    async fn test_scripted_connect_failure() {
        let (transport, handle) = MockTransport::new();
        handle.queue_connect_result(Err(TransportError::connect_failed("A", "GATT 133")));

        assert!(transport.connect("A").await.is_err());
        assert!(transport.connect("A").await.is_ok());
        assert_eq!(handle.connect_attempts(), vec!["A", "A"]);
    }

    #[tokio::test]
    async fn test_drop_connection_fires_signal() {
        let (transport, handle) = MockTransport::new();
        let signal = transport.connect("A").await.unwrap();

        assert!(handle.drop_connection("A"));
        assert!(signal.await.is_ok());
        assert!(!handle.is_connected("A"));
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let (transport, handle) = MockTransport::new();
        let result = transport.write("A", "svc", "chr", b"UNLOCK").await;
        assert_eq!(result, Err(TransportError::disconnected("A")));

        let _signal = transport.connect("A").await.unwrap();
        transport.write("A", "svc", "chr", b"UNLOCK").await.unwrap();
        assert_eq!(handle.writes()[0].payload, b"UNLOCK".to_vec());
    }
}
