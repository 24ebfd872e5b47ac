//! Proximity link trait definitions.
//!
//! Two seams live here:
//!
//! - [`ProximityLink`] is the narrow contract the lock engine depends on:
//!   send the unlock command and keep the authorization list current.
//!   Proximity transitions arrive separately as [`ProximityEvent`] messages
//!   on the channel returned by each link's constructor.
//! - [`BleTransport`] is the platform Bluetooth surface underneath the
//!   supervised link (scan, connect, write, disconnect).
//!
//! Both are used from spawned Tokio tasks, so their futures are declared
//! `Send` explicitly. Implementations may still be written with `async fn`.
//!
//! [`ProximityEvent`]: crate::types::ProximityEvent

use std::future::Future;

use tokio::sync::oneshot;

use crate::error::Result;
use crate::types::Advertisement;

/// Resolves once the connected peripheral drops the connection.
///
/// A dropped sender is treated the same as a completed signal.
pub type DisconnectSignal = oneshot::Receiver<()>;

/// Contract between the lock engine and the wireless proximity peripheral.
///
/// # Contract
///
/// - Proximity transitions are edge-triggered and delivered as messages,
///   at most once per transition.
/// - [`send_unlock_signal`](ProximityLink::send_unlock_signal) returns
///   `Ok(true)` when the transport acknowledged the command, `Ok(false)` when
///   no device is connected or the write went unacknowledged, and `Err` for
///   transport failures. Callers treat anything but `Ok(true)` as "verified
///   but physically unconfirmed".
/// - The link owns its reconnection loop; callers never retry connections.
/// - Candidate devices are filtered by the list passed to
///   [`set_authorized_ids`](ProximityLink::set_authorized_ids). The list is
///   shared, so updates take effect on the next advertisement.
///
/// # Examples
///
/// ```
/// use trilock_hardware::mock::MockProximityLink;
/// use trilock_hardware::traits::ProximityLink;
///
/// #[tokio::main]
/// async fn main() -> trilock_hardware::Result<()> {
///     let (link, handle, _events) = MockProximityLink::new();
///     link.set_authorized_ids(vec!["AA:BB:CC:DD:EE:FF".to_string()]);
///
///     // Nothing connected yet: the command cannot be confirmed.
///     assert!(!link.send_unlock_signal().await?);
///
///     handle.enter("AA:BB:CC:DD:EE:FF").await?;
///     assert!(link.send_unlock_signal().await?);
///     Ok(())
/// }
/// ```
pub trait ProximityLink: Send + Sync + 'static {
    /// Write the unlock command to the connected relay peripheral.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails in a way the link could not
    /// classify as a plain unacknowledged write.
    fn send_unlock_signal(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Replace the list of hardware identifiers allowed to connect.
    fn set_authorized_ids(&self, ids: Vec<String>);

    /// Identifier of the currently connected device, if any.
    fn connected_device(&self) -> Option<String>;

    /// Returns `true` while a device is connected.
    fn is_connected(&self) -> bool {
        self.connected_device().is_some()
    }
}

/// Platform Bluetooth Low Energy surface used by the supervised link.
///
/// All methods take `&self`; implementations synchronize internally so the
/// supervisor task and unlock writers can share one transport.
pub trait BleTransport: Send + Sync + 'static {
    /// Wait for the next advertisement, starting a scan if none is running.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ScanFailed` if scanning cannot start or
    /// aborts.
    fn next_advertisement(&self) -> impl Future<Output = Result<Advertisement>> + Send;

    /// Stop an active scan. Stopping an idle scanner is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the request.
    fn stop_scan(&self) -> impl Future<Output = Result<()>> + Send;

    /// Connect to a peripheral.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectFailed` if the peripheral cannot be
    /// reached.
    fn connect(&self, device_id: &str) -> impl Future<Output = Result<DisconnectSignal>> + Send;

    /// Write a characteristic value on a connected peripheral.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::WriteFailed` or
    /// `TransportError::Disconnected`.
    fn write(
        &self,
        device_id: &str,
        service: &str,
        characteristic: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Tear down a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the request.
    fn disconnect(&self, device_id: &str) -> impl Future<Output = Result<()>> + Send;
}
