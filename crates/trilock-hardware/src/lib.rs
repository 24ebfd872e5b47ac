//! Wireless proximity link for the TriLock multi-factor lock.
//!
//! This crate defines the narrow contract the lock engine depends on for its
//! proximity factor and relay, together with a live implementation and test
//! doubles:
//!
//! - [`ProximityLink`]: send the unlock command, keep the authorization list
//!   current. Proximity edges are delivered as [`ProximityEvent`] messages on
//!   the channel each link hands out at construction.
//! - [`BleTransport`]: the platform Bluetooth surface (scan, connect, write,
//!   disconnect) underneath the live link.
//! - [`SupervisedLink`]: the live link. Owns its scan/connect/backoff loop so
//!   the engine never manages retries.
//! - [`mock`]: [`MockProximityLink`] for driving the engine in tests and
//!   [`MockTransport`] for exercising the supervisor.
//!
//! # Design Philosophy
//!
//! - **Async-first**: trait methods return `Send` futures so links can be
//!   shared with spawned Tokio tasks; implementors may write `async fn`.
//! - **Generic, not boxed**: consumers are generic over the link type.
//! - **Message-passing**: proximity transitions arrive on an `mpsc` channel,
//!   never through re-entrant callbacks.
//!
//! ```no_run
//! use trilock_hardware::{ProximityEvent, ProximityLink};
//! use tokio::sync::mpsc;
//!
//! async fn watch<L: ProximityLink>(link: &L, mut events: mpsc::Receiver<ProximityEvent>) {
//!     while let Some(event) = events.recv().await {
//!         if let ProximityEvent::Entered { .. } = event {
//!             let confirmed = link.send_unlock_signal().await.unwrap_or(false);
//!             println!("relay confirmed: {confirmed}");
//!         }
//!     }
//! }
//! ```
//!
//! [`MockProximityLink`]: mock::MockProximityLink
//! [`MockTransport`]: mock::MockTransport

pub mod error;
pub mod mock;
pub mod supervisor;
pub mod traits;
pub mod types;

pub use error::{Result, TransportError};
pub use supervisor::{Backoff, SupervisedLink, SupervisorConfig};
pub use traits::{BleTransport, DisconnectSignal, ProximityLink};
pub use types::{
    Advertisement, AuthorizedIds, ProximityEvent, UNLOCK_CHARACTERISTIC_UUID, UNLOCK_PAYLOAD,
    UNLOCK_SERVICE_UUID,
};
