//! Mock link and transport implementations for testing and development.
//!
//! These can be driven programmatically without a Bluetooth radio.

pub mod link;
pub mod transport;

pub use link::{MockLinkHandle, MockProximityLink, UnlockResponse};
pub use transport::{MockTransport, MockTransportHandle, RecordedWrite};
