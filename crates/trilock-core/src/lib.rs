//! Core domain model for the TriLock multi-factor enclosure lock.
//!
//! This crate holds everything that is pure data: phases and lock state,
//! the device registry, the bounded security journal, configuration and
//! the shared error type. It has no async runtime dependency; the engine
//! crate drives these types from its single consumer loop.

pub mod config;
pub mod constants;
pub mod error;
pub mod journal;
pub mod registry;
pub mod types;

pub use config::TriLockConfig;
pub use error::{Error, Result};
pub use journal::{EventJournal, JournalCounts};
pub use registry::DeviceRegistry;
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
