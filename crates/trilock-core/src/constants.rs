//! Core constants for the TriLock verification protocol.
//!
//! These values define the reference timing and sizing behavior of the
//! lock. Most of them are defaults for [`TriLockConfig`](crate::TriLockConfig)
//! fields and can be overridden per deployment.
//!
//! # Usage
//!
//! ```
//! use trilock_core::constants::*;
//! use std::time::Duration;
//!
//! let settle = Duration::from_millis(DEFAULT_SETTLE_DELAY_MS);
//! assert_eq!(settle.as_millis(), 800);
//! assert_eq!(REQUIRED_PHASE_COUNT, 3);
//! ```

// ============================================================================
// Verification
// ============================================================================

/// Number of factors that must be verified before the relay may fire.
pub const REQUIRED_PHASE_COUNT: usize = 3;

/// Reason recorded when a reset is requested without one.
pub const DEFAULT_RESET_REASON: &str = "manual reset";

/// Reason recorded when the auto-lock countdown expires.
pub const AUTO_LOCK_REASON: &str = "auto-lock protocol initiated";

/// Reason recorded when the linked proximity device leaves range.
pub const PROXIMITY_LOST_REASON: &str = "linked device out of range";

// ============================================================================
// Timing
// ============================================================================

/// Pause between "all phases verified" and the physical unlock command.
///
/// Lets UI feedback finish before the relay fires. This is not a real-time
/// deadline.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 800;

/// Grace period the enclosure stays unlocked before re-locking itself.
pub const DEFAULT_AUTO_LOCK_SECS: u32 = 10;

/// Interval between auto-lock countdown ticks.
pub const AUTO_LOCK_TICK_MS: u64 = 1000;

// ============================================================================
// Journal
// ============================================================================

/// Maximum number of security events retained by the journal.
///
/// Older entries are silently discarded once this bound is reached.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 50;

// ============================================================================
// Registry
// ============================================================================

/// Prefix for minted hardware key identifiers (`KEY-001`, `KEY-002`, ...).
pub const KEY_ID_PREFIX: &str = "KEY-";

/// Battery percentage at or below which a hardware key reports low battery.
pub const LOW_BATTERY_THRESHOLD: u8 = 20;

/// Battery percentage assigned to freshly registered keys.
pub const NEW_KEY_BATTERY_LEVEL: u8 = 100;

// ============================================================================
// Proximity link
// ============================================================================

/// Minimum advertisement RSSI (dBm) for an authorized device to count as near.
///
/// -60 dBm is within a few feet, -90 dBm is far away.
pub const DEFAULT_RSSI_THRESHOLD_DBM: i16 = -80;

/// First delay applied after a failed connection attempt.
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 500;

/// Upper bound for the exponential reconnection backoff.
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 8000;

/// Timeout for the unlock characteristic write.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 3000;
