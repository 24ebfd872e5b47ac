//! Pure lock-state transitions.
//!
//! Every function here takes the current snapshot by reference and returns a
//! [`Transition`]: the replacement snapshot, the journal events it produced
//! and an optional side effect for the caller to run. Nothing is mutated in
//! place, so the engine can publish each result as a whole-state replacement
//! and the rules can be tested without a runtime.
//!
//! # Trigger rules
//!
//! Applied in order, first match wins:
//!
//! 1. Disconnect: an already verified phase is revoked.
//! 2. Fault injection (simulation only): the attempt fails with an alarm.
//! 3. Mode-specific credential checks.
//! 4. Success: the phase is appended to the verified set.
//! 5. Completion: the third factor schedules the unlock handshake.
//!
//! # Examples
//!
//! ```
//! use trilock_core::{DeviceRegistry, LockState, Phase};
//! use trilock_engine::transition;
//!
//! let state = LockState::default();
//! let registry = DeviceRegistry::new();
//!
//! // No beacon registered: an expected negative, nothing changes.
//! let t = transition::trigger(&state, &registry, Phase::Proximity).unwrap();
//! assert!(t.state.verified_phases.is_empty());
//! assert!(t.state.active_alarms.is_empty());
//! ```

use chrono::{DateTime, Utc};
use tracing::error;
use trilock_core::{
    ConnectionMode, DeviceKind, DeviceRegistry, LockState, ModeSwitchPolicy, Phase, Result,
    SecurityEvent,
    constants::PROXIMITY_LOST_REASON,
};

use crate::dispatcher::RelayOutcome;

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// All required phases are verified; start the unlock handshake.
    ScheduleUnlock,
}

/// Result of applying one operation to a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: LockState,
    pub events: Vec<SecurityEvent>,
    pub effect: Option<Effect>,
}

impl Transition {
    fn new(state: LockState) -> Self {
        Self {
            state,
            events: Vec::new(),
            effect: None,
        }
    }

    fn with_event(mut self, event: SecurityEvent) -> Self {
        self.events.push(event);
        self
    }

    #[must_use]
    pub fn schedules_unlock(&self) -> bool {
        self.effect == Some(Effect::ScheduleUnlock)
    }
}

/// Attempt to verify (or revoke) one required phase.
///
/// # Errors
/// Returns `Error::UntriggerablePhase` for `Idle` and `Unlocked`. All other
/// rejections are reported through the journal, not as errors.
pub fn trigger(state: &LockState, registry: &DeviceRegistry, phase: Phase) -> Result<Transition> {
    let phase = phase.ensure_triggerable()?;
    let mode = state.connection_mode;
    let mut next = state.clone();

    if next.verified_phases.remove(phase) {
        next.current_phase = next.verified_phases.last().unwrap_or(Phase::Idle);
        next.is_locked = true;
        let event = SecurityEvent::pending(phase, format!("Parameter disconnected: {phase}"), mode);
        return Ok(Transition::new(next).with_event(event));
    }

    if next.fault_injection_enabled && mode == ConnectionMode::Simulation {
        next.active_alarms.push(format!("Simulated {phase} malfunction"));
        let event = SecurityEvent::failure(
            phase,
            format!("Fault injection: hardware malfunction detected in {phase} circuit."),
            mode,
        );
        return Ok(Transition::new(next).with_event(event));
    }

    match mode {
        ConnectionMode::Simulation => {
            let required = match phase {
                Phase::Proximity => Some((DeviceKind::Bluetooth, "Bluetooth beacon")),
                Phase::Fingerprint => Some((DeviceKind::Phone, "phone")),
                _ => None,
            };
            if let Some((kind, label)) = required
                && !registry.has_device_of_kind(kind)
            {
                let event = SecurityEvent::failure(
                    phase,
                    format!("No registered {label} available for {phase} verification."),
                    mode,
                );
                return Ok(Transition::new(next).with_event(event));
            }
        }
        ConnectionMode::Hardware => {
            if phase != Phase::Proximity && !registry.has_fully_enrolled_key() {
                next.active_alarms
                    .push("Unauthorized hardware interaction".to_string());
                let event = SecurityEvent::failure(
                    phase,
                    "Security breach: unregistered hardware key detected.",
                    mode,
                );
                return Ok(Transition::new(next).with_event(event));
            }
        }
    }

    Ok(verify(next, phase))
}

/// Success path shared by manual triggers and proximity edges.
fn verify(mut next: LockState, phase: Phase) -> Transition {
    let mode = next.connection_mode;
    // Callers only reach here with a required phase that is not yet present.
    let inserted = next.verified_phases.insert(phase);
    debug_assert!(
        matches!(inserted, Ok(true)),
        "verify({phase}) on {:?}: {inserted:?}",
        next.verified_phases
    );
    if !matches!(inserted, Ok(true)) {
        error!(phase = %phase, result = ?inserted, "Verification skipped, phase not insertable");
        return Transition::new(next);
    }
    next.current_phase = phase;

    let complete = next.verified_phases.is_complete();
    let event = SecurityEvent::success(
        phase,
        format!("{phase} signal successfully captured and verified."),
        mode,
    );
    let mut transition = Transition::new(next).with_event(event);
    if complete {
        transition.effect = Some(Effect::ScheduleUnlock);
    }
    transition
}

/// Return to the locked idle state, clearing verified phases and alarms.
pub fn reset(state: &LockState, reason: &str) -> Transition {
    let next = LockState {
        current_phase: Phase::Idle,
        verified_phases: Default::default(),
        is_locked: true,
        active_alarms: Vec::new(),
        ..state.clone()
    };
    let event = SecurityEvent::pending(Phase::Idle, reason, state.connection_mode);
    Transition::new(next).with_event(event)
}

/// Flip fault injection. Produces no journal event.
pub fn toggle_fault_mode(state: &LockState) -> Transition {
    let mut next = state.clone();
    next.fault_injection_enabled = !next.fault_injection_enabled;
    Transition::new(next)
}

/// Switch connection mode, always clearing fault injection.
///
/// Under [`ModeSwitchPolicy::ResetVerified`] the verified set is cleared and
/// the lock re-engaged as well.
pub fn set_connection_mode(
    state: &LockState,
    mode: ConnectionMode,
    policy: ModeSwitchPolicy,
) -> Transition {
    let mut next = state.clone();
    next.connection_mode = mode;
    next.fault_injection_enabled = false;

    let detail = match policy {
        ModeSwitchPolicy::RetainVerified => format!("Switched to {mode} mode."),
        ModeSwitchPolicy::ResetVerified => {
            next.verified_phases.clear();
            next.current_phase = Phase::Idle;
            next.is_locked = true;
            format!("Switched to {mode} mode. Verified phases cleared.")
        }
    };

    let event = SecurityEvent::pending(Phase::Idle, detail, mode);
    Transition::new(next).with_event(event)
}

/// An authorized device came into range.
///
/// Skips fault and credential checks; the link already filtered the device.
/// A no-op if proximity is already verified.
pub fn proximity_entered(state: &LockState) -> Transition {
    if state.verified_phases.contains(Phase::Proximity) {
        return Transition::new(state.clone());
    }
    verify(state.clone(), Phase::Proximity)
}

/// The connected device went out of range. Invalidates the whole session.
pub fn proximity_left(state: &LockState) -> Transition {
    reset(state, PROXIMITY_LOST_REASON)
}

/// Finish the unlock handshake against the latest snapshot.
///
/// If the verified set is no longer complete the handshake is discarded and
/// the snapshot is left untouched apart from a `Pending` journal entry.
pub fn complete_unlock(state: &LockState, relay: &RelayOutcome, now: DateTime<Utc>) -> Transition {
    if !state.verified_phases.is_complete() {
        return discard_unlock(state, "verification set changed during settle delay");
    }

    let mut next = state.clone();
    next.current_phase = Phase::Unlocked;
    next.is_locked = false;
    next.last_unlock_time = Some(now);

    let detail = match relay {
        RelayOutcome::Triggered => {
            "All phases verified. Relay triggered, system fully disengaged.".to_string()
        }
        RelayOutcome::Unacknowledged => {
            "All phases verified but relay failed: command not acknowledged.".to_string()
        }
        RelayOutcome::Failed(message) => {
            format!("All phases verified but relay failed: {message}")
        }
    };

    let event = SecurityEvent::success(Phase::Unlocked, detail, state.connection_mode);
    Transition::new(next).with_event(event)
}

/// Record a dropped handshake without changing the snapshot.
pub fn discard_unlock(state: &LockState, reason: &str) -> Transition {
    let event = SecurityEvent::pending(
        Phase::Idle,
        format!("Unlock handshake discarded: {reason}."),
        state.connection_mode,
    );
    Transition::new(state.clone()).with_event(event)
}
