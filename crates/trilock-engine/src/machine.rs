//! Phase verification state machine.
//!
//! [`PhaseMachine`] owns the authoritative [`LockState`] and applies the pure
//! [`transition`](crate::transition) functions to it. On top of the rules it
//! tracks two things the pure functions cannot:
//!
//! - the unlock handshake session. Each completion of the verified set
//!   opens a new session; any transition that breaks the set closes it, and
//!   a handshake outcome for a closed session is discarded.
//! - a bounded history of phase changes for diagnostics.
//!
//! # Examples
//!
//! ```
//! use trilock_core::{DeviceKind, DeviceRegistry, Phase, RegisteredDevice};
//! use trilock_engine::dispatcher::RelayOutcome;
//! use trilock_engine::machine::PhaseMachine;
//!
//! let mut registry = DeviceRegistry::new();
//! registry
//!     .register_device(RegisteredDevice::new("PHONE-1", "Pixel", DeviceKind::Phone).unwrap())
//!     .unwrap();
//! let mut machine = PhaseMachine::new();
//!
//! machine.proximity_entered();
//! machine.trigger(&registry, Phase::Fingerprint).unwrap();
//! let session = machine.trigger(&registry, Phase::Vein).unwrap().dispatch.unwrap();
//!
//! // A reset during the settle delay closes the session...
//! machine.reset(None);
//! // ...so its late outcome no longer unlocks.
//! machine.complete_unlock(session, &RelayOutcome::Triggered);
//! assert!(machine.state().is_locked);
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use trilock_core::{
    ConnectionMode, DeviceRegistry, LockState, ModeSwitchPolicy, Phase, Result, SecurityEvent,
    constants::DEFAULT_RESET_REASON,
};

use crate::dispatcher::RelayOutcome;
use crate::transition::{self, Transition};

/// Maximum number of phase changes kept in history.
const MAX_HISTORY_SIZE: usize = 100;

/// A recorded change of `current_phase`.
#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    /// Lock flag after the change.
    pub locked: bool,
    pub timestamp: Instant,
}

impl PhaseTransition {
    pub fn new(from: Phase, to: Phase, locked: bool) -> Self {
        Self {
            from,
            to,
            locked,
            timestamp: Instant::now(),
        }
    }
}

/// What applying an operation produced, for the engine to act on.
#[derive(Debug, Default)]
pub struct Applied {
    /// Journal events, oldest first.
    pub events: Vec<SecurityEvent>,
    /// A handshake session to start.
    pub dispatch: Option<u64>,
    /// A handshake session that must be abandoned.
    pub cancelled: Option<u64>,
}

pub struct PhaseMachine {
    state: LockState,
    policy: ModeSwitchPolicy,
    history: VecDeque<PhaseTransition>,
    session: u64,
    pending_unlock: Option<u64>,
}

impl PhaseMachine {
    /// Locked, idle machine in simulation mode with the default policy.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> PhaseMachineBuilder {
        PhaseMachineBuilder::default()
    }

    pub fn state(&self) -> &LockState {
        &self.state
    }

    pub fn policy(&self) -> ModeSwitchPolicy {
        self.policy
    }

    /// Session of the handshake currently awaited, if any.
    pub fn pending_unlock(&self) -> Option<u64> {
        self.pending_unlock
    }

    /// Phase changes, oldest first.
    pub fn history(&self) -> &VecDeque<PhaseTransition> {
        &self.history
    }

    pub fn last_transitions(&self, count: usize) -> Vec<PhaseTransition> {
        self.history
            .iter()
            .rev()
            .take(count)
            .rev()
            .cloned()
            .collect()
    }

    /// Verify or revoke one required phase.
    ///
    /// # Errors
    /// Returns `Error::UntriggerablePhase` for `Idle` and `Unlocked`; the
    /// state is left untouched.
    pub fn trigger(&mut self, registry: &DeviceRegistry, phase: Phase) -> Result<Applied> {
        let transition = transition::trigger(&self.state, registry, phase)?;
        Ok(self.apply(transition))
    }

    /// Reset to locked idle. `None` uses the default manual reason.
    pub fn reset(&mut self, reason: Option<&str>) -> Applied {
        let reason = reason.unwrap_or(DEFAULT_RESET_REASON);
        info!(reason, "Resetting lock");
        self.apply(transition::reset(&self.state, reason))
    }

    pub fn toggle_fault_mode(&mut self) -> Applied {
        let applied = self.apply(transition::toggle_fault_mode(&self.state));
        info!(
            enabled = self.state.fault_injection_enabled,
            "Fault injection toggled"
        );
        applied
    }

    pub fn set_connection_mode(&mut self, mode: ConnectionMode) -> Applied {
        if mode == ConnectionMode::Hardware
            && self.policy == ModeSwitchPolicy::RetainVerified
            && !self.state.verified_phases.is_empty()
        {
            warn!(
                retained = self.state.verified_phases.len(),
                "Verified phases carried into hardware mode without hardware validation"
            );
        }
        self.apply(transition::set_connection_mode(&self.state, mode, self.policy))
    }

    pub fn proximity_entered(&mut self) -> Applied {
        self.apply(transition::proximity_entered(&self.state))
    }

    pub fn proximity_left(&mut self) -> Applied {
        self.apply(transition::proximity_left(&self.state))
    }

    /// Merge a handshake outcome into the current state.
    ///
    /// Outcomes for a session that is no longer pending are discarded with
    /// a `Pending` journal entry.
    pub fn complete_unlock(&mut self, session: u64, relay: &RelayOutcome) -> Applied {
        if self.pending_unlock != Some(session) {
            warn!(
                session,
                pending = ?self.pending_unlock,
                "Discarding stale unlock handshake"
            );
            return self.apply(transition::discard_unlock(
                &self.state,
                "session invalidated before completion",
            ));
        }

        self.pending_unlock = None;
        self.apply(transition::complete_unlock(&self.state, relay, Utc::now()))
    }

    fn apply(&mut self, transition: Transition) -> Applied {
        let schedules_unlock = transition.schedules_unlock();
        let Transition { state, events, .. } = transition;

        let from = self.state.current_phase;
        self.state = state;

        if let Err(e) = self.state.check_invariants() {
            error!(error = %e, "Lock state invariant violated");
        }

        if from != self.state.current_phase {
            debug!(
                from = %from,
                to = %self.state.current_phase,
                locked = self.state.is_locked,
                "Phase changed"
            );
            self.add_to_history(PhaseTransition::new(
                from,
                self.state.current_phase,
                self.state.is_locked,
            ));
        }

        let mut applied = Applied {
            events,
            ..Applied::default()
        };

        if self.pending_unlock.is_some() && !self.state.verified_phases.is_complete() {
            applied.cancelled = self.pending_unlock.take();
        }

        if schedules_unlock {
            self.session += 1;
            self.pending_unlock = Some(self.session);
            applied.dispatch = Some(self.session);
        }

        applied
    }

    fn add_to_history(&mut self, transition: PhaseTransition) {
        self.history.push_back(transition);
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct PhaseMachineBuilder {
    state: LockState,
    policy: ModeSwitchPolicy,
}

impl PhaseMachineBuilder {
    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.state.connection_mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: ModeSwitchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> PhaseMachine {
        PhaseMachine {
            state: self.state,
            policy: self.policy,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            session: 0,
            pending_unlock: None,
        }
    }
}

impl Default for PhaseMachineBuilder {
    fn default() -> Self {
        Self {
            state: LockState::default(),
            policy: ModeSwitchPolicy::default(),
        }
    }
}
