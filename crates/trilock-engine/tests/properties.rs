//! Property-based tests for the phase machine.
//!
//! Random operation sequences are applied to a `PhaseMachine` against a
//! random registry, and the lock invariants are checked after every step.

use proptest::prelude::*;
use trilock_core::{
    AuthorizedKey, ConnectionMode, DeviceKind, DeviceRegistry, LockState, ModeSwitchPolicy, Phase,
    RegisteredDevice,
};
use trilock_engine::{PhaseMachine, RelayOutcome};

#[derive(Debug, Clone)]
enum Op {
    Trigger(Phase),
    Reset,
    ToggleFault,
    SetMode(ConnectionMode),
    Entered,
    Left,
    CompletePending(RelayOutcome),
    CompleteStale,
}

fn required_phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::Proximity),
        Just(Phase::Fingerprint),
        Just(Phase::Vein),
    ]
}

fn connection_mode() -> impl Strategy<Value = ConnectionMode> {
    prop_oneof![
        Just(ConnectionMode::Simulation),
        Just(ConnectionMode::Hardware)
    ]
}

fn relay_outcome() -> impl Strategy<Value = RelayOutcome> {
    prop_oneof![
        Just(RelayOutcome::Triggered),
        Just(RelayOutcome::Unacknowledged),
        Just(RelayOutcome::Failed("Write failed: gatt".to_string())),
    ]
}

fn policy() -> impl Strategy<Value = ModeSwitchPolicy> {
    prop_oneof![
        Just(ModeSwitchPolicy::RetainVerified),
        Just(ModeSwitchPolicy::ResetVerified),
    ]
}

fn operation() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => required_phase().prop_map(Op::Trigger),
        1 => Just(Op::Reset),
        1 => Just(Op::ToggleFault),
        1 => connection_mode().prop_map(Op::SetMode),
        1 => Just(Op::Entered),
        1 => Just(Op::Left),
        3 => relay_outcome().prop_map(Op::CompletePending),
        1 => Just(Op::CompleteStale),
    ]
}

fn registry(beacon: bool, phone: bool, enrolled_key: bool) -> DeviceRegistry {
    let mut registry = DeviceRegistry::new();
    if beacon {
        registry
            .register_device(
                RegisteredDevice::new("AA:BB:CC:DD:EE:FF", "Beacon", DeviceKind::Bluetooth)
                    .unwrap(),
            )
            .unwrap();
    }
    if phone {
        registry
            .register_device(RegisteredDevice::new("PHONE-1", "Pixel", DeviceKind::Phone).unwrap())
            .unwrap();
    }
    let mut key = AuthorizedKey::new("KEY-001", "Master Key A", 85).unwrap();
    if enrolled_key {
        key = key.fully_enrolled();
    }
    registry.insert_key(key).unwrap();
    registry
}

fn any_registry() -> impl Strategy<Value = DeviceRegistry> {
    (any::<bool>(), any::<bool>(), any::<bool>())
        .prop_map(|(beacon, phone, key)| registry(beacon, phone, key))
}

fn apply(machine: &mut PhaseMachine, registry: &DeviceRegistry, op: &Op) {
    match op {
        Op::Trigger(phase) => {
            machine.trigger(registry, *phase).unwrap();
        }
        Op::Reset => {
            machine.reset(None);
        }
        Op::ToggleFault => {
            machine.toggle_fault_mode();
        }
        Op::SetMode(mode) => {
            machine.set_connection_mode(*mode);
        }
        Op::Entered => {
            machine.proximity_entered();
        }
        Op::Left => {
            machine.proximity_left();
        }
        Op::CompletePending(relay) => {
            if let Some(session) = machine.pending_unlock() {
                machine.complete_unlock(session, relay);
            }
        }
        Op::CompleteStale => {
            machine.complete_unlock(u64::MAX, &RelayOutcome::Triggered);
        }
    }
}

fn sorted_phases(state: &LockState) -> Vec<Phase> {
    let mut phases: Vec<Phase> = state.verified_phases.iter().collect();
    phases.sort_by_key(|p| p.label());
    phases
}

proptest! {
    /// Property: unlocked iff in the Unlocked phase, and only with every
    /// required phase verified. A complete but locked set always has a
    /// handshake pending.
    #[test]
    fn prop_lock_flag_matches_phase_and_set(
        registry in any_registry(),
        policy in policy(),
        ops in prop::collection::vec(operation(), 0..60),
    ) {
        let mut machine = PhaseMachine::builder().with_policy(policy).build();

        for op in &ops {
            apply(&mut machine, &registry, op);
            let state = machine.state();

            prop_assert!(state.check_invariants().is_ok());
            prop_assert_eq!(!state.is_locked, state.current_phase == Phase::Unlocked);
            if !state.is_locked {
                prop_assert!(state.verified_phases.is_complete());
            }
            if state.verified_phases.is_complete() && state.is_locked {
                prop_assert!(machine.pending_unlock().is_some());
            }
            if !state.verified_phases.is_complete() {
                prop_assert!(machine.pending_unlock().is_none());
            }
            prop_assert!(state.verified_phases.len() <= 3);
        }
    }

    /// Property: revoking a verified phase and immediately re-verifying it
    /// with every precondition satisfied restores the same verified set.
    #[test]
    fn prop_disconnect_reconnect_restores_set(
        ops in prop::collection::vec(operation(), 0..40),
        pick in any::<prop::sample::Index>(),
    ) {
        let registry = registry(true, true, true);
        let mut machine = PhaseMachine::new();
        for op in &ops {
            apply(&mut machine, &registry, op);
        }

        let state = machine.state().clone();
        prop_assume!(!state.verified_phases.is_empty());
        prop_assume!(
            !(state.fault_injection_enabled && state.connection_mode == ConnectionMode::Simulation)
        );

        let verified: Vec<Phase> = state.verified_phases.iter().collect();
        let phase = *pick.get(&verified);

        machine.trigger(&registry, phase).unwrap();
        prop_assert!(!machine.state().verified_phases.contains(phase));
        machine.trigger(&registry, phase).unwrap();

        prop_assert_eq!(sorted_phases(machine.state()), sorted_phases(&state));
    }

    /// Property: with fault injection on in simulation mode, no sequence of
    /// manual triggers ever unlocks.
    #[test]
    fn prop_fault_injection_blocks_unlock(
        registry in any_registry(),
        phases in prop::collection::vec(required_phase(), 0..40),
        relays in prop::collection::vec(relay_outcome(), 40),
    ) {
        let mut machine = PhaseMachine::new();
        machine.toggle_fault_mode();

        for (phase, relay) in phases.iter().zip(relays.iter()) {
            machine.trigger(&registry, *phase).unwrap();
            if let Some(session) = machine.pending_unlock() {
                machine.complete_unlock(session, relay);
            }
            prop_assert!(machine.state().is_locked);
            prop_assert!(machine.state().verified_phases.is_empty());
        }
    }

    /// Property: proximity loss from any state leaves a locked, idle,
    /// empty session with no handshake pending.
    #[test]
    fn prop_proximity_loss_resets_everything(
        registry in any_registry(),
        ops in prop::collection::vec(operation(), 0..40),
    ) {
        let mut machine = PhaseMachine::new();
        for op in &ops {
            apply(&mut machine, &registry, op);
        }

        machine.proximity_left();
        let state = machine.state();
        prop_assert!(state.verified_phases.is_empty());
        prop_assert_eq!(state.current_phase, Phase::Idle);
        prop_assert!(state.is_locked);
        prop_assert!(state.active_alarms.is_empty());
        prop_assert!(machine.pending_unlock().is_none());
    }

    /// Property: an outcome for a session that is not pending never changes
    /// the lock state.
    #[test]
    fn prop_stale_outcome_is_inert(
        registry in any_registry(),
        ops in prop::collection::vec(operation(), 0..40),
    ) {
        let mut machine = PhaseMachine::new();
        for op in &ops {
            apply(&mut machine, &registry, op);
        }

        let before = machine.state().clone();
        let pending = machine.pending_unlock();
        machine.complete_unlock(u64::MAX, &RelayOutcome::Triggered);
        prop_assert_eq!(machine.state(), &before);
        prop_assert_eq!(machine.pending_unlock(), pending);
    }
}
