//! Lock engine actor.
//!
//! The engine is a single Tokio task that owns the [`PhaseMachine`], the
//! [`DeviceRegistry`] and the [`EventJournal`]. Every input is a message
//! consumed by one `select!` loop, so all mutations serialize through the
//! same entry point:
//!
//! ```text
//! EngineHandle ──commands──┐
//! ProximityLink ──edges────┤
//!                          ├──► engine task ──► watch<LockState>
//! AutoLockTimer ──ticks────┤        │
//! Dispatcher ──outcomes────┘        └──► EventJournal
//! ```
//!
//! # Examples
//!
//! ```
//! use trilock_core::{DeviceKind, Phase, RegisteredDevice};
//! use trilock_core::config::EngineConfig;
//! use trilock_engine::LockEngine;
//! use trilock_hardware::mock::MockProximityLink;
//!
//! #[tokio::main]
//! async fn main() -> trilock_engine::Result<()> {
//!     let (link, _radio, events) = MockProximityLink::new();
//!     let engine = LockEngine::spawn(&EngineConfig::default(), Default::default(), link, events);
//!
//!     let phone = RegisteredDevice::new("PHONE-1", "Pixel", DeviceKind::Phone)?;
//!     engine.register_device(phone).await?;
//!
//!     let state = engine.trigger(Phase::Fingerprint).await?;
//!     assert!(state.verified_phases.contains(Phase::Fingerprint));
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use trilock_core::{
    AuthorizedKey, BiometricKind, ConnectionMode, DeviceRegistry, EventJournal, JournalCounts,
    LockState, Phase, RegisteredDevice, SecurityEvent,
    config::EngineConfig,
    constants::{AUTO_LOCK_REASON, AUTO_LOCK_TICK_MS},
};
use trilock_hardware::{ProximityEvent, ProximityLink};

use crate::dispatcher::{HandshakeOutcome, UnlockSignalDispatcher};
use crate::error::{EngineError, Result};
use crate::machine::{Applied, PhaseMachine};
use crate::timer::{AutoLockTimer, TickOutcome, TimerTick};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<T>;
type CoreResult<T> = trilock_core::Result<T>;

enum Command {
    Trigger {
        phase: Phase,
        reply: Reply<CoreResult<LockState>>,
    },
    Reset {
        reason: Option<String>,
        reply: Reply<LockState>,
    },
    ToggleFaultMode {
        reply: Reply<LockState>,
    },
    SetConnectionMode {
        mode: ConnectionMode,
        reply: Reply<LockState>,
    },
    RegisterKey {
        name: String,
        reply: Reply<CoreResult<AuthorizedKey>>,
    },
    InsertKey {
        key: AuthorizedKey,
        reply: Reply<CoreResult<()>>,
    },
    RevokeKey {
        id: String,
        reply: Reply<CoreResult<AuthorizedKey>>,
    },
    SetBiometricFlag {
        id: String,
        kind: BiometricKind,
        enrolled: bool,
        reply: Reply<CoreResult<AuthorizedKey>>,
    },
    ToggleBiometric {
        id: String,
        kind: BiometricKind,
        reply: Reply<CoreResult<AuthorizedKey>>,
    },
    RegisterDevice {
        device: RegisteredDevice,
        reply: Reply<CoreResult<()>>,
    },
    RevokeDevice {
        id: String,
        reply: Reply<CoreResult<RegisteredDevice>>,
    },
    Registry {
        reply: Reply<DeviceRegistry>,
    },
    Journal {
        limit: usize,
        reply: Reply<Vec<SecurityEvent>>,
    },
    JournalCounts {
        reply: Reply<JournalCounts>,
    },
    AuditDigest {
        reply: Reply<String>,
    },
    AutoLockRemaining {
        reply: Reply<Option<u32>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Single-consumer lock engine.
pub struct LockEngine<L: ProximityLink> {
    machine: PhaseMachine,
    registry: DeviceRegistry,
    journal: EventJournal,
    link: Arc<L>,
    dispatcher: UnlockSignalDispatcher<L>,
    timer: AutoLockTimer,
    state_tx: watch::Sender<LockState>,
    commands: mpsc::Receiver<Command>,
    link_events: mpsc::Receiver<ProximityEvent>,
    link_open: bool,
    ticks: mpsc::UnboundedReceiver<TimerTick>,
    outcomes: mpsc::UnboundedReceiver<HandshakeOutcome>,
}

impl<L: ProximityLink> LockEngine<L> {
    /// Spawn the engine task and return a handle to it.
    ///
    /// The registry's Bluetooth identifiers are pushed to the link as its
    /// authorization list before the first event is processed.
    pub fn spawn(
        config: &EngineConfig,
        registry: DeviceRegistry,
        link: L,
        link_events: mpsc::Receiver<ProximityEvent>,
    ) -> EngineHandle {
        Self::spawn_with_tick(
            config,
            registry,
            link,
            link_events,
            Duration::from_millis(AUTO_LOCK_TICK_MS),
        )
    }

    /// Like [`spawn`](Self::spawn) with a custom auto-lock tick interval.
    pub fn spawn_with_tick(
        config: &EngineConfig,
        registry: DeviceRegistry,
        link: L,
        link_events: mpsc::Receiver<ProximityEvent>,
        tick_interval: Duration,
    ) -> EngineHandle {
        let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();

        let machine = PhaseMachine::builder()
            .with_connection_mode(config.initial_mode)
            .with_policy(config.mode_switch_policy)
            .build();
        let (state_tx, state_rx) = watch::channel(machine.state().clone());

        let link = Arc::new(link);
        let engine = Self {
            machine,
            registry,
            journal: EventJournal::new(config.journal_capacity),
            dispatcher: UnlockSignalDispatcher::new(
                Arc::clone(&link),
                config.settle_delay(),
                outcome_tx,
            ),
            link,
            timer: AutoLockTimer::new(config.auto_lock_secs, tick_interval, tick_tx),
            state_tx,
            commands,
            link_events,
            link_open: true,
            ticks,
            outcomes,
        };

        tokio::spawn(engine.run());

        EngineHandle {
            commands: command_tx,
            state_rx,
        }
    }

    async fn run(mut self) {
        self.push_authorized_ids();
        info!(
            mode = %self.machine.state().connection_mode,
            keys = self.registry.keys().len(),
            devices = self.registry.devices().len(),
            "Lock engine started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.stop();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.stop();
                        break;
                    }
                },
                event = self.link_events.recv(), if self.link_open => match event {
                    Some(event) => self.handle_link_event(event),
                    None => {
                        warn!("Proximity link event stream closed");
                        self.link_open = false;
                    }
                },
                Some(tick) = self.ticks.recv() => self.handle_tick(tick),
                Some(outcome) = self.outcomes.recv() => self.handle_outcome(outcome),
            }
        }

        info!("Lock engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Trigger { phase, reply } => {
                let result = self.machine.trigger(&self.registry, phase);
                let result = result.map(|applied| {
                    self.commit(applied);
                    self.machine.state().clone()
                });
                if let Err(e) = &result {
                    warn!("Rejected trigger: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::Reset { reason, reply } => {
                let applied = self.machine.reset(reason.as_deref());
                self.commit(applied);
                let _ = reply.send(self.machine.state().clone());
            }
            Command::ToggleFaultMode { reply } => {
                let applied = self.machine.toggle_fault_mode();
                self.commit(applied);
                let _ = reply.send(self.machine.state().clone());
            }
            Command::SetConnectionMode { mode, reply } => {
                info!("Switching connection mode to {}", mode);
                let applied = self.machine.set_connection_mode(mode);
                self.commit(applied);
                let _ = reply.send(self.machine.state().clone());
            }
            Command::RegisterKey { name, reply } => {
                let result = self.registry.register_key(&name);
                if let Ok(key) = &result {
                    self.record_admin(format!("Admin: Registered new hardware key [{}]", key.id));
                }
                let _ = reply.send(result);
            }
            Command::InsertKey { key, reply } => {
                let id = key.id.clone();
                let result = self.registry.insert_key(key);
                if result.is_ok() {
                    self.record_admin(format!("Admin: Registered new hardware key [{id}]"));
                }
                let _ = reply.send(result);
            }
            Command::RevokeKey { id, reply } => {
                let result = self.registry.revoke_key(&id);
                if result.is_ok() {
                    self.record_admin(format!("Admin: Revoked key [{id}]"));
                }
                let _ = reply.send(result);
            }
            Command::SetBiometricFlag {
                id,
                kind,
                enrolled,
                reply,
            } => {
                let result = self
                    .registry
                    .set_biometric_flag(&id, kind, enrolled)
                    .cloned();
                if result.is_ok() {
                    self.record_admin(format!("Admin: Updated biometrics for [{id}]"));
                }
                let _ = reply.send(result);
            }
            Command::ToggleBiometric { id, kind, reply } => {
                let result = self.registry.toggle_biometric(&id, kind).cloned();
                if result.is_ok() {
                    self.record_admin(format!("Admin: Updated biometrics for [{id}]"));
                }
                let _ = reply.send(result);
            }
            Command::RegisterDevice { device, reply } => {
                let detail = format!("Admin: Registered {} device [{}]", device.kind, device.id);
                let result = self.registry.register_device(device);
                if result.is_ok() {
                    self.record_admin(detail);
                    self.push_authorized_ids();
                }
                let _ = reply.send(result);
            }
            Command::RevokeDevice { id, reply } => {
                let result = self.registry.revoke_device(&id);
                if result.is_ok() {
                    self.record_admin(format!("Admin: Revoked device [{id}]"));
                    self.push_authorized_ids();
                }
                let _ = reply.send(result);
            }
            Command::Registry { reply } => {
                let _ = reply.send(self.registry.clone());
            }
            Command::Journal { limit, reply } => {
                let _ = reply.send(self.journal.tail(limit));
            }
            Command::JournalCounts { reply } => {
                let _ = reply.send(self.journal.counts());
            }
            Command::AuditDigest { reply } => {
                let _ = reply.send(self.journal.audit_digest());
            }
            Command::AutoLockRemaining { reply } => {
                let _ = reply.send(self.timer.remaining());
            }
            Command::Shutdown { .. } => {
                // Handled by the run loop.
            }
        }
    }

    fn handle_link_event(&mut self, event: ProximityEvent) {
        match event {
            ProximityEvent::Entered { device_id } => {
                info!("Proximity device {} in range", device_id);
                let applied = self.machine.proximity_entered();
                self.commit(applied);
            }
            ProximityEvent::Left { device_id } => {
                info!("Proximity device {} out of range, resetting", device_id);
                let applied = self.machine.proximity_left();
                self.commit(applied);
            }
        }
    }

    fn handle_tick(&mut self, tick: TimerTick) {
        match self.timer.on_tick(tick) {
            TickOutcome::Ignored => {}
            TickOutcome::Remaining(seconds) => debug!(seconds, "Auto-lock countdown"),
            TickOutcome::Expired => {
                info!("Auto-lock period elapsed");
                let applied = self.machine.reset(Some(AUTO_LOCK_REASON));
                self.commit(applied);
            }
        }
    }

    fn handle_outcome(&mut self, outcome: HandshakeOutcome) {
        self.dispatcher.finish(outcome.session);
        let applied = self
            .machine
            .complete_unlock(outcome.session, &outcome.relay);
        if self.machine.state().is_unlocked() {
            info!(
                session = outcome.session,
                relay = ?outcome.relay,
                "Lock disengaged"
            );
        }
        self.commit(applied);
    }

    /// Journal the events, run side effects and publish the new snapshot.
    fn commit(&mut self, applied: Applied) {
        let Applied {
            events,
            dispatch,
            cancelled,
        } = applied;

        for event in events {
            self.journal.record(event);
        }

        if let Some(session) = cancelled {
            info!(session, "Unlock handshake invalidated");
            self.dispatcher.cancel();
        }
        if let Some(session) = dispatch {
            self.dispatcher.dispatch(session);
        }

        let state = self.machine.state();
        self.timer.sync(state);
        self.state_tx.send_replace(state.clone());
    }

    fn record_admin(&mut self, detail: String) {
        info!("{}", detail);
        let mode = self.machine.state().connection_mode;
        self.journal
            .record(SecurityEvent::success(Phase::Idle, detail, mode));
    }

    fn push_authorized_ids(&self) {
        let ids = self.registry.bluetooth_ids();
        debug!(count = ids.len(), "Pushing authorization list to proximity link");
        self.link.set_authorized_ids(ids);
    }

    fn stop(&mut self) {
        self.dispatcher.cancel();
        self.timer.cancel();
    }
}

/// Cloneable handle to a running [`LockEngine`].
///
/// Every method is a request to the engine task; state-changing methods
/// return the snapshot as it stood right after the operation.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<LockState>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| EngineError::EngineStopped)?;
        response.await.map_err(|_| EngineError::EngineStopped)
    }

    /// Verify or revoke one required phase.
    ///
    /// # Errors
    /// Returns `EngineError::Core` for `Idle`/`Unlocked` and
    /// `EngineError::EngineStopped` if the engine has exited.
    pub async fn trigger(&self, phase: Phase) -> Result<LockState> {
        let phase = phase.ensure_triggerable()?;
        Ok(self
            .request(|reply| Command::Trigger { phase, reply })
            .await??)
    }

    /// Reset to locked idle. `None` records the default manual reason.
    pub async fn reset(&self, reason: Option<String>) -> Result<LockState> {
        self.request(|reply| Command::Reset { reason, reply }).await
    }

    pub async fn toggle_fault_mode(&self) -> Result<LockState> {
        self.request(|reply| Command::ToggleFaultMode { reply })
            .await
    }

    pub async fn set_connection_mode(&self, mode: ConnectionMode) -> Result<LockState> {
        self.request(|reply| Command::SetConnectionMode { mode, reply })
            .await
    }

    /// Register a key under the next free `KEY-NNN` id.
    pub async fn register_key(&self, name: impl Into<String>) -> Result<AuthorizedKey> {
        let name = name.into();
        Ok(self
            .request(|reply| Command::RegisterKey { name, reply })
            .await??)
    }

    pub async fn insert_key(&self, key: AuthorizedKey) -> Result<()> {
        Ok(self
            .request(|reply| Command::InsertKey { key, reply })
            .await??)
    }

    pub async fn revoke_key(&self, id: impl Into<String>) -> Result<AuthorizedKey> {
        let id = id.into();
        Ok(self
            .request(|reply| Command::RevokeKey { id, reply })
            .await??)
    }

    pub async fn set_biometric_flag(
        &self,
        id: impl Into<String>,
        kind: BiometricKind,
        enrolled: bool,
    ) -> Result<AuthorizedKey> {
        let id = id.into();
        Ok(self
            .request(|reply| Command::SetBiometricFlag {
                id,
                kind,
                enrolled,
                reply,
            })
            .await??)
    }

    pub async fn toggle_biometric(
        &self,
        id: impl Into<String>,
        kind: BiometricKind,
    ) -> Result<AuthorizedKey> {
        let id = id.into();
        Ok(self
            .request(|reply| Command::ToggleBiometric { id, kind, reply })
            .await??)
    }

    /// Register a simulation device. Bluetooth devices join the link's
    /// authorization list.
    pub async fn register_device(&self, device: RegisteredDevice) -> Result<()> {
        Ok(self
            .request(|reply| Command::RegisterDevice { device, reply })
            .await??)
    }

    pub async fn revoke_device(&self, id: impl Into<String>) -> Result<RegisteredDevice> {
        let id = id.into();
        Ok(self
            .request(|reply| Command::RevokeDevice { id, reply })
            .await??)
    }

    /// Copy of the current registry.
    pub async fn registry(&self) -> Result<DeviceRegistry> {
        self.request(|reply| Command::Registry { reply }).await
    }

    /// Latest published snapshot. Does not round-trip through the engine.
    pub fn snapshot(&self) -> LockState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every whole-state replacement.
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.state_rx.clone()
    }

    /// Up to `limit` most recent journal events, newest first.
    pub async fn journal(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        self.request(|reply| Command::Journal { limit, reply })
            .await
    }

    pub async fn journal_counts(&self) -> Result<JournalCounts> {
        self.request(|reply| Command::JournalCounts { reply })
            .await
    }

    /// Newest-first audit lines for the summarization collaborator.
    pub async fn audit_digest(&self) -> Result<String> {
        self.request(|reply| Command::AuditDigest { reply }).await
    }

    /// Seconds until auto-lock, or `None` while the countdown is inactive.
    pub async fn auto_lock_remaining(&self) -> Result<Option<u32>> {
        self.request(|reply| Command::AutoLockRemaining { reply })
            .await
    }

    /// Stop the engine, cancelling any pending handshake and countdown.
    ///
    /// Idempotent; returns once the engine has stopped.
    pub async fn shutdown(&self) {
        if self
            .request(|reply| Command::Shutdown { reply })
            .await
            .is_err()
        {
            debug!("Lock engine already stopped");
        }
        self.commands.closed().await;
    }

    /// `false` once the engine task has exited.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
