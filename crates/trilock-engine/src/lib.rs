//! Phase verification engine for the TriLock multi-factor lock.
//!
//! The engine decides which of the three required factors (proximity,
//! fingerprint, vein) are verified, runs the unlock handshake once all of
//! them are, and re-locks on auto-lock expiry or proximity loss.
//!
//! - [`transition`]: pure rules, snapshot in, snapshot plus events out.
//! - [`machine`]: [`PhaseMachine`], the owner of the lock state and the
//!   handshake session.
//! - [`dispatcher`]: [`UnlockSignalDispatcher`], the settle delay and the
//!   relay write.
//! - [`timer`]: [`AutoLockTimer`], the cancellable countdown.
//! - [`engine`]: [`LockEngine`], the single-consumer actor tying them to a
//!   [`ProximityLink`](trilock_hardware::ProximityLink), and its
//!   [`EngineHandle`].

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod machine;
pub mod timer;
pub mod transition;

pub use dispatcher::{HandshakeOutcome, RelayOutcome, UnlockSignalDispatcher};
pub use engine::{EngineHandle, LockEngine};
pub use error::{EngineError, Result};
pub use machine::{Applied, PhaseMachine, PhaseMachineBuilder, PhaseTransition};
pub use timer::{AutoLockTimer, TickOutcome, TimerTick};
pub use transition::{Effect, Transition};
