//! Auto-lock countdown.
//!
//! The countdown is a cancellable ticker task plus a generation counter.
//! Each armed countdown gets a fresh generation; ticks carry the generation
//! they were produced for, so a tick already queued when the countdown was
//! cancelled is recognised as stale and ignored instead of firing a reset
//! into a new unlock cycle.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, trace};
use trilock_core::LockState;

/// One elapsed tick of an armed countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    pub generation: u64,
}

/// What a tick did to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Stale or unarmed; nothing changed.
    Ignored,
    /// Still counting; seconds left.
    Remaining(u32),
    /// Reached zero. The countdown is now inactive.
    Expired,
}

pub struct AutoLockTimer {
    period_secs: u32,
    tick_interval: Duration,
    remaining: Option<u32>,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
    tick_tx: mpsc::UnboundedSender<TimerTick>,
}

impl AutoLockTimer {
    /// Create an inactive timer that reports ticks on `tick_tx`.
    pub fn new(
        period_secs: u32,
        tick_interval: Duration,
        tick_tx: mpsc::UnboundedSender<TimerTick>,
    ) -> Self {
        Self {
            period_secs,
            tick_interval,
            remaining: None,
            generation: 0,
            ticker: None,
            tick_tx,
        }
    }

    /// Seconds left, or `None` while inactive.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn is_active(&self) -> bool {
        self.remaining.is_some()
    }

    /// Start a countdown. Returns `false` if one is already running.
    pub fn arm(&mut self) -> bool {
        if self.remaining.is_some() {
            return false;
        }

        self.generation += 1;
        self.remaining = Some(self.period_secs);

        let generation = self.generation;
        let period = self.tick_interval;
        let tx = self.tick_tx.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if tx.send(TimerTick { generation }).is_err() {
                    break;
                }
            }
        }));

        debug!(
            generation,
            seconds = self.period_secs,
            "Auto-lock countdown armed"
        );
        true
    }

    /// Stop the countdown and invalidate any tick already in flight.
    ///
    /// Returns `false` if nothing was running.
    pub fn cancel(&mut self) -> bool {
        self.stop_ticker();
        if self.remaining.take().is_some() {
            self.generation += 1;
            debug!(generation = self.generation, "Auto-lock countdown cancelled");
            true
        } else {
            false
        }
    }

    /// Account for one tick.
    pub fn on_tick(&mut self, tick: TimerTick) -> TickOutcome {
        if tick.generation != self.generation {
            trace!(
                tick = tick.generation,
                current = self.generation,
                "Ignoring stale auto-lock tick"
            );
            return TickOutcome::Ignored;
        }
        let Some(remaining) = self.remaining else {
            return TickOutcome::Ignored;
        };

        let left = remaining.saturating_sub(1);
        if left == 0 {
            self.stop_ticker();
            self.remaining = None;
            self.generation += 1;
            TickOutcome::Expired
        } else {
            self.remaining = Some(left);
            TickOutcome::Remaining(left)
        }
    }

    /// Arm while `state` is unlocked, cancel otherwise.
    pub fn sync(&mut self, state: &LockState) {
        if state.is_unlocked() {
            self.arm();
        } else {
            self.cancel();
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for AutoLockTimer {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
