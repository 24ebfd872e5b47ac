//! Unlock handshake dispatcher.
//!
//! Once every required phase is verified the engine asks the dispatcher to
//! run the handshake for a session: wait the settle delay, write the unlock
//! command through the [`ProximityLink`] and report a [`HandshakeOutcome`]
//! back to the engine's queue. The engine merges the outcome into whatever
//! the state is by then.
//!
//! At most one handshake is in flight. Cancelling aborts the task, and the
//! session number lets the engine drop an outcome that was already queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trilock_hardware::{ProximityLink, TransportError};

/// Physical result of the unlock command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The transport acknowledged the command.
    Triggered,
    /// Nothing connected, or the write went unacknowledged.
    Unacknowledged,
    /// The transport reported an error.
    Failed(String),
}

impl RelayOutcome {
    pub fn from_result(result: Result<bool, TransportError>) -> Self {
        match result {
            Ok(true) => Self::Triggered,
            Ok(false) => Self::Unacknowledged,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Triggered)
    }
}

/// Completion message for one handshake session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub session: u64,
    pub relay: RelayOutcome,
}

pub struct UnlockSignalDispatcher<L: ProximityLink> {
    link: Arc<L>,
    settle_delay: Duration,
    outcome_tx: mpsc::UnboundedSender<HandshakeOutcome>,
    pending: Option<(u64, JoinHandle<()>)>,
}

impl<L: ProximityLink> UnlockSignalDispatcher<L> {
    pub fn new(
        link: Arc<L>,
        settle_delay: Duration,
        outcome_tx: mpsc::UnboundedSender<HandshakeOutcome>,
    ) -> Self {
        Self {
            link,
            settle_delay,
            outcome_tx,
            pending: None,
        }
    }

    /// Start the handshake for `session`, replacing any unfinished one.
    pub fn dispatch(&mut self, session: u64) {
        if let Some(previous) = self.cancel() {
            warn!(previous, session, "Replacing unfinished unlock handshake");
        }

        let link = Arc::clone(&self.link);
        let settle_delay = self.settle_delay;
        let tx = self.outcome_tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(settle_delay).await;
            debug!(session, "Settle delay elapsed, sending unlock command");

            let relay = RelayOutcome::from_result(link.send_unlock_signal().await);
            if !relay.is_confirmed() {
                warn!(session, relay = ?relay, "Unlock command not confirmed by relay");
            }
            let _ = tx.send(HandshakeOutcome { session, relay });
        });

        info!(
            session,
            settle_ms = settle_delay.as_millis() as u64,
            "Unlock handshake scheduled"
        );
        self.pending = Some((session, task));
    }

    /// Abort the in-flight handshake. Returns its session, if any.
    pub fn cancel(&mut self) -> Option<u64> {
        let (session, task) = self.pending.take()?;
        task.abort();
        debug!(session, "Unlock handshake cancelled");
        Some(session)
    }

    /// Forget the task for `session` once its outcome has been received.
    pub fn finish(&mut self, session: u64) {
        if self.pending_session() == Some(session) {
            self.pending = None;
        }
    }

    pub fn pending_session(&self) -> Option<u64> {
        self.pending.as_ref().map(|(session, _)| *session)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<L: ProximityLink> Drop for UnlockSignalDispatcher<L> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;
    use trilock_hardware::mock::{MockProximityLink, UnlockResponse};

    const BEACON: &str = "AA:BB:CC:DD:EE:FF";

    async fn connected_link() -> (
        Arc<MockProximityLink>,
        trilock_hardware::mock::MockLinkHandle,
        mpsc::Receiver<trilock_hardware::ProximityEvent>,
    ) {
        let (link, handle, events) = MockProximityLink::new();
        link.set_authorized_ids(vec![BEACON.to_string()]);
        handle.enter(BEACON).await.unwrap();
        (Arc::new(link), handle, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_after_settle_delay() {
        let (link, handle, _events) = connected_link().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dispatcher = UnlockSignalDispatcher::new(link, Duration::from_millis(800), tx);

        let start = Instant::now();
        dispatcher.dispatch(7);
        assert_eq!(dispatcher.pending_session(), Some(7));

        let outcome = rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(800));
        assert_eq!(
            outcome,
            HandshakeOutcome {
                session: 7,
                relay: RelayOutcome::Triggered
            }
        );
        assert_eq!(handle.unlock_calls(), 1);

        dispatcher.finish(7);
        assert!(!dispatcher.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_settle_sends_nothing() {
        let (link, handle, _events) = connected_link().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dispatcher = UnlockSignalDispatcher::new(link, Duration::from_millis(800), tx);

        dispatcher.dispatch(1);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(dispatcher.cancel(), Some(1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.unlock_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_becomes_failed_outcome() {
        let (link, handle, _events) = connected_link().await;
        handle.queue_unlock_response(UnlockResponse::Fail(TransportError::timeout(3000)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dispatcher = UnlockSignalDispatcher::new(link, Duration::from_millis(10), tx);

        dispatcher.dispatch(3);
        let outcome = rx.recv().await.unwrap();
        assert_eq!(
            outcome.relay,
            RelayOutcome::Failed("Operation timeout after 3000ms".to_string())
        );
    }

    #[test]
    fn test_relay_outcome_from_result() {
        assert_eq!(RelayOutcome::from_result(Ok(true)), RelayOutcome::Triggered);
        assert_eq!(
            RelayOutcome::from_result(Ok(false)),
            RelayOutcome::Unacknowledged
        );
        assert!(!RelayOutcome::from_result(Err(TransportError::NotConnected)).is_confirmed());
    }
}
