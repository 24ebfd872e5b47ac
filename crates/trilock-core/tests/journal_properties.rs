//! Property-based tests for the bounded security journal.

use proptest::prelude::*;
use trilock_core::{ConnectionMode, EventJournal, EventOutcome, Phase, SecurityEvent};

fn outcome() -> impl Strategy<Value = EventOutcome> {
    prop_oneof![
        Just(EventOutcome::Success),
        Just(EventOutcome::Failure),
        Just(EventOutcome::Pending),
    ]
}

fn numbered(n: usize, outcome: EventOutcome) -> SecurityEvent {
    SecurityEvent::new(
        Phase::Idle,
        outcome,
        format!("event {n}"),
        ConnectionMode::Simulation,
    )
}

proptest! {
    /// Property: after any number of records the journal holds exactly the
    /// most recent `min(n, capacity)` events, newest first.
    #[test]
    fn prop_journal_keeps_most_recent(
        capacity in 1usize..80,
        outcomes in prop::collection::vec(outcome(), 0..200),
    ) {
        let mut journal = EventJournal::new(capacity);
        for (n, outcome) in outcomes.iter().enumerate() {
            journal.record(numbered(n, *outcome));
        }

        let expected = outcomes.len().min(capacity);
        prop_assert_eq!(journal.len(), expected);

        let details: Vec<String> = journal.iter().map(|e| e.detail.clone()).collect();
        let wanted: Vec<String> = (0..outcomes.len())
            .rev()
            .take(expected)
            .map(|n| format!("event {n}"))
            .collect();
        prop_assert_eq!(details, wanted);

        let counts = journal.counts();
        prop_assert_eq!(counts.success + counts.failure + counts.pending, expected);
    }

    /// Property: `tail(limit)` is a prefix of the full newest-first view.
    #[test]
    fn prop_tail_is_prefix(records in 0usize..120, limit in 0usize..120) {
        let mut journal = EventJournal::default();
        for n in 0..records {
            journal.record(numbered(n, EventOutcome::Pending));
        }

        let tail = journal.tail(limit);
        prop_assert_eq!(tail.len(), limit.min(journal.len()));
        for (a, b) in tail.iter().zip(journal.iter()) {
            prop_assert_eq!(a.id, b.id);
        }
        prop_assert_eq!(journal.audit_digest().lines().count(), journal.len());
    }
}
