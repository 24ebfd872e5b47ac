//! Bounded, newest-first log of security events.
//!
//! Every state-changing operation records at least one [`SecurityEvent`].
//! Once the journal holds `capacity` entries the oldest is silently dropped;
//! nothing is persisted elsewhere.

use std::collections::VecDeque;

use crate::{
    constants::DEFAULT_JOURNAL_CAPACITY,
    types::{EventOutcome, SecurityEvent},
};

/// Tally of journal entries by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalCounts {
    pub success: usize,
    pub failure: usize,
    pub pending: usize,
}

#[derive(Debug, Clone)]
pub struct EventJournal {
    /// Newest entry at the front.
    events: VecDeque<SecurityEvent>,
    capacity: usize,
}

impl EventJournal {
    /// Create a journal holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Store an event at the head, discarding the oldest beyond capacity.
    pub fn record(&mut self, event: SecurityEvent) {
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }

    /// Most recent event, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&SecurityEvent> {
        self.events.front()
    }

    /// Up to `limit` most recent events, newest first.
    #[must_use]
    pub fn tail(&self, limit: usize) -> Vec<SecurityEvent> {
        self.events.iter().take(limit).cloned().collect()
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &SecurityEvent> {
        self.events.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn counts(&self) -> JournalCounts {
        self.events
            .iter()
            .fold(JournalCounts::default(), |mut counts, event| {
                match event.outcome {
                    EventOutcome::Success => counts.success += 1,
                    EventOutcome::Failure => counts.failure += 1,
                    EventOutcome::Pending => counts.pending += 1,
                }
                counts
            })
    }

    /// Render the journal as newline separated audit lines, newest first.
    ///
    /// This is the text handed to the external log summarizer.
    #[must_use]
    pub fn audit_digest(&self) -> String {
        self.events
            .iter()
            .map(SecurityEvent::audit_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}
