//! FIFO buffering for outbound payloads while no usable connection exists.

use std::collections::VecDeque;
use std::time::Instant;

/// An outbound payload parked while the connection is down.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    /// Serialized text payload
    pub payload: String,
    /// When the message was parked
    pub enqueued_at: Instant,
}

/// Strict-FIFO buffer for outbound payloads.
///
/// A bounded queue drops its oldest entries on overflow; ordering is never
/// changed otherwise.
#[derive(Debug)]
pub(crate) struct MessageQueue {
    entries: VecDeque<QueuedMessage>,
    capacity: Option<usize>,
}

impl MessageQueue {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append a payload, returning the number of entries dropped to make room.
    pub(crate) fn enqueue(&mut self, payload: String) -> usize {
        let mut dropped = 0;
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return 1;
            }
            while self.entries.len() >= capacity {
                if let Some(evicted) = self.entries.pop_front() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        waited = ?evicted.enqueued_at.elapsed(),
                        "Outbound queue full, dropping oldest message"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _: Instant = evicted.enqueued_at;
                }
                dropped += 1;
            }
        }
        self.entries.push_back(QueuedMessage {
            payload,
            enqueued_at: Instant::now(),
        });
        dropped
    }

    /// Take every queued entry, oldest first, leaving the queue empty.
    pub(crate) fn drain(&mut self) -> Vec<QueuedMessage> {
        self.entries.drain(..).collect()
    }

    /// Put back entries that could not be flushed, ahead of anything queued in
    /// the meantime and in their original order.
    pub(crate) fn requeue_front(&mut self, remaining: Vec<QueuedMessage>) {
        for message in remaining.into_iter().rev() {
            self.entries.push_front(message);
        }
    }

    /// Discard everything, returning how many entries were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
