//! Groups pending queue entries into bounded batches.

use crate::Result;
use storage::{DurableQueue, EventId, QueueEntry};
use tracing::trace;

/// Dead-letter reason for an entry too large to fit in any batch.
pub const OVERSIZED: &str = "oversized: entry exceeds max_batch_bytes";

/// A group of entries sent in one request.
///
/// Holds snapshots of the entries and the exact body that goes on the wire:
/// a JSON array of events in queue order.
#[derive(Debug, Clone)]
pub struct Batch {
    entries: Vec<QueueEntry>,
    body: Vec<u8>,
}

impl Batch {
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<EventId> {
        self.entries.iter().map(QueueEntry::id).collect()
    }

    /// Encoded body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the encoded body in bytes.
    pub fn bytes(&self) -> usize {
        self.body.len()
    }

    /// The delivery attempt this batch represents, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.entries.iter().map(|e| e.attempts).max().unwrap_or(0) + 1
    }
}

/// What the batcher found at the head of the queue.
#[derive(Debug)]
pub enum Assembly {
    /// Nothing pending.
    Empty,
    Ready(Batch),
    /// The oldest pending entry cannot fit in any batch.
    Oversized(QueueEntry),
}

/// Builds batches bounded by entry count and encoded size.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    max_entries: usize,
    max_bytes: usize,
}

impl Batcher {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_bytes,
        }
    }

    /// Assemble the next batch from the queue head.
    pub fn build_next_batch(&self, queue: &DurableQueue) -> Result<Assembly> {
        let candidates = queue.peek_batch(self.max_entries)?;
        self.assemble(candidates)
    }

    /// Greedy FIFO fill: take entries in order until the next one would
    /// push the body over the byte limit.
    pub fn assemble(&self, candidates: Vec<QueueEntry>) -> Result<Assembly> {
        let mut entries = Vec::new();
        let mut body = vec![b'['];

        for entry in candidates.into_iter().take(self.max_entries) {
            let encoded = serde_json::to_vec(&entry.event)?;
            let separator = usize::from(!entries.is_empty());
            // Closing bracket included.
            let size = body.len() + separator + encoded.len() + 1;
            if size > self.max_bytes {
                if entries.is_empty() {
                    return Ok(Assembly::Oversized(entry));
                }
                trace!(size, max = self.max_bytes, "batch full by size");
                break;
            }
            if separator == 1 {
                body.push(b',');
            }
            body.extend_from_slice(&encoded);
            entries.push(entry);
        }

        if entries.is_empty() {
            return Ok(Assembly::Empty);
        }
        body.push(b']');
        Ok(Assembly::Ready(Batch { entries, body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use storage::{
        Event, EventKind, MemoryStore, Overflow, Param, ParamKey, SessionContext, SessionId,
    };

    fn session() -> SessionContext {
        SessionContext {
            session_id: SessionId::new(),
            ever_id: "6000000000000000007".into(),
            started_at: Utc::now(),
            app_version: None,
            sdk_version: "test".into(),
        }
    }

    fn event(name: &str, value: &str) -> Event {
        Event::new(
            EventKind::action(name),
            vec![Param::new(ParamKey::EventParam(1), value)],
            session(),
        )
    }

    fn queue_with(events: &[Event]) -> DurableQueue {
        let mut queue =
            DurableQueue::open(Box::new(MemoryStore::new()), 100, Overflow::DropOldest).unwrap();
        for e in events {
            queue.enqueue(e).unwrap();
        }
        queue
    }

    fn ready(assembly: Assembly) -> Batch {
        match assembly {
            Assembly::Ready(batch) => batch,
            other => panic!("expected a batch, got {other:?}"),
        }
    }

    fn encoded_len(event: &Event) -> usize {
        serde_json::to_vec(event).unwrap().len()
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let queue = queue_with(&[]);
        let batcher = Batcher::new(10, 10_000);
        assert!(matches!(
            batcher.build_next_batch(&queue).unwrap(),
            Assembly::Empty
        ));
    }

    #[test]
    fn count_limit_keeps_fifo_order() {
        let events = [event("a", "1"), event("b", "2"), event("c", "3")];
        let queue = queue_with(&events);

        let batch = ready(Batcher::new(2, 10_000).build_next_batch(&queue).unwrap());
        assert_eq!(batch.ids(), [events[0].id, events[1].id]);
        assert_eq!(batch.attempt(), 1);
    }

    #[test]
    fn body_is_a_json_array_of_events() {
        let events = [event("a", "1"), event("b", "2")];
        let queue = queue_with(&events);

        let batch = ready(Batcher::new(10, 10_000).build_next_batch(&queue).unwrap());
        let decoded: Vec<Event> = serde_json::from_slice(batch.body()).unwrap();
        assert_eq!(decoded, events);
        assert_eq!(batch.bytes(), batch.body().len());
    }

    #[test]
    fn byte_limit_cuts_batch_short() {
        let events = [event("a", "1"), event("b", "2"), event("c", "3")];
        let queue = queue_with(&events);

        // Room for exactly two events: brackets, one comma, two bodies.
        let limit = 2 + 1 + encoded_len(&events[0]) + encoded_len(&events[1]);
        let batch = ready(Batcher::new(10, limit).build_next_batch(&queue).unwrap());
        assert_eq!(batch.len(), 2);
        assert!(batch.bytes() <= limit);

        let batch = ready(Batcher::new(10, limit - 1).build_next_batch(&queue).unwrap());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn oversized_head_is_reported() {
        let big = event("big", &"x".repeat(500));
        let small = event("small", "1");
        let queue = queue_with(&[big.clone(), small]);

        let batcher = Batcher::new(10, 200);
        match batcher.build_next_batch(&queue).unwrap() {
            Assembly::Oversized(entry) => assert_eq!(entry.id(), big.id),
            other => panic!("expected oversized, got {other:?}"),
        }
    }

    #[test]
    fn oversized_entry_behind_head_waits_its_turn() {
        let small = event("small", "1");
        let big = event("big", &"x".repeat(500));
        let queue = queue_with(&[small.clone(), big]);

        let batch = ready(Batcher::new(10, 200).build_next_batch(&queue).unwrap());
        assert_eq!(batch.ids(), [small.id]);
    }
}
