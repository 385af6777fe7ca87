//! Durable FIFO queue with capacity bounds and a dead-letter log.

use crate::store::Store;
use crate::{DeadLetter, Event, EventId, QueueEntry, QueueStats, Result, Status};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Dead-letter reason for entries evicted to make room.
pub const EVICTED: &str = "evicted: queue at capacity";

/// What to do when the queue is full and no delivered entries can be purged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    /// Evict the oldest pending entry to the dead-letter log.
    #[default]
    DropOldest,
    /// Refuse the new event.
    RejectNew,
}

/// Result of offering an event to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The event was stored. `evicted` lists entries dropped to make room.
    Accepted {
        entry: QueueEntry,
        evicted: Vec<EventId>,
    },
    /// The queue is full and the overflow policy refused the event.
    Rejected { limit: usize },
}

/// The durable queue.
///
/// Entries are offered oldest first and never reordered. Entries found
/// `in_flight` when the queue is opened revert to `pending`, since their
/// delivery was never acknowledged.
pub struct DurableQueue {
    store: Box<dyn Store>,
    max_entries: usize,
    overflow: Overflow,
}

impl DurableQueue {
    /// Open a queue over `store`, recovering unacknowledged entries.
    pub fn open(mut store: Box<dyn Store>, max_entries: usize, overflow: Overflow) -> Result<Self> {
        let recovered = store.reset_in_flight()?;
        if recovered > 0 {
            info!(recovered, "re-queued unacknowledged entries");
        }
        Ok(Self {
            store,
            max_entries: max_entries.max(1),
            overflow,
        })
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Persist an event as `pending`.
    pub fn enqueue(&mut self, event: &Event) -> Result<Admission> {
        let Some(evicted) = self.make_room()? else {
            warn!(event_id = %event.id, limit = self.max_entries, "queue full, rejecting event");
            return Ok(Admission::Rejected {
                limit: self.max_entries,
            });
        };

        let seq = self.store.append(event)?;
        debug!(event_id = %event.id, seq, "enqueued event");
        Ok(Admission::Accepted {
            entry: QueueEntry {
                seq,
                event: event.clone(),
                status: Status::Pending,
                attempts: 0,
            },
            evicted,
        })
    }

    /// Ensure one free slot. `None` means the new event must be rejected.
    fn make_room(&mut self) -> Result<Option<Vec<EventId>>> {
        let stored = self.store.len()?;
        if stored < self.max_entries {
            return Ok(Some(Vec::new()));
        }

        let purged = self.store.remove_status(Status::Delivered)?;
        if purged > 0 {
            debug!(purged, "purged delivered entries to make room");
        }
        let stored = stored.saturating_sub(purged);
        if stored < self.max_entries {
            return Ok(Some(Vec::new()));
        }

        match self.overflow {
            Overflow::RejectNew => Ok(None),
            Overflow::DropOldest => {
                let excess = stored + 1 - self.max_entries;
                let victims = self.store.scan(Status::Pending, excess)?;
                if victims.len() < excess {
                    // Everything else is in flight; nothing may be dropped.
                    return Ok(None);
                }
                self.store.bury(&victims, EVICTED)?;
                let ids: Vec<EventId> = victims.iter().map(QueueEntry::id).collect();
                warn!(
                    evicted = ids.len(),
                    limit = self.max_entries,
                    "queue full, evicted oldest entries"
                );
                Ok(Some(ids))
            }
        }
    }

    /// Up to `max` pending entries, oldest first.
    pub fn peek_batch(&self, max: usize) -> Result<Vec<QueueEntry>> {
        self.store.scan(Status::Pending, max)
    }

    pub fn mark_in_flight(&mut self, ids: &[EventId]) -> Result<()> {
        self.store.set_status(ids, Status::InFlight)?;
        Ok(())
    }

    pub fn mark_delivered(&mut self, ids: &[EventId]) -> Result<()> {
        self.store.set_status(ids, Status::Delivered)?;
        Ok(())
    }

    /// Record a failed delivery.
    ///
    /// Transient failures return the entries to `pending` with one more
    /// attempt counted. Permanent failures move them to the dead-letter log.
    /// Returns the affected entries as they are after the update.
    pub fn mark_failed(
        &mut self,
        ids: &[EventId],
        permanent: bool,
        reason: &str,
    ) -> Result<Vec<QueueEntry>> {
        if permanent {
            let entries = self.store.fetch(ids)?;
            self.store.bury(&entries, reason)?;
            warn!(count = entries.len(), reason, "dead-lettered entries");
            Ok(entries)
        } else {
            self.store.record_failure(ids)?;
            self.store.fetch(ids)
        }
    }

    /// Return in-flight entries to `pending` without counting an attempt.
    pub fn release(&mut self, ids: &[EventId]) -> Result<()> {
        self.store.set_status(ids, Status::Pending)?;
        Ok(())
    }

    /// Remove delivered entries.
    pub fn purge_delivered(&mut self) -> Result<usize> {
        self.store.remove_status(Status::Delivered)
    }

    /// Drop every pending entry without delivering it.
    pub fn discard_pending(&mut self) -> Result<usize> {
        self.store.remove_status(Status::Pending)
    }

    pub fn count(&self, status: Status) -> Result<usize> {
        self.store.count(status)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.store.count(Status::Pending)?,
            in_flight: self.store.count(Status::InFlight)?,
            delivered: self.store.count(Status::Delivered)?,
            dead_letters: self.store.dead_letter_count()?,
        })
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        self.store.dead_letters(limit)
    }

    pub fn clear_dead_letters(&mut self) -> Result<usize> {
        self.store.clear_dead_letters()
    }

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        self.store.get_state(key)
    }

    pub fn put_state(&mut self, key: &str, value: &str) -> Result<()> {
        self.store.put_state(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventKind, MemoryStore, Param, ParamKey, SessionContext, SessionId, SqliteStore};
    use chrono::Utc;

    fn session() -> SessionContext {
        SessionContext {
            session_id: SessionId::new(),
            ever_id: "6000000000000000001".into(),
            started_at: Utc::now(),
            app_version: None,
            sdk_version: "test".into(),
        }
    }

    fn event(name: &str) -> Event {
        Event::new(
            EventKind::page(name),
            vec![Param::new(ParamKey::PageCategory(1), name)],
            session(),
        )
    }

    fn accepted(admission: Admission) -> (QueueEntry, Vec<EventId>) {
        match admission {
            Admission::Accepted { entry, evicted } => (entry, evicted),
            Admission::Rejected { limit } => panic!("unexpected rejection at {limit}"),
        }
    }

    fn names(entries: &[QueueEntry]) -> Vec<String> {
        entries.iter().map(|e| e.event.kind.name().to_string()).collect()
    }

    fn queues(max: usize, overflow: Overflow) -> Vec<DurableQueue> {
        vec![
            DurableQueue::open(Box::new(SqliteStore::in_memory().unwrap()), max, overflow).unwrap(),
            DurableQueue::open(Box::new(MemoryStore::new()), max, overflow).unwrap(),
        ]
    }

    #[test]
    fn peek_is_fifo_and_skips_non_pending() {
        for mut q in queues(10, Overflow::DropOldest) {
            let a = accepted(q.enqueue(&event("a")).unwrap()).0;
            accepted(q.enqueue(&event("b")).unwrap());
            accepted(q.enqueue(&event("c")).unwrap());

            assert_eq!(names(&q.peek_batch(10).unwrap()), ["a", "b", "c"]);
            assert_eq!(names(&q.peek_batch(2).unwrap()), ["a", "b"]);

            q.mark_in_flight(&[a.id()]).unwrap();
            assert_eq!(names(&q.peek_batch(10).unwrap()), ["b", "c"]);
            assert_eq!(q.count(Status::InFlight).unwrap(), 1);
        }
    }

    #[test]
    fn transient_failure_counts_attempt_and_requeues_in_place() {
        for mut q in queues(10, Overflow::DropOldest) {
            let a = accepted(q.enqueue(&event("a")).unwrap()).0;
            accepted(q.enqueue(&event("b")).unwrap());

            q.mark_in_flight(&[a.id()]).unwrap();
            let after = q.mark_failed(&[a.id()], false, "timeout").unwrap();
            assert_eq!(after.len(), 1);
            assert_eq!(after[0].attempts, 1);
            assert_eq!(after[0].status, Status::Pending);

            // Still ahead of b.
            assert_eq!(names(&q.peek_batch(10).unwrap()), ["a", "b"]);
        }
    }

    #[test]
    fn permanent_failure_moves_to_dead_letters() {
        for mut q in queues(10, Overflow::DropOldest) {
            let a = accepted(q.enqueue(&event("a")).unwrap()).0;
            q.mark_in_flight(&[a.id()]).unwrap();
            q.mark_failed(&[a.id()], true, "rejected: 400").unwrap();

            let stats = q.stats().unwrap();
            assert_eq!(stats.stored(), 0);
            assert_eq!(stats.dead_letters, 1);

            let dead = q.dead_letters(10).unwrap();
            assert_eq!(dead[0].event.id, a.id());
            assert_eq!(dead[0].reason, "rejected: 400");

            assert_eq!(q.clear_dead_letters().unwrap(), 1);
            assert_eq!(q.stats().unwrap().dead_letters, 0);
        }
    }

    #[test]
    fn delivered_entries_are_purged_before_dropping_pending() {
        for mut q in queues(2, Overflow::DropOldest) {
            let a = accepted(q.enqueue(&event("a")).unwrap()).0;
            accepted(q.enqueue(&event("b")).unwrap());
            q.mark_delivered(&[a.id()]).unwrap();

            let (_, evicted) = accepted(q.enqueue(&event("c")).unwrap());
            assert!(evicted.is_empty());
            assert_eq!(names(&q.peek_batch(10).unwrap()), ["b", "c"]);
            assert_eq!(q.stats().unwrap().dead_letters, 0);
        }
    }

    #[test]
    fn drop_oldest_never_exceeds_capacity() {
        for mut q in queues(3, Overflow::DropOldest) {
            let first = accepted(q.enqueue(&event("e0")).unwrap()).0;
            for i in 1..3 {
                accepted(q.enqueue(&event(&format!("e{i}"))).unwrap());
            }

            let (_, evicted) = accepted(q.enqueue(&event("e3")).unwrap());
            assert_eq!(evicted, vec![first.id()]);
            assert_eq!(q.stats().unwrap().stored(), 3);
            assert_eq!(names(&q.peek_batch(10).unwrap()), ["e1", "e2", "e3"]);

            let dead = q.dead_letters(10).unwrap();
            assert_eq!(dead.len(), 1);
            assert_eq!(dead[0].reason, EVICTED);
        }
    }

    #[test]
    fn reject_new_keeps_existing_entries() {
        for mut q in queues(2, Overflow::RejectNew) {
            accepted(q.enqueue(&event("a")).unwrap());
            accepted(q.enqueue(&event("b")).unwrap());

            assert_eq!(
                q.enqueue(&event("c")).unwrap(),
                Admission::Rejected { limit: 2 }
            );
            assert_eq!(names(&q.peek_batch(10).unwrap()), ["a", "b"]);
        }
    }

    #[test]
    fn full_of_in_flight_entries_rejects_even_with_drop_oldest() {
        for mut q in queues(1, Overflow::DropOldest) {
            let a = accepted(q.enqueue(&event("a")).unwrap()).0;
            q.mark_in_flight(&[a.id()]).unwrap();

            assert!(matches!(
                q.enqueue(&event("b")).unwrap(),
                Admission::Rejected { .. }
            ));
        }
    }

    #[test]
    fn release_does_not_count_an_attempt() {
        for mut q in queues(10, Overflow::DropOldest) {
            let a = accepted(q.enqueue(&event("a")).unwrap()).0;
            q.mark_in_flight(&[a.id()]).unwrap();
            q.release(&[a.id()]).unwrap();

            let pending = q.peek_batch(10).unwrap();
            assert_eq!(pending[0].attempts, 0);
        }
    }

    #[test]
    fn discard_pending_leaves_in_flight_alone() {
        for mut q in queues(10, Overflow::DropOldest) {
            let a = accepted(q.enqueue(&event("a")).unwrap()).0;
            accepted(q.enqueue(&event("b")).unwrap());
            q.mark_in_flight(&[a.id()]).unwrap();

            assert_eq!(q.discard_pending().unwrap(), 1);
            assert_eq!(q.count(Status::InFlight).unwrap(), 1);
            assert_eq!(q.count(Status::Pending).unwrap(), 0);
        }
    }

    #[test]
    fn state_round_trip() {
        for mut q in queues(10, Overflow::DropOldest) {
            assert_eq!(q.get_state("opt_out").unwrap(), None);
            q.put_state("opt_out", "true").unwrap();
            q.put_state("opt_out", "false").unwrap();
            assert_eq!(q.get_state("opt_out").unwrap().as_deref(), Some("false"));
        }
    }

    fn sqlite_queue(path: &std::path::Path) -> DurableQueue {
        let store = SqliteStore::open(path).unwrap();
        DurableQueue::open(Box::new(store), 10, Overflow::DropOldest).unwrap()
    }

    #[test]
    fn in_flight_entries_are_recovered_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let (a, b) = {
            let mut q = sqlite_queue(&path);
            let a = accepted(q.enqueue(&event("a")).unwrap()).0;
            let b = accepted(q.enqueue(&event("b")).unwrap()).0;
            q.mark_in_flight(&[a.id(), b.id()]).unwrap();
            q.put_state("ever_id", "6123").unwrap();
            (a, b)
        };

        let q = sqlite_queue(&path);
        assert_eq!(q.count(Status::InFlight).unwrap(), 0);

        let pending = q.peek_batch(10).unwrap();
        let ids: Vec<EventId> = pending.iter().map(QueueEntry::id).collect();
        assert_eq!(ids, [a.id(), b.id()]);
        assert_eq!(pending[0].event, a.event);
        assert_eq!(q.get_state("ever_id").unwrap().as_deref(), Some("6123"));
    }

    #[test]
    fn sequence_keeps_growing_after_deletes() {
        let store = SqliteStore::in_memory().unwrap();
        let mut q = DurableQueue::open(Box::new(store), 10, Overflow::DropOldest).unwrap();
        let a = accepted(q.enqueue(&event("a")).unwrap()).0;
        q.mark_delivered(&[a.id()]).unwrap();
        q.purge_delivered().unwrap();

        let b = accepted(q.enqueue(&event("b")).unwrap()).0;
        assert!(b.seq > a.seq);
    }
}
