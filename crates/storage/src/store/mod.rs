//! Persistence backends for the durable queue.
//!
//! A [`Store`] is an ordered, key-addressed table of events plus a
//! dead-letter log and a small key/value state area. It knows nothing about
//! capacity limits or retry rules; [`DurableQueue`](crate::DurableQueue)
//! layers those on top.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{DeadLetter, Event, EventId, QueueEntry, Result, Status};

/// Storage trait for queue persistence.
///
/// All multi-row operations must be atomic: either every listed id is
/// updated or none is.
pub trait Store: Send {
    /// Append an event as `pending`. Returns its sequence number, which is
    /// strictly greater than every sequence number handed out before.
    fn append(&mut self, event: &Event) -> Result<i64>;

    /// Fetch entries by id, in sequence order. Unknown ids are skipped.
    fn fetch(&self, ids: &[EventId]) -> Result<Vec<QueueEntry>>;

    /// Up to `limit` entries with `status`, oldest first.
    fn scan(&self, status: Status, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Set the status of the given entries. Returns how many were updated.
    fn set_status(&mut self, ids: &[EventId], status: Status) -> Result<usize>;

    /// Return entries to `pending` and count one failed attempt on each.
    fn record_failure(&mut self, ids: &[EventId]) -> Result<usize>;

    fn count(&self, status: Status) -> Result<usize>;

    /// Total stored entries, any status.
    fn len(&self) -> Result<usize>;

    /// Remove every entry with `status`. Returns how many were removed.
    fn remove_status(&mut self, status: Status) -> Result<usize>;

    /// Revert every `in_flight` entry to `pending`.
    fn reset_in_flight(&mut self) -> Result<usize>;

    /// Move entries out of the queue into the dead-letter log.
    fn bury(&mut self, entries: &[QueueEntry], reason: &str) -> Result<()>;

    /// Most recent dead letters first.
    fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>>;

    fn dead_letter_count(&self) -> Result<usize>;

    fn clear_dead_letters(&mut self) -> Result<usize>;

    fn get_state(&self, key: &str) -> Result<Option<String>>;

    fn put_state(&mut self, key: &str, value: &str) -> Result<()>;
}
