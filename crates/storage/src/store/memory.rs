//! Volatile in-process store. Contents are lost when the process exits.

use super::Store;
use crate::{DeadLetter, Event, EventId, QueueEntry, Result, Status};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};

/// In-memory queue store keyed by sequence number.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<i64, QueueEntry>,
    index: HashMap<EventId, i64>,
    next_seq: i64,
    dead_letters: Vec<DeadLetter>,
    state: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&mut self, ids: &[EventId], mut f: F) -> usize
    where
        F: FnMut(&mut QueueEntry),
    {
        let mut updated = 0;
        for id in ids {
            let Some(seq) = self.index.get(id) else {
                continue;
            };
            if let Some(entry) = self.entries.get_mut(seq) {
                f(entry);
                updated += 1;
            }
        }
        updated
    }
}

impl Store for MemoryStore {
    fn append(&mut self, event: &Event) -> Result<i64> {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.index.insert(event.id, seq);
        self.entries.insert(
            seq,
            QueueEntry {
                seq,
                event: event.clone(),
                status: Status::Pending,
                attempts: 0,
            },
        );
        Ok(seq)
    }

    fn fetch(&self, ids: &[EventId]) -> Result<Vec<QueueEntry>> {
        let mut found: Vec<QueueEntry> = ids
            .iter()
            .filter_map(|id| self.index.get(id))
            .filter_map(|seq| self.entries.get(seq))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.seq);
        Ok(found)
    }

    fn scan(&self, status: Status, limit: usize) -> Result<Vec<QueueEntry>> {
        Ok(self
            .entries
            .values()
            .filter(|e| e.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    fn set_status(&mut self, ids: &[EventId], status: Status) -> Result<usize> {
        Ok(self.update(ids, |e| e.status = status))
    }

    fn record_failure(&mut self, ids: &[EventId]) -> Result<usize> {
        Ok(self.update(ids, |e| {
            e.status = Status::Pending;
            e.attempts += 1;
        }))
    }

    fn count(&self, status: Status) -> Result<usize> {
        Ok(self.entries.values().filter(|e| e.status == status).count())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    fn remove_status(&mut self, status: Status) -> Result<usize> {
        let before = self.entries.len();
        let index = &mut self.index;
        self.entries.retain(|_, e| {
            let keep = e.status != status;
            if !keep {
                index.remove(&e.event.id);
            }
            keep
        });
        Ok(before - self.entries.len())
    }

    fn reset_in_flight(&mut self) -> Result<usize> {
        let mut reset = 0;
        for entry in self.entries.values_mut() {
            if entry.status == Status::InFlight {
                entry.status = Status::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }

    fn bury(&mut self, entries: &[QueueEntry], reason: &str) -> Result<()> {
        let failed_at = Utc::now();
        for entry in entries {
            if let Some(seq) = self.index.remove(&entry.id()) {
                self.entries.remove(&seq);
            }
            self.dead_letters.push(DeadLetter {
                event: entry.event.clone(),
                attempts: entry.attempts,
                reason: reason.to_string(),
                failed_at,
            });
        }
        Ok(())
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        Ok(self.dead_letters.iter().rev().take(limit).cloned().collect())
    }

    fn dead_letter_count(&self) -> Result<usize> {
        Ok(self.dead_letters.len())
    }

    fn clear_dead_letters(&mut self) -> Result<usize> {
        let n = self.dead_letters.len();
        self.dead_letters.clear();
        Ok(n)
    }

    fn get_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.get(key).cloned())
    }

    fn put_state(&mut self, key: &str, value: &str) -> Result<()> {
        self.state.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
