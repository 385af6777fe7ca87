//! In-process transport with scripted outcomes.

use super::{DeliveryError, Transport};
use crate::Batch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use storage::EventId;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Reply {
    Respond(Result<(), DeliveryError>),
    Stall,
}

/// A batch seen by a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub ids: Vec<EventId>,
    pub bytes: usize,
    pub attempt: u32,
    pub at: Instant,
    /// `None` while the send is stalled.
    pub outcome: Option<Result<(), DeliveryError>>,
}

/// Records every batch and answers from a script.
///
/// Unscripted sends succeed. Useful for dry runs and for testing code that
/// embeds a tracker.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    script: Mutex<VecDeque<Reply>>,
    sent: Mutex<Vec<SentBatch>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next unscripted send with `error`.
    pub fn fail_next(&self, error: DeliveryError) {
        self.script.lock().push_back(Reply::Respond(Err(error)));
    }

    /// Never answer the next send. The caller's timeout decides.
    pub fn stall_next(&self) {
        self.script.lock().push_back(Reply::Stall);
    }

    pub fn sent(&self) -> Vec<SentBatch> {
        self.sent.lock().clone()
    }

    /// Ids from acknowledged batches, in send order.
    pub fn delivered(&self) -> Vec<EventId> {
        self.sent
            .lock()
            .iter()
            .filter(|b| matches!(b.outcome, Some(Ok(()))))
            .flat_map(|b| b.ids.iter().copied())
            .collect()
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(Reply::Respond(Ok(())));

        let outcome = match &reply {
            Reply::Respond(outcome) => Some(outcome.clone()),
            Reply::Stall => None,
        };
        self.sent.lock().push(SentBatch {
            ids: batch.ids(),
            bytes: batch.bytes(),
            attempt: batch.attempt(),
            at: Instant::now(),
            outcome,
        });

        match reply {
            Reply::Respond(outcome) => outcome,
            Reply::Stall => std::future::pending().await,
        }
    }
}
