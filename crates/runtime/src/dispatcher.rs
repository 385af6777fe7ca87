//! Batch delivery with retry, backoff and dead-lettering.

use crate::batcher::{Assembly, Batch, Batcher, OVERSIZED};
use crate::notice::{Notice, Notifier};
use crate::transport::{DeliveryError, Transport};
use crate::{Backoff, Result, TrackerConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use storage::{DurableQueue, EventId, Status};
use tokio::sync::{Notify, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// How one dispatch step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing pending.
    Idle,
    Acknowledged { events: usize },
    /// The endpoint refused the batch; its entries were dead-lettered.
    Rejected { events: usize },
    /// Transient failure. Entries are pending again; wait `delay` first.
    Retry { attempt: u32, delay: Duration },
    /// Retries exhausted, or an entry too large to send.
    DeadLettered { events: usize },
    /// A shutdown deadline cut the send short; entries were released.
    Interrupted,
}

/// Counts from the final drain on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Events acknowledged while draining.
    pub delivered: usize,
    /// Events still stored for the next start.
    pub remaining: usize,
}

/// Runs the per-batch state machine against a [`Transport`].
///
/// At most one batch is outstanding: the next batch is assembled only after
/// the previous one resolves.
pub struct Dispatcher<T> {
    queue: Arc<Mutex<DurableQueue>>,
    transport: T,
    batcher: Batcher,
    backoff: Backoff,
    max_retry_attempts: u32,
    request_timeout: Duration,
    notifier: Notifier,
}

enum Stop {
    Drained,
    Shutdown,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(queue: Arc<Mutex<DurableQueue>>, transport: T, config: &TrackerConfig) -> Self {
        Self {
            queue,
            transport,
            batcher: Batcher::new(config.max_batch_size, config.max_batch_bytes),
            backoff: Backoff::from_config(config),
            max_retry_attempts: config.max_retry_attempts,
            request_timeout: config.request_timeout(),
            notifier: Notifier::default(),
        }
    }

    pub(crate) fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Assemble, send and resolve one batch.
    pub async fn step(&self) -> Result<Resolution> {
        self.step_until(None).await
    }

    async fn step_until(&self, deadline: Option<Instant>) -> Result<Resolution> {
        let batch = match self.assemble()? {
            Some(batch) => batch,
            None => return Ok(Resolution::Idle),
        };
        debug!(
            events = batch.len(),
            bytes = batch.bytes(),
            attempt = batch.attempt(),
            "sending batch"
        );

        let resolution = self.deliver(&batch, deadline).await;
        if let Err(e) = &resolution {
            // In-flight entries are skipped by every later batch until a restart.
            warn!(error = %e, events = batch.len(), "releasing batch after storage error");
            if let Err(e) = self.queue.lock().release(&batch.ids()) {
                warn!(error = %e, "failed to release batch");
            }
        }
        resolution
    }

    async fn deliver(&self, batch: &Batch, deadline: Option<Instant>) -> Result<Resolution> {
        let send = tokio::time::timeout(self.request_timeout, self.transport.send(batch));
        let sent = match deadline {
            None => send.await,
            Some(deadline) => match tokio::time::timeout_at(deadline, send).await {
                Ok(sent) => sent,
                Err(_) => {
                    self.queue.lock().release(&batch.ids())?;
                    debug!(events = batch.len(), "send interrupted by shutdown");
                    return Ok(Resolution::Interrupted);
                }
            },
        };
        let outcome = sent.unwrap_or_else(|_| {
            Err(DeliveryError::Transient(format!(
                "no response within {:?}",
                self.request_timeout
            )))
        });
        self.resolve(batch, outcome)
    }

    /// Next sendable batch, already marked in flight. Oversized entries at
    /// the head are dead-lettered on the way.
    ///
    /// Assembly and marking share one lock guard so a concurrent eviction or
    /// opt-out cannot remove an entry between the two.
    fn assemble(&self) -> Result<Option<Batch>> {
        loop {
            let mut queue = self.queue.lock();
            let id = match self.batcher.build_next_batch(&queue)? {
                Assembly::Empty => return Ok(None),
                Assembly::Ready(batch) => {
                    queue.mark_in_flight(&batch.ids())?;
                    return Ok(Some(batch));
                }
                Assembly::Oversized(entry) => entry.id(),
            };
            queue.mark_failed(&[id], true, OVERSIZED)?;
            drop(queue);
            self.notifier.emit(Notice::DeadLettered {
                events: vec![id],
                reason: OVERSIZED.to_string(),
            });
        }
    }

    fn resolve(
        &self,
        batch: &Batch,
        outcome: std::result::Result<(), DeliveryError>,
    ) -> Result<Resolution> {
        let ids = batch.ids();
        let events = ids.len();

        match outcome {
            Ok(()) => {
                self.queue.lock().mark_delivered(&ids)?;
                debug!(events, "batch acknowledged");
                self.notifier.emit(Notice::Delivered {
                    events,
                    bytes: batch.bytes(),
                });
                Ok(Resolution::Acknowledged { events })
            }
            Err(DeliveryError::Permanent(error)) => {
                let reason = format!("rejected: {error}");
                self.bury(&ids, reason)?;
                Ok(Resolution::Rejected { events })
            }
            Err(DeliveryError::Transient(error)) => {
                let entries = self.queue.lock().mark_failed(&ids, false, &error)?;
                let attempt = entries.iter().map(|e| e.attempts).max().unwrap_or(1);

                if attempt > self.max_retry_attempts {
                    let reason = format!("retries exhausted after {attempt} attempts: {error}");
                    self.bury(&ids, reason)?;
                    return Ok(Resolution::DeadLettered { events });
                }

                let delay = self.backoff.delay(attempt);
                warn!(events, attempt, ?delay, %error, "delivery failed, will retry");
                self.notifier.emit(Notice::RetryScheduled {
                    events,
                    attempt,
                    delay,
                    error,
                });
                Ok(Resolution::Retry { attempt, delay })
            }
        }
    }

    fn bury(&self, ids: &[EventId], reason: String) -> Result<()> {
        self.queue.lock().mark_failed(ids, true, &reason)?;
        self.notifier.emit(Notice::DeadLettered {
            events: ids.to_vec(),
            reason,
        });
        Ok(())
    }

    fn cleanup(&self) {
        match self.queue.lock().purge_delivered() {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "removed delivered entries"),
            Err(e) => warn!(error = %e, "failed to remove delivered entries"),
        }
    }

    /// Send batches until the queue is empty, backing off on transient
    /// failures. Returns early if `shutdown` fires during a backoff wait.
    async fn drain(&self, shutdown: &mut watch::Receiver<bool>) -> Stop {
        let stop = loop {
            match self.step().await {
                Ok(Resolution::Idle) => break Stop::Drained,
                Ok(Resolution::Retry { delay, .. }) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stopped(shutdown) => break Stop::Shutdown,
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "dispatch step failed");
                    break Stop::Drained;
                }
            }
        };
        self.cleanup();
        stop
    }

    /// Final best-effort drain bounded by `deadline`.
    async fn drain_until(&self, deadline: Instant) -> usize {
        let mut delivered = 0;
        while Instant::now() < deadline {
            match self.step_until(Some(deadline)).await {
                Ok(Resolution::Acknowledged { events }) => delivered += events,
                Ok(Resolution::Retry { delay, .. }) => {
                    if Instant::now() + delay >= deadline {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                }
                Ok(Resolution::Rejected { .. } | Resolution::DeadLettered { .. }) => {}
                Ok(Resolution::Idle | Resolution::Interrupted) => break,
                Err(e) => {
                    warn!(error = %e, "dispatch step failed during shutdown");
                    break;
                }
            }
        }
        self.cleanup();
        delivered
    }

    fn remaining(&self) -> usize {
        let queue = self.queue.lock();
        [Status::Pending, Status::InFlight]
            .into_iter()
            .map(|status| queue.count(status).unwrap_or(0))
            .sum()
    }

    /// Background loop: drain on every tick of `flush_interval` and on every
    /// `wake`, until `shutdown` flips to `true`. Then drain once more for at
    /// most `shutdown_timeout`.
    #[instrument(skip_all)]
    pub async fn run(
        self,
        wake: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
        flush_interval: Duration,
        shutdown_timeout: Duration,
    ) -> DrainReport {
        info!(?flush_interval, "dispatcher started");
        let first_tick = Instant::now() + flush_interval;
        let mut ticker = tokio::time::interval_at(first_tick, flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {}
                _ = wake.notified() => {}
            }
            if let Stop::Shutdown = self.drain(&mut shutdown).await {
                break;
            }
        }

        let delivered = self.drain_until(Instant::now() + shutdown_timeout).await;
        let report = DrainReport {
            delivered,
            remaining: self.remaining(),
        };
        info!(
            delivered = report.delivered,
            remaining = report.remaining,
            "dispatcher stopped"
        );
        report
    }
}

/// Resolves once the shutdown flag is set or every sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
