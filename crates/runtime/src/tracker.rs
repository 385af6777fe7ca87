//! The client facade.

use crate::dispatcher::{Dispatcher, DrainReport};
use crate::notice::{Notice, NoticeHook, Notifier};
use crate::session::{OPT_OUT_KEY, SessionManager};
use crate::transport::Transport;
use crate::{Error, Result, TrackerConfig};
use parking_lot::Mutex;
use policy::{EventDraft, Policy};
use std::sync::Arc;
use storage::{
    Admission, DeadLetter, DurableQueue, Event, EventId, EventKind, MemoryStore, ParamKey,
    QueueStats, SessionContext, Status, Store,
};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// What happened to a tracked event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracked {
    /// Persisted and waiting for delivery. `evicted` counts older entries
    /// dropped to make room.
    Queued { id: EventId, evicted: usize },
    /// The queue is full and configured to refuse new events.
    Rejected { limit: usize },
    /// Tracking is disabled; the event was dropped.
    OptedOut,
}

/// Builder for [`Tracker`].
pub struct TrackerBuilder {
    config: TrackerConfig,
    policy: Policy,
    store: Option<Box<dyn Store>>,
    hook: Option<NoticeHook>,
}

impl TrackerBuilder {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            policy: Policy::default(),
            store: None,
            hook: None,
        }
    }

    /// Parameter rules applied to every tracked event.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Where the queue lives. Defaults to a [`MemoryStore`].
    pub fn store(mut self, store: impl Store + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Observe delivery outcomes and capacity events.
    pub fn on_notice(mut self, hook: impl Fn(&Notice) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Open the queue, load the session and spawn the dispatcher.
    ///
    /// Must be called within a tokio runtime.
    #[instrument(skip_all)]
    pub fn start<T: Transport + 'static>(self, transport: T) -> Result<Tracker> {
        let config = self.config;
        config.validate()?;

        let store = self.store.unwrap_or_else(|| {
            warn!("no store configured, queued events will not survive a restart");
            Box::new(MemoryStore::new())
        });
        let mut queue = DurableQueue::open(store, config.max_queue_entries, config.overflow)?;
        let session = SessionManager::load(&mut queue, &config)?;
        let backlog = queue.count(Status::Pending)?;
        let queue = Arc::new(Mutex::new(queue));

        let notifier = Notifier::new(self.hook);
        let wake = Arc::new(Notify::new());
        if backlog > 0 {
            debug!(backlog, "sending backlog from previous run");
            wake.notify_one();
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher =
            Dispatcher::new(queue.clone(), transport, &config).with_notifier(notifier.clone());
        let worker = tokio::spawn(dispatcher.run(
            wake.clone(),
            shutdown_rx,
            config.flush_interval(),
            config.shutdown_timeout(),
        ));

        let context = session.peek();
        info!(
            session_id = %context.session_id,
            ever_id = %context.ever_id,
            opted_out = session.is_opted_out(),
            "tracker started"
        );

        Ok(Tracker {
            queue,
            session,
            policy: self.policy,
            notifier,
            wake,
            flush_threshold: config.flush_threshold.max(1),
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// Records events durably and delivers them in the background.
///
/// `track` and friends are synchronous: they validate, persist and return.
/// Delivery happens on a dispatcher task spawned by
/// [`TrackerBuilder::start`].
pub struct Tracker {
    queue: Arc<Mutex<DurableQueue>>,
    session: SessionManager,
    policy: Policy,
    notifier: Notifier,
    wake: Arc<Notify>,
    flush_threshold: usize,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<DrainReport>>>,
}

impl Tracker {
    pub fn builder(config: TrackerConfig) -> TrackerBuilder {
        TrackerBuilder::new(config)
    }

    /// Track an event of `kind` with ordered parameters.
    pub fn track<I, K, V>(&self, kind: EventKind, params: I) -> Result<Tracked>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<ParamKey>,
        V: Into<String>,
    {
        self.track_draft(EventDraft::new(kind).params(params))
    }

    /// Track a page view.
    pub fn track_page<I, K, V>(&self, name: impl Into<String>, params: I) -> Result<Tracked>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<ParamKey>,
        V: Into<String>,
    {
        self.track(EventKind::page(name), params)
    }

    pub fn track_draft(&self, draft: EventDraft) -> Result<Tracked> {
        self.ensure_running()?;
        if self.session.is_opted_out() {
            debug!(name = draft.kind.name(), "opted out, dropping event");
            return Ok(Tracked::OptedOut);
        }
        let event = self.policy.admit(draft, &self.session.current_context())?;
        self.enqueue(event)
    }

    /// Persist an already built event.
    ///
    /// Used to offer an event again after [`Error::Persistence`] handed it
    /// back.
    pub fn enqueue(&self, event: Event) -> Result<Tracked> {
        self.ensure_running()?;

        let (admission, pending) = {
            let mut queue = self.queue.lock();
            // Checked under the queue lock: `set_opt_out` flips the flag and
            // discards pending entries under the same guard.
            if self.session.is_opted_out() {
                return Ok(Tracked::OptedOut);
            }
            match queue.enqueue(&event) {
                Ok(admission) => (admission, queue.count(Status::Pending).unwrap_or(0)),
                Err(source) => {
                    return Err(Error::Persistence {
                        event: Box::new(event),
                        source,
                    });
                }
            }
        };

        match admission {
            Admission::Accepted { entry, evicted } => {
                let evicted_count = evicted.len();
                if !evicted.is_empty() {
                    self.notifier.emit(Notice::CapacityExceeded {
                        limit: self.capacity(),
                        evicted,
                        rejected: None,
                    });
                }
                if pending >= self.flush_threshold {
                    debug!(pending, "flush threshold reached");
                    self.wake.notify_one();
                }
                Ok(Tracked::Queued {
                    id: entry.id(),
                    evicted: evicted_count,
                })
            }
            Admission::Rejected { limit } => {
                self.notifier.emit(Notice::CapacityExceeded {
                    limit,
                    evicted: Vec::new(),
                    rejected: Some(event.id),
                });
                Ok(Tracked::Rejected { limit })
            }
        }
    }

    /// Ask the dispatcher to send what is pending now.
    pub fn flush(&self) {
        if self.ensure_running().is_ok() {
            self.wake.notify_one();
        }
    }

    /// Enable or disable tracking. Opting out discards pending events.
    /// The choice persists across restarts.
    pub fn set_opt_out(&self, opt_out: bool) -> Result<()> {
        self.ensure_running()?;
        let mut queue = self.queue.lock();
        queue.put_state(OPT_OUT_KEY, if opt_out { "true" } else { "false" })?;
        self.session.set_opt_out(opt_out);
        if opt_out {
            let discarded = queue.discard_pending()?;
            info!(discarded, "opted out of tracking");
        } else {
            info!("opted in to tracking");
        }
        Ok(())
    }

    pub fn is_opted_out(&self) -> bool {
        self.session.is_opted_out()
    }

    /// The host app came to the foreground. May start a new session.
    pub fn on_foreground(&self) {
        if self.session.on_foreground() {
            debug!("new session after background timeout");
        }
    }

    /// The host app went to the background. Sends what is pending.
    pub fn on_background(&self) {
        self.session.on_background();
        self.flush();
    }

    pub fn session(&self) -> SessionContext {
        self.session.peek()
    }

    pub fn stats(&self) -> Result<QueueStats> {
        Ok(self.queue.lock().stats()?)
    }

    /// Most recent dead letters first.
    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        Ok(self.queue.lock().dead_letters(limit)?)
    }

    fn capacity(&self) -> usize {
        self.queue.lock().capacity()
    }

    fn ensure_running(&self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            return Err(Error::Stopped);
        }
        Ok(())
    }

    /// Stop the dispatcher after a bounded final drain.
    ///
    /// Events that could not be sent in time stay persisted and go out on
    /// the next start. Every later call on this tracker fails with
    /// [`Error::Stopped`].
    #[instrument(skip_all)]
    pub async fn shutdown(&self) -> Result<DrainReport> {
        self.shutdown_tx.send_replace(true);
        let worker = self.worker.lock().take().ok_or(Error::Stopped)?;
        let report = worker.await.map_err(|e| Error::Worker(e.to_string()))?;
        self.session.end();
        Ok(report)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        // The dispatcher drains on its own once signalled.
        self.shutdown_tx.send_replace(true);
    }
}
