//! Behaviour when the queue's backing store fails part way.

use chrono::Utc;
use parking_lot::Mutex;
use runtime::{Dispatcher, Error, MemoryTransport, Resolution, Tracked, Tracker, TrackerConfig};
use std::sync::Arc;
use storage::{
    DeadLetter, DurableQueue, Event, EventId, EventKind, MemoryStore, Overflow, ParamKey,
    QueueEntry, SessionContext, SessionId, Status, Store,
};

/// How many upcoming calls of each kind should fail.
#[derive(Debug, Default)]
struct Faults {
    append: usize,
    mark_delivered: usize,
}

/// A [`MemoryStore`] that fails on demand.
struct FlakyStore {
    inner: MemoryStore,
    faults: Arc<Mutex<Faults>>,
}

impl FlakyStore {
    fn new() -> (Self, Arc<Mutex<Faults>>) {
        let faults = Arc::new(Mutex::new(Faults::default()));
        let store = Self {
            inner: MemoryStore::new(),
            faults: faults.clone(),
        };
        (store, faults)
    }
}

fn trip(counter: &mut usize) -> storage::Result<()> {
    if *counter == 0 {
        return Ok(());
    }
    *counter -= 1;
    Err(storage::Error::Corrupt("disk hiccup".into()))
}

impl Store for FlakyStore {
    fn append(&mut self, event: &Event) -> storage::Result<i64> {
        trip(&mut self.faults.lock().append)?;
        self.inner.append(event)
    }

    fn fetch(&self, ids: &[EventId]) -> storage::Result<Vec<QueueEntry>> {
        self.inner.fetch(ids)
    }

    fn scan(&self, status: Status, limit: usize) -> storage::Result<Vec<QueueEntry>> {
        self.inner.scan(status, limit)
    }

    fn set_status(&mut self, ids: &[EventId], status: Status) -> storage::Result<usize> {
        if status == Status::Delivered {
            trip(&mut self.faults.lock().mark_delivered)?;
        }
        self.inner.set_status(ids, status)
    }

    fn record_failure(&mut self, ids: &[EventId]) -> storage::Result<usize> {
        self.inner.record_failure(ids)
    }

    fn count(&self, status: Status) -> storage::Result<usize> {
        self.inner.count(status)
    }

    fn len(&self) -> storage::Result<usize> {
        self.inner.len()
    }

    fn remove_status(&mut self, status: Status) -> storage::Result<usize> {
        self.inner.remove_status(status)
    }

    fn reset_in_flight(&mut self) -> storage::Result<usize> {
        self.inner.reset_in_flight()
    }

    fn bury(&mut self, entries: &[QueueEntry], reason: &str) -> storage::Result<()> {
        self.inner.bury(entries, reason)
    }

    fn dead_letters(&self, limit: usize) -> storage::Result<Vec<DeadLetter>> {
        self.inner.dead_letters(limit)
    }

    fn dead_letter_count(&self) -> storage::Result<usize> {
        self.inner.dead_letter_count()
    }

    fn clear_dead_letters(&mut self) -> storage::Result<usize> {
        self.inner.clear_dead_letters()
    }

    fn get_state(&self, key: &str) -> storage::Result<Option<String>> {
        self.inner.get_state(key)
    }

    fn put_state(&mut self, key: &str, value: &str) -> storage::Result<()> {
        self.inner.put_state(key, value)
    }
}

fn config() -> TrackerConfig {
    TrackerConfig {
        endpoint: "https://collect.example.com".into(),
        track_ids: vec!["123".into()],
        max_batch_size: 1,
        flush_interval_ms: 60_000,
        flush_threshold: 100,
        backoff_jitter: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn storage_error_after_send_releases_the_batch() {
    let session = SessionContext {
        session_id: SessionId::new(),
        ever_id: "6000000000000000007".into(),
        started_at: Utc::now(),
        app_version: None,
        sdk_version: "test".into(),
    };
    let a = Event::new(EventKind::action("a"), Vec::new(), session.clone());
    let b = Event::new(EventKind::action("b"), Vec::new(), session);

    let (store, faults) = FlakyStore::new();
    let mut queue = DurableQueue::open(Box::new(store), 100, Overflow::DropOldest).unwrap();
    queue.enqueue(&a).unwrap();
    queue.enqueue(&b).unwrap();
    let queue = Arc::new(Mutex::new(queue));
    let dispatcher = Dispatcher::new(queue.clone(), Arc::new(MemoryTransport::new()), &config());

    faults.lock().mark_delivered = 1;
    assert!(matches!(dispatcher.step().await, Err(Error::Storage(_))));
    {
        let queue = queue.lock();
        assert_eq!(queue.count(Status::InFlight).unwrap(), 0);
        assert_eq!(queue.count(Status::Pending).unwrap(), 2);
    }

    // `a` goes out again ahead of `b`.
    assert_eq!(dispatcher.step().await.unwrap(), Resolution::Acknowledged { events: 1 });
    assert_eq!(dispatcher.step().await.unwrap(), Resolution::Acknowledged { events: 1 });
    assert_eq!(dispatcher.step().await.unwrap(), Resolution::Idle);

    let sent: Vec<Vec<EventId>> = dispatcher
        .transport()
        .sent()
        .into_iter()
        .map(|batch| batch.ids)
        .collect();
    assert_eq!(sent, [vec![a.id], vec![a.id], vec![b.id]]);
    assert_eq!(queue.lock().stats().unwrap().delivered, 2);
}

#[tokio::test(start_paused = true)]
async fn failed_enqueue_hands_the_event_back() {
    let (store, faults) = FlakyStore::new();
    let transport = Arc::new(MemoryTransport::new());
    let tracker = Tracker::builder(config())
        .store(store)
        .start(transport.clone())
        .unwrap();

    faults.lock().append = 1;
    let err = tracker
        .track(EventKind::page("checkout"), [(ParamKey::PageParam(1), "cart")])
        .unwrap_err();
    let event = match err {
        Error::Persistence { event, source } => {
            assert!(matches!(source, storage::Error::Corrupt(_)));
            *event
        }
        other => panic!("expected persistence error, got {other:?}"),
    };
    assert_eq!(event.kind, EventKind::page("checkout"));
    assert_eq!(event.param(&ParamKey::PageParam(1)), Some("cart"));
    assert_eq!(tracker.stats().unwrap().stored(), 0);

    let id = event.id;
    match tracker.enqueue(event).unwrap() {
        Tracked::Queued { id: queued, .. } => assert_eq!(queued, id),
        other => panic!("expected queued, got {other:?}"),
    }

    tracker.shutdown().await.unwrap();
    assert_eq!(transport.delivered(), [id]);
}
