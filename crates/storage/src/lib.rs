//! Durable event queue for Beacon.
//!
//! This crate owns everything that has to survive a process restart: the
//! tracked events themselves, their delivery status, the dead-letter log of
//! events that will never be delivered, and a little persistent state (the
//! installation's ever id and the opt-out flag).
//!
//! # Core Concepts
//!
//! ## Event
//!
//! An [`Event`] is an immutable record of something the host application
//! tracked: a [`EventKind`] (page view, action or custom), an ordered list of
//! [`Param`]s keyed by [`ParamKey`], a timestamp, and a snapshot of the
//! [`SessionContext`] it was created in.
//!
//! ## DurableQueue
//!
//! The [`DurableQueue`] wraps a [`Store`] and enforces the queue rules:
//! FIFO order, at-least-once delivery (entries leave the queue only once
//! delivered or dead-lettered), recovery of in-flight entries on open, and
//! a hard bound on stored entries ([`Overflow`]).
//!
//! ## Store
//!
//! [`Store`] is the persistence seam. [`SqliteStore`] is the durable
//! backend; [`MemoryStore`] keeps everything in process.
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use storage::{
//!     Admission, DurableQueue, Event, EventKind, Overflow, Param, ParamKey, SessionContext,
//!     SessionId, SqliteStore,
//! };
//!
//! let store = SqliteStore::open("queue.db")?;
//! let mut queue = DurableQueue::open(Box::new(store), 10_000, Overflow::DropOldest)?;
//!
//! let session = SessionContext {
//!     session_id: SessionId::new(),
//!     ever_id: "6172839405012345678".into(),
//!     started_at: Utc::now(),
//!     app_version: None,
//!     sdk_version: "0.1.0".into(),
//! };
//! let event = Event::new(
//!     EventKind::page("product page"),
//!     vec![Param::new(ParamKey::PageCategory(100), "blue")],
//!     session,
//! );
//!
//! if let Admission::Accepted { entry, .. } = queue.enqueue(&event)? {
//!     queue.mark_in_flight(&[entry.id()])?;
//!     queue.mark_delivered(&[entry.id()])?;
//!     queue.purge_delivered()?;
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod entry;
mod error;
mod event;
mod params;
mod queue;
mod store;

pub use entry::{DeadLetter, QueueEntry, QueueStats, Status};
pub use error::{Error, Result};
pub use event::{Event, EventId, EventKind, SessionContext, SessionId};
pub use params::{Param, ParamKey};
pub use queue::{Admission, DurableQueue, EVICTED, Overflow};
pub use store::{MemoryStore, SqliteStore, Store};
