//! Beacon runtime: batching, delivery and the tracker facade.
//!
//! This crate turns queued events into delivered ones. It owns the
//! background dispatcher, the session context stamped onto events, and the
//! [`Tracker`] that host applications call.
//!
//! # Overview
//!
//! - **Tracker**: synchronous entry point. Validates an event against the
//!   [`Policy`](policy::Policy), persists it in the durable queue and wakes
//!   the dispatcher when enough is pending.
//! - **Batcher**: groups pending entries, oldest first, into batches bounded
//!   by count and encoded size.
//! - **Dispatcher**: one background task that sends a batch at a time,
//!   retries transient failures with exponential [`Backoff`] and moves
//!   permanent failures to the dead-letter log.
//! - **Transport**: posts a batch. [`HttpTransport`] talks to a collection
//!   endpoint; [`MemoryTransport`] records batches in process.
//! - **SessionManager**: the session id, the persistent ever id and the
//!   opt-out flag.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{HttpTransport, Tracker, TrackerConfig};
//! use storage::{ParamKey, SqliteStore};
//!
//! # async fn example() -> runtime::Result<()> {
//! let config = TrackerConfig {
//!     endpoint: "https://collect.example.com".into(),
//!     track_ids: vec!["123456".into()],
//!     ..Default::default()
//! };
//! let transport = HttpTransport::from_config(&config)?;
//! let tracker = Tracker::builder(config)
//!     .store(SqliteStore::open("queue.db")?)
//!     .on_notice(|notice| eprintln!("{notice}"))
//!     .start(transport)?;
//!
//! tracker.track_page("product page", [(ParamKey::PageCategory(100), "blue")])?;
//! tracker.flush();
//!
//! let report = tracker.shutdown().await?;
//! println!("{} delivered, {} left for next time", report.delivered, report.remaining);
//! # Ok(())
//! # }
//! ```

mod backoff;
mod batcher;
mod config;
mod dispatcher;
mod error;
mod notice;
mod session;
mod tracker;
mod transport;

pub use backoff::Backoff;
pub use batcher::{Assembly, Batch, Batcher, OVERSIZED};
pub use config::TrackerConfig;
pub use dispatcher::{Dispatcher, DrainReport, Resolution};
pub use error::{Error, Result};
pub use notice::{Notice, NoticeHook};
pub use session::{EVER_ID_KEY, OPT_OUT_KEY, SDK_VERSION, SessionManager};
pub use tracker::{Tracked, Tracker, TrackerBuilder};
pub use transport::{
    DeliveryError, HttpTransport, HttpTransportBuilder, MemoryTransport, SentBatch, Transport,
};
