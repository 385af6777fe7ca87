//! Delivery notices for an optional observer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use storage::EventId;

/// Something that happened to queued events outside the caller's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A batch was acknowledged.
    Delivered { events: usize, bytes: usize },
    /// A batch failed transiently and will be resent after `delay`.
    RetryScheduled {
        events: usize,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Events moved to the dead-letter log.
    DeadLettered { events: Vec<EventId>, reason: String },
    /// The queue was full. Either old entries were evicted or the new event
    /// was refused.
    CapacityExceeded {
        limit: usize,
        evicted: Vec<EventId>,
        rejected: Option<EventId>,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered { events, bytes } => {
                write!(f, "delivered {events} events ({bytes} bytes)")
            }
            Self::RetryScheduled {
                events,
                attempt,
                delay,
                error,
            } => write!(
                f,
                "attempt {attempt} for {events} events failed ({error}); retrying in {delay:?}"
            ),
            Self::DeadLettered { events, reason } => {
                write!(f, "dead-lettered {} events: {reason}", events.len())
            }
            Self::CapacityExceeded {
                limit,
                evicted,
                rejected,
            } => match rejected {
                Some(id) => write!(f, "queue full at {limit}, rejected {id}"),
                None => write!(f, "queue full at {limit}, evicted {} events", evicted.len()),
            },
        }
    }
}

/// Observer callback. Runs on whichever task produced the notice, so it
/// should return quickly.
pub type NoticeHook = Arc<dyn Fn(&Notice) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Notifier(Option<NoticeHook>);

impl Notifier {
    pub(crate) fn new(hook: Option<NoticeHook>) -> Self {
        Self(hook)
    }

    pub(crate) fn emit(&self, notice: Notice) {
        if let Some(hook) = &self.0 {
            hook(&notice);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Notifier").field(&self.0.is_some()).finish()
    }
}
