//! Queue entry and dead-letter records.

use crate::{Event, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InFlight,
    Delivered,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Pending, Status::InFlight, Status::Delivered];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "delivered" => Ok(Self::Delivered),
            other => Err(crate::Error::Corrupt(format!("unknown status '{other}'"))),
        }
    }
}

/// An event held by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Store sequence number; defines delivery order.
    pub seq: i64,
    pub event: Event,
    pub status: Status,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl QueueEntry {
    pub fn id(&self) -> EventId {
        self.event.id
    }
}

/// An event that will never be delivered, with the reason why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub event: Event,
    pub attempts: u32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Entry counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub delivered: usize,
    pub dead_letters: usize,
}

impl QueueStats {
    /// Entries currently stored in the queue (dead letters excluded).
    pub fn stored(&self) -> usize {
        self.pending + self.in_flight + self.delivered
    }
}
