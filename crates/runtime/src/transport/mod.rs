//! Delivery transports.
//!
//! A [`Transport`] posts one [`Batch`] and reports whether the endpoint
//! accepted it. It only classifies the outcome; retry decisions belong to the
//! [`Dispatcher`](crate::Dispatcher).

mod http;
mod memory;

pub use http::{HttpTransport, HttpTransportBuilder};
pub use memory::{MemoryTransport, SentBatch};

use crate::Batch;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Why a batch was not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Worth retrying: timeouts, connection failures, overload.
    #[error("transient: {0}")]
    Transient(String),
    /// The endpoint refused the batch; resending will not help.
    #[error("permanent: {0}")]
    Permanent(String),
}

/// Trait for delivery transports.
pub trait Transport: Send + Sync {
    /// Send a batch. `Ok` means the endpoint acknowledged every entry in it.
    fn send(&self, batch: &Batch) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, batch: &Batch) -> impl Future<Output = Result<(), DeliveryError>> + Send {
        T::send(self, batch)
    }
}
