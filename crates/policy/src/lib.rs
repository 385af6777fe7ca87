//! Event validation policy.
//!
//! Core principle: **an event that enters the queue is already valid.**
//! Names and keys are checked, reserved keys are guarded, and oversized
//! values are truncated here, once, before anything is persisted.

mod draft;
mod error;
mod policy;

pub use draft::EventDraft;
pub use error::{Error, Result};
pub use policy::{ParamRules, Policy, ReservedParamPolicy};
