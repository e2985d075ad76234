//! `herald-dispatch` — audience resolution and transactional admission.
//!
//! A `Strategy` per audience type turns a `Dispatch` into recipients, renders
//! the endorsement, loads templates and hands everything to an `Enqueuer`,
//! which persists one `Message` and one job per recipient.

pub mod audience;
pub mod endorsement;
pub mod enqueuer;
pub mod error;
pub mod strategies;

pub use enqueuer::{EnqueueRequest, Enqueuer, QueueEnqueuer};
pub use error::DispatchError;
pub use strategies::{Audience, Strategies, Strategy};
