//! Durable delivery job queue.
//!
//! ## Design
//!
//! - One job row per recipient, payload is an opaque serialized delivery
//! - Workers lease the oldest ready row; concurrent claims never overlap
//! - Transient failures requeue with exponential backoff up to a retry ceiling
//! - Orphaned leases from crashed processes are released by `JobQueue::unlock`
//!
//! ## Components
//!
//! - `Job`/`NewJob`: row types and payload encoding
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `JobQueue`: admission, reserve, dequeue, requeue, unlock

pub mod postgres;
pub mod queue;
pub mod store;
pub mod types;

pub use postgres::PostgresJobStore;
pub use queue::{JobQueue, QueueConfig, QueueError};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{Job, JobId, NewJob, RetryPolicy};
