//! `herald-delivery` — the worker pool draining the job queue into SMTP.
//!
//! Each worker loops: reserve a job, decode the delivery, render it, honour
//! unsubscribe preferences, send, then record the terminal status or requeue.
//! Delivery is at-least-once: a crash between send and dequeue re-sends after
//! the lease is released.

pub mod pool;
pub mod render;
pub mod worker;

pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
pub use render::{MessageRenderer, RenderError};
pub use worker::{DeliveryWorker, Outcome};
