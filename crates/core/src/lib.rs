//! `herald-core` — notification domain types shared by dispatch and delivery.
//!
//! This crate contains **pure domain** data (no infrastructure concerns): the
//! per-recipient `Message` record, the self-contained `Delivery` job payload,
//! the transient `Dispatch` request and the synchronous `Response`.

pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod id;
pub mod message;
pub mod response;

pub use delivery::{Delivery, DELIVERY_VERSION, Html, Options, Templates, User};
pub use dispatch::{Dispatch, DispatchClient, DispatchKind, DispatchMessage};
pub use error::{DomainError, DomainResult};
pub use id::MessageId;
pub use message::{Message, MessageStatus};
pub use response::Response;
