//! `herald-server` — process wiring for the delivery workers.

pub mod app;
pub mod bootstrap;
