//! Infrastructure layer: DB, job queue, config, external services.

/// Configuration loading and representation.
pub mod config;

/// Database adapters (schema bootstrap, message repository).
pub mod db;

/// Durable job queue (store, Postgres claims, queue engine).
pub mod jobs;

/// Outbound mail transports.
pub mod mail;

/// Unsubscribe preferences.
pub mod preferences;

/// Identity and membership service clients.
pub mod providers;

/// Template storage and fallback loading.
pub mod templates;
