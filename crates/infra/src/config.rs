//! Configuration loading and representation.
//!
//! Everything is read from the process environment once at startup. Values have
//! development defaults except the upstream endpoints and credentials, which must
//! be supplied.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::{QueueConfig, RetryPolicy};
use crate::mail::{SmtpConfig, SmtpTls};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub uaa_host: String,
    pub uaa_client_id: String,
    pub uaa_client_secret: String,
    pub cc_host: String,
    pub smtp: SmtpConfig,
    /// `From` address on every outbound message.
    pub sender: String,
    /// Base URL for unsubscribe links.
    pub root_path: String,
    pub max_queue_length: u64,
    /// Ceiling for the jittered poll backoff of an idle worker.
    pub queue_wait_max: Duration,
    /// Number of retries after the first delivery attempt.
    pub max_retries: u32,
    /// Age after which a lease is considered abandoned and released.
    pub lease_timeout: Duration,
    pub worker_count: usize,
    /// Horizontal-scale index of this process; index 0 unlocks orphaned leases.
    pub instance_index: u32,
    pub http_port: u16,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an explicit map (tests, embedding).
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let smtp_tls = match env.optional("SMTP_TLS").as_deref() {
            None | Some("starttls") | Some("true") => SmtpTls::StartTls,
            Some("tls") => SmtpTls::Tls,
            Some("none") | Some("false") => SmtpTls::None,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "SMTP_TLS",
                    reason: format!("expected one of none, starttls, tls; got {other:?}"),
                });
            }
        };

        let instance_index = match env.optional("INSTANCE_INDEX") {
            Some(_) => env.parsed("INSTANCE_INDEX", 0)?,
            None => env.parsed("CF_INSTANCE_INDEX", 0)?,
        };

        let worker_count: usize = env.parsed("WORKER_COUNT", 10)?;
        if worker_count == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_COUNT",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            uaa_host: env.required("UAA_HOST")?,
            uaa_client_id: env.required("UAA_CLIENT_ID")?,
            uaa_client_secret: env.required("UAA_CLIENT_SECRET")?,
            cc_host: env.required("CC_HOST")?,
            smtp: SmtpConfig {
                host: env.required("SMTP_HOST")?,
                port: env.parsed("SMTP_PORT", 587)?,
                user: env.optional("SMTP_USER"),
                pass: env.optional("SMTP_PASS"),
                tls: smtp_tls,
            },
            sender: env.required("SENDER")?,
            root_path: env
                .optional("ROOT_PATH")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            max_queue_length: env.parsed("DB_MAX_QUEUE_LENGTH", 10_000)?,
            queue_wait_max: Duration::from_millis(env.parsed("QUEUE_WAIT_MAX_DURATION", 5_000)?),
            max_retries: env.parsed("MAX_RETRIES", 10)?,
            lease_timeout: Duration::from_millis(env.parsed("QUEUE_LEASE_TIMEOUT", 900_000)?),
            worker_count,
            instance_index,
            http_port: env.parsed("HTTP_PORT", 3000)?,
        })
    }

    /// Queue settings derived from this configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_queue_length: self.max_queue_length,
            wait_max: self.queue_wait_max,
            lease_timeout: self.lease_timeout,
            retry: RetryPolicy {
                max_attempts: self.max_retries,
                ..RetryPolicy::default()
            },
            ..QueueConfig::default()
        }
    }

    pub fn unlocks_on_startup(&self) -> bool {
        self.instance_index == 0
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
        }
    }
}
