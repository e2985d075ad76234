//! Core job types and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::queue::QueueError;

/// Monotonic job identifier (row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job about to be admitted; the store assigns id and schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub payload: String,
}

impl NewJob {
    /// Serialize a payload into the job wire format (JSON).
    pub fn encode<T: Serialize>(payload: &T) -> Result<Self, QueueError> {
        let payload =
            serde_json::to_string(payload).map_err(|e| QueueError::Encode(e.to_string()))?;
        Ok(Self { payload })
    }
}

/// A queued or leased job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque payload (a serialized delivery)
    pub payload: String,
    /// Earliest time the job may be reserved
    pub active_at: DateTime<Utc>,
    /// Number of requeues so far (0 on first attempt)
    pub retry_count: u32,
    /// Worker currently holding the lease, if any
    pub locked_by: Option<String>,
    /// When the current lease was taken
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_str(&self.payload).map_err(|e| QueueError::Decode(e.to_string()))
    }

    pub fn is_leased(&self) -> bool {
        self.locked_by.is_some()
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        !self.is_leased() && self.active_at <= now
    }
}

/// Backoff for requeued jobs: `base_delay * 2^(retry - 1)`, capped at
/// `max_delay`, spread by a deterministic jitter.
///
/// `max_attempts` is the retry ceiling: the number of requeues allowed after
/// the first delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction (0.0-1.0) of the delay the jitter may add or remove.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60 * 60 * 12),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Same delay before every retry.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    /// Delay before the `retry`-th requeue becomes active (1-indexed).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let doublings = retry.saturating_sub(1).min(62) as i32;
        let cap_ms = self.max_delay.as_millis() as f64;
        let delay_ms = (self.base_delay.as_millis() as f64 * 2_f64.powi(doublings)).min(cap_ms);

        // Keyed on the retry number so concurrent retries of different jobs
        // spread out while staying reproducible.
        let spread = delay_ms * self.jitter;
        let offset = if spread > 0.0 {
            let unit = ((retry as f64 * 17.0) % 100.0) / 100.0;
            spread * (unit * 2.0 - 1.0)
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + offset).clamp(0.0, cap_ms) as u64)
    }

    /// Whether a job that has already been requeued `retry_count` times may be
    /// requeued again.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn delay_doubles_per_retry() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(600));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for retry in 1..8 {
            let exact = 60_000.0 * 2_f64.powi(retry as i32 - 1);
            let ms = policy.delay_for_attempt(retry).as_millis() as f64;
            assert!(ms >= exact * 0.9 - 1.0 && ms <= exact * 1.1 + 1.0, "retry {retry}: {ms}");
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_respects_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert!(!RetryPolicy::fixed(0, Duration::ZERO).should_retry(0));
    }

    #[test]
    fn payload_round_trips_through_job() {
        let new_job = NewJob::encode(&serde_json::json!({"message_id": "abc"})).unwrap();
        let job = Job {
            id: JobId(1),
            payload: new_job.payload,
            active_at: Utc::now(),
            retry_count: 0,
            locked_by: None,
            locked_at: None,
            created_at: Utc::now(),
        };

        let value: serde_json::Value = job.decode().unwrap();
        assert_eq!(value["message_id"], "abc");
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        let job = Job {
            id: JobId(1),
            payload: "{not json".to_string(),
            active_at: Utc::now(),
            retry_count: 0,
            locked_by: None,
            locked_at: None,
            created_at: Utc::now(),
        };

        assert!(matches!(
            job.decode::<serde_json::Value>(),
            Err(QueueError::Decode(_))
        ));
    }

    proptest! {
        #[test]
        fn exponential_delay_never_decreases_without_jitter(attempt in 1u32..64) {
            let policy = RetryPolicy {
                jitter: 0.0,
                ..RetryPolicy::default()
            };
            prop_assert!(policy.delay_for_attempt(attempt + 1) >= policy.delay_for_attempt(attempt));
            prop_assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }
    }
}
