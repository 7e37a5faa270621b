use std::time::Duration;

use tokio::time::Instant;

/// Where and how to reach patient telemetry.
///
/// A patient endpoint `abc` resolves to `<scheme>://abc.<domain>/<path>`.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub scheme: String,
    pub domain: String,
    pub readings_path: String,
    pub profile_path: String,
    pub username: String,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

impl EndpointConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            scheme: "https".into(),
            domain: domain.into(),
            readings_path: "get-glucose-data".into(),
            profile_path: "api/v1/profile.json".into(),
            username: String::new(),
            password: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = username.into();
        self.password = password;
        self
    }
}

/// Bounded exponential backoff.
///
/// Attempt `n` (1-based) that fails transiently is followed by a pause of
/// `initial_backoff * 2^(n-1)`, up to `max_attempts` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Overall limit for one fetch including every pause.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(3),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff.saturating_mul(1_u32 << exponent)
    }

    pub(crate) fn deadline_from(&self, now: Instant) -> Option<Instant> {
        self.deadline.and_then(|d| now.checked_add(d))
    }
}
