use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ServiceError;

/// Enforces a minimum delay between successive calls to one external service,
/// across every worker sharing the limiter.
#[derive(Debug)]
pub struct RateLimiter {
    service: &'static str,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(service: &'static str, min_interval: Duration) -> Self {
        Self {
            service,
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn acquire(&self) {
        let mut last_call = self
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(service = self.service, wait_ms = wait.as_millis() as u64, "rate limit wait");
                thread::sleep(wait);
            }
        }

        *last_call = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base doubled per retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct RetriesExhausted {
    pub attempts: u32,
    pub last_error: ServiceError,
}

/// Runs `call` once plus up to `policy.max_retries` retries with backoff.
pub fn with_retries<T>(
    policy: &RetryPolicy,
    limiter: Option<&RateLimiter>,
    mut call: impl FnMut() -> Result<T, ServiceError>,
) -> Result<T, RetriesExhausted> {
    let mut attempts = 0u32;
    loop {
        if let Some(limiter) = limiter {
            limiter.acquire();
        }
        attempts += 1;

        match call() {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempts > policy.max_retries {
                    return Err(RetriesExhausted {
                        attempts,
                        last_error: error,
                    });
                }
                let delay = policy.delay_for(attempts);
                warn!(
                    service = error.service,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "external call failed; retrying"
                );
                thread::sleep(delay);
            }
        }
    }
}
