//! Retry orchestration with exponential backoff and jitter.
//!
//! The retrier runs an attempt function up to `max_attempts` times,
//! returning the first success or the last failure. Only failures whose
//! classification reports itself retriable get another attempt, and no
//! attempt is started (or slept for) past the request deadline.

use crate::models::settings::RetrySettings;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Failure classification consulted between attempts.
///
/// Transport errors, timeouts, upstream 5xx, and circuit-open conditions are
/// retriable; everything else (upstream 4xx, auth, validation) is terminal.
pub trait RetryClass {
    fn is_retriable(&self) -> bool;
}

/// True for methods the proxy may retry without an explicit idempotency
/// marker: GET, HEAD, OPTIONS, PUT, DELETE. POST and PATCH must opt in.
pub fn method_is_idempotent(method: &actix_web::http::Method) -> bool {
    use actix_web::http::Method;
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

/// Exponential-backoff retrier configured per service.
#[derive(Debug, Clone)]
pub struct Retrier {
    settings: RetrySettings,
}

impl Retrier {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// Delay before attempt `attempt + 1`: base doubled per attempt, capped,
    /// with ±10% uniform jitter when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.settings.backoff_ms(attempt);
        let ms = if self.settings.jitter {
            use rand::Rng;
            let factor: f64 = rand::thread_rng().gen_range(0.9..=1.1);
            (base_ms as f64 * factor) as u64
        } else {
            base_ms
        };
        Duration::from_millis(ms)
    }

    /// Runs `attempt` until success, a terminal failure, attempt exhaustion,
    /// or the deadline. Returns the outcome and the number of attempts made.
    ///
    /// With `retries_allowed == false` (non-idempotent request), exactly one
    /// attempt runs.
    pub async fn run<T, E, F, Fut>(
        &self,
        deadline: Instant,
        retries_allowed: bool,
        mut attempt: F,
    ) -> (Result<T, E>, u32)
    where
        E: RetryClass,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = if retries_allowed {
            self.settings.max_attempts.max(1)
        } else {
            1
        };

        let mut attempts = 0;
        loop {
            let result = attempt(attempts).await;
            attempts += 1;
            match result {
                Ok(value) => return (Ok(value), attempts),
                Err(failure) => {
                    if attempts >= max_attempts || !failure.is_retriable() {
                        return (Err(failure), attempts);
                    }
                    let delay = self.delay_for(attempts - 1);
                    if Instant::now() + delay >= deadline {
                        return (Err(failure), attempts);
                    }
                    sleep(delay).await;
                }
            }
        }
    }
}
