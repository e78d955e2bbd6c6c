use crate::config::{CollectorSettings, RetrySettings};
use crate::error::{HarvestError, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

/// Paces request starts across every client and task. The next free slot
/// is the only mutable state shared between concurrent fetches.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.min_interval;
            slot
        };
        sleep_until(slot).await;
    }

    /// Pushes every later request back, e.g. after a 429 with `Retry-After`.
    pub async fn penalize(&self, delay: Duration) {
        let mut next = self.next_slot.lock().await;
        let until = Instant::now() + delay;
        if until > *next {
            *next = until;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: base, 2×base, 4×base … capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// the policy runs out of attempts. Exhausted transient failures surface as
/// `HarvestError::Transient`.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= policy.max_attempts => {
                return Err(HarvestError::Transient(format!(
                    "{operation_name} failed after {attempt} attempts: {err}"
                )));
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Maps a non-success status onto the error taxonomy. `None` means success.
pub fn classify_status(status: StatusCode, url: &str) -> Option<HarvestError> {
    if status.is_success() {
        return None;
    }
    let message = format!("{url} returned {status}");
    let error = if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        HarvestError::Transient(message)
    } else {
        HarvestError::Permanent(message)
    };
    Some(error)
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Shared by every upstream client: one connection pool, one rate limiter,
/// one retry policy.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: Client, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            client,
            limiter,
            policy,
        }
    }

    pub fn from_settings(client: Client, settings: &CollectorSettings) -> Self {
        Self::new(
            client,
            Arc::new(RateLimiter::new(Duration::from_millis(
                settings.min_request_interval_ms,
            ))),
            RetryPolicy::from(&settings.retry),
        )
    }

    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        retry_with_backoff(&self.policy, url, move || async move {
            self.limiter.acquire().await;
            debug!(url, "GET");

            let response = self.client.get(url).query(query).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(delay) = retry_after(&response) {
                    self.limiter.penalize(delay).await;
                }
            }
            if let Some(err) = classify_status(status, url) {
                return Err(err);
            }

            let body = response.text().await?;
            serde_json::from_str(&body)
                .map_err(|e| HarvestError::Permanent(format!("malformed JSON from {url}: {e}")))
        })
        .await
    }
}
