//! Wait-duration policies used between retry attempts.

use std::time::Duration;

use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;

use crate::Response;

/// Computes the wait before the next attempt from
/// `(min_wait, max_wait, attempt_num, last_response)`.
///
/// `attempt_num` is zero-based: the wait after the first failed attempt is
/// computed with `0`.
pub type BackoffFn =
    std::sync::Arc<dyn Fn(Duration, Duration, u32, Option<&Response>) -> Duration + Send + Sync>;

/// Exponential backoff: `min_wait * 2^attempt_num`, capped at `max_wait`.
///
/// A `Retry-After` header on a 429 or 503 response wins over the computed
/// value.
pub fn exponential_backoff(
    min_wait: Duration,
    max_wait: Duration,
    attempt_num: u32,
    response: Option<&Response>,
) -> Duration {
    if let Some(wait) = response.and_then(retry_after) {
        return wait;
    }

    2u32.checked_pow(attempt_num)
        .and_then(|factor| min_wait.checked_mul(factor))
        .filter(|wait| *wait <= max_wait)
        .unwrap_or(max_wait)
}

/// Linear backoff with jitter between `min_wait` and `max_wait`, multiplied
/// by the one-based attempt number.
pub fn linear_jitter_backoff(
    min_wait: Duration,
    max_wait: Duration,
    attempt_num: u32,
    response: Option<&Response>,
) -> Duration {
    if let Some(wait) = response.and_then(retry_after) {
        return wait;
    }

    let attempt = attempt_num.saturating_add(1);
    if max_wait <= min_wait {
        return min_wait.saturating_mul(attempt);
    }

    let fraction: f64 = rand::thread_rng().gen();
    let jitter = (max_wait - min_wait).mul_f64(fraction);
    min_wait.saturating_add(jitter).saturating_mul(attempt)
}

/// Reads `Retry-After` as whole seconds on 429 and 503 responses.
///
/// HTTP-date values and anything else that is not a base-10 integer are
/// ignored.
pub fn retry_after(response: &Response) -> Option<Duration> {
    if !matches!(
        response.status(),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    ) {
        return None;
    }

    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
