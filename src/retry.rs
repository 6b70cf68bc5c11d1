use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::backoff::{exponential_backoff, BackoffFn};
use crate::policy::{default_retry_policy, CheckRetryFn, RetryDecision};
use crate::{Body, CallContext, HttpError, Request, Response, Result, Transport};

pub const DEFAULT_RETRY_MAX_COUNT: u32 = 3;
pub const DEFAULT_RETRY_MIN_WAIT: Duration = Duration::from_millis(100);
pub const DEFAULT_RETRY_MAX_WAIT: Duration = Duration::from_millis(2_000);

/// Rewrites the outcome of a retryable attempt before the retry check runs
/// again. Receives the zero-based attempt index.
pub type RetryErrorFn = Arc<dyn Fn(Result<Response>, u32) -> Result<Response> + Send + Sync>;

/// Configures the retrying transport.
#[derive(Clone)]
pub struct RetryConfig {
    max_attempts: u32,
    min_wait: Duration,
    max_wait: Duration,
    check_retry: CheckRetryFn,
    backoff: BackoffFn,
    retry_error: Option<RetryErrorFn>,
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of attempts, including the first one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff bounds. A pair with `max_wait < min_wait` is ignored.
    pub fn with_wait(mut self, min_wait: Duration, max_wait: Duration) -> Self {
        if max_wait >= min_wait {
            self.min_wait = min_wait;
            self.max_wait = max_wait;
        }
        self
    }

    pub fn with_check_retry<F>(mut self, check_retry: F) -> Self
    where
        F: Fn(&CallContext, &Result<Response>) -> RetryDecision + Send + Sync + 'static,
    {
        self.check_retry = Arc::new(check_retry);
        self
    }

    pub fn with_backoff<F>(mut self, backoff: F) -> Self
    where
        F: Fn(Duration, Duration, u32, Option<&Response>) -> Duration + Send + Sync + 'static,
    {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_retry_error<F>(mut self, retry_error: F) -> Self
    where
        F: Fn(Result<Response>, u32) -> Result<Response> + Send + Sync + 'static,
    {
        self.retry_error = Some(Arc::new(retry_error));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn min_wait(&self) -> Duration {
        self.min_wait
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(HttpError::config("retry max attempts must be at least 1"));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_COUNT,
            min_wait: DEFAULT_RETRY_MIN_WAIT,
            max_wait: DEFAULT_RETRY_MAX_WAIT,
            check_retry: Arc::new(default_retry_policy),
            backoff: Arc::new(exponential_backoff),
            retry_error: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("min_wait", &self.min_wait)
            .field("max_wait", &self.max_wait)
            .field("retry_error", &self.retry_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Decorator replaying a request against its inner transport until the retry
/// policy is satisfied, the attempt cap is hit or the call is cancelled.
pub struct RetryTransport<T> {
    inner: T,
    config: RetryConfig,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let config = &self.config;
        let (parts, body) = request.into_parts();

        // The caller's stream is read once; every attempt gets its own view of the buffer.
        let buffered = match body {
            Some(body) => Some(body.collect().await?),
            None => None,
        };

        let mut attempt: u32 = 0;
        loop {
            let request = Request::from_parts(parts.clone(), buffered.clone().map(Body::from));
            let mut outcome = self.inner.round_trip(request).await;

            let mut decision = (config.check_retry)(&parts.context, &outcome);
            if outcome.is_err() || decision.retry || decision.error.is_some() {
                if let Some(retry_error) = &config.retry_error {
                    outcome = retry_error(outcome, attempt);
                    decision = (config.check_retry)(&parts.context, &outcome);
                }
            }

            if !decision.retry || attempt + 1 >= config.max_attempts {
                return outcome;
            }

            let wait = (config.backoff)(
                config.min_wait,
                config.max_wait,
                attempt,
                outcome.as_ref().ok(),
            );
            // Release the connection held by a discarded response before sleeping.
            drop(outcome);

            tokio::select! {
                biased;
                err = parts.context.done() => return Err(err),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}

impl<T: Transport> Transport for RetryTransport<T> {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(self.execute(request))
    }
}

impl<T> fmt::Debug for RetryTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::future::BoxFuture;
    use futures_util::stream;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
    use reqwest::{Method, StatusCode, Url};

    use super::{RetryConfig, RetryTransport};
    use crate::policy::RetryDecision;
    use crate::{Body, CallContext, HttpError, Request, Response, Result, Transport};

    type Scripted = Box<dyn FnOnce() -> Result<Response> + Send>;

    /// Replays scripted outcomes and records every body it receives.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        bodies: Mutex<Vec<Option<Bytes>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn bodies(&self) -> Vec<Option<Bytes>> {
            self.bodies.lock().expect("bodies mutex").clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let (_, body) = request.into_parts();
                let body = match body {
                    Some(body) => Some(body.collect().await?),
                    None => None,
                };
                self.bodies.lock().expect("bodies mutex").push(body);

                let next = self.script.lock().expect("script mutex").pop_front();
                match next {
                    Some(outcome) => outcome(),
                    None => Ok(Response::new(StatusCode::OK, "default")),
                }
            })
        }
    }

    fn status(code: StatusCode) -> Scripted {
        Box::new(move || Ok(Response::new(code, "")))
    }

    fn fail(message: &'static str) -> Scripted {
        Box::new(move || {
            Err(HttpError::transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                message,
            )))
        })
    }

    fn request() -> Request {
        let url = Url::parse("http://example.test/upload").expect("valid url");
        Request::new(Method::POST, url)
    }

    fn fast_config() -> RetryConfig {
        RetryConfig::new().with_wait(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn succeeds_after_retryable_failures_with_identical_bodies() {
        let inner = ScriptedTransport::new(vec![
            fail("connection refused"),
            status(StatusCode::BAD_GATEWAY),
            status(StatusCode::CREATED),
        ]);
        let transport = RetryTransport::new(Arc::clone(&inner), fast_config());

        let payload: Vec<std::result::Result<Bytes, io::Error>> =
            vec![Ok(Bytes::from_static(b"chunk-1;")), Ok(Bytes::from_static(b"chunk-2"))];
        let response = transport
            .round_trip(request().with_body(Body::from_stream(stream::iter(payload))))
            .await
            .expect("third attempt must succeed");

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(inner.calls(), 3);
        let expected = Some(Bytes::from_static(b"chunk-1;chunk-2"));
        assert!(inner.bodies().iter().all(|body| *body == expected));
    }

    #[tokio::test]
    async fn stops_at_attempt_cap_and_returns_last_error() {
        let inner = ScriptedTransport::new(vec![
            fail("refused 1"),
            fail("refused 2"),
            fail("refused 3"),
            fail("refused 4"),
        ]);
        let transport = RetryTransport::new(Arc::clone(&inner), fast_config().with_max_attempts(3));

        let err = transport
            .round_trip(request())
            .await
            .expect_err("every attempt fails");

        assert_eq!(inner.calls(), 3);
        assert!(err.to_string().contains("refused 3"));
    }

    #[tokio::test]
    async fn returns_last_response_when_cap_reached_on_status() {
        let inner = ScriptedTransport::new(vec![
            status(StatusCode::SERVICE_UNAVAILABLE),
            status(StatusCode::SERVICE_UNAVAILABLE),
        ]);
        let transport = RetryTransport::new(Arc::clone(&inner), fast_config().with_max_attempts(2));

        let response = transport.round_trip(request()).await.expect("response kept");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn client_errors_and_permanent_failures_are_not_retried() {
        let inner = ScriptedTransport::new(vec![status(StatusCode::NOT_FOUND)]);
        let transport = RetryTransport::new(Arc::clone(&inner), fast_config());
        let response = transport.round_trip(request()).await.expect("404 is a response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(inner.calls(), 1);

        let inner = ScriptedTransport::new(vec![fail("stopped after 10 redirects")]);
        let transport = RetryTransport::new(Arc::clone(&inner), fast_config());
        let err = transport.round_trip(request()).await.expect_err("redirect error");
        assert!(err.to_string().contains("stopped after 10 redirects"));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn single_attempt_config_never_waits() {
        let inner = ScriptedTransport::new(vec![status(StatusCode::INTERNAL_SERVER_ERROR)]);
        let transport = RetryTransport::new(Arc::clone(&inner), fast_config().with_max_attempts(1));
        let response = transport.round_trip(request()).await.expect("response kept");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_wait_aborts_before_next_attempt() {
        let inner = ScriptedTransport::new(vec![
            status(StatusCode::SERVICE_UNAVAILABLE),
            status(StatusCode::OK),
        ]);
        let config = RetryConfig::new().with_wait(Duration::from_secs(10), Duration::from_secs(10));
        let transport = RetryTransport::new(Arc::clone(&inner), config);

        let ctx = CallContext::new();
        let canceller = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                ctx.cancel();
            })
        };

        let started = tokio::time::Instant::now();
        let err = transport
            .round_trip(request().with_context(ctx))
            .await
            .expect_err("cancelled during wait");
        canceller.await.expect("canceller task");

        assert!(matches!(err, HttpError::Cancelled));
        assert_eq!(inner.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_wait_returns_deadline_error() {
        let inner = ScriptedTransport::new(vec![fail("reset"), fail("reset")]);
        let config = RetryConfig::new().with_wait(Duration::from_secs(5), Duration::from_secs(5));
        let transport = RetryTransport::new(Arc::clone(&inner), config);

        let ctx = CallContext::new().with_timeout(Duration::from_secs(2));
        let err = transport
            .round_trip(request().with_context(ctx))
            .await
            .expect_err("deadline hits during wait");

        assert!(matches!(err, HttpError::DeadlineExceeded));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_header_sets_the_wait() {
        let inner = ScriptedTransport::new(vec![
            Box::new(|| {
                let mut headers = HeaderMap::new();
                headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
                Ok(Response::new(StatusCode::TOO_MANY_REQUESTS, "").with_headers(headers))
            }),
            status(StatusCode::OK),
        ]);
        let transport = RetryTransport::new(Arc::clone(&inner), fast_config());

        let started = tokio::time::Instant::now();
        let response = transport.round_trip(request()).await.expect("second attempt");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn backoff_receives_zero_based_attempt_index() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = ScriptedTransport::new(vec![fail("a"), fail("b"), fail("c")]);
        let config = RetryConfig::new().with_max_attempts(3).with_backoff({
            let seen = Arc::clone(&seen);
            move |_, _, attempt, _| {
                seen.lock().expect("seen mutex").push(attempt);
                Duration::from_millis(1)
            }
        });
        let transport = RetryTransport::new(Arc::clone(&inner), config);

        let _ = transport.round_trip(request()).await;
        assert_eq!(*seen.lock().expect("seen mutex"), vec![0, 1]);
    }

    #[tokio::test]
    async fn retry_error_hook_can_turn_failure_into_success() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let inner = ScriptedTransport::new(vec![status(StatusCode::BAD_GATEWAY)]);
        let config = fast_config().with_retry_error({
            let hook_calls = Arc::clone(&hook_calls);
            move |outcome, attempt| {
                hook_calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(attempt, 0);
                match outcome {
                    Ok(response) if response.status() == StatusCode::BAD_GATEWAY => {
                        Ok(Response::new(StatusCode::OK, "fallback"))
                    }
                    other => other,
                }
            }
        });
        let transport = RetryTransport::new(Arc::clone(&inner), config);

        let response = transport.round_trip(request()).await.expect("hook rewrote it");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.expect("body"), "fallback");
        assert_eq!(inner.calls(), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_check_retry_is_consulted() {
        let inner = ScriptedTransport::new(vec![
            status(StatusCode::CONFLICT),
            status(StatusCode::CONFLICT),
            status(StatusCode::OK),
        ]);
        let config = fast_config().with_check_retry(|_, outcome| match outcome {
            Ok(response) if response.status() == StatusCode::CONFLICT => RetryDecision::retry(),
            _ => RetryDecision::stop(),
        });
        let transport = RetryTransport::new(Arc::clone(&inner), config);

        let response = transport.round_trip(request()).await.expect("eventually ok");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(inner.calls(), 3);
    }

    #[test]
    fn inverted_wait_bounds_are_ignored() {
        let config = RetryConfig::new().with_wait(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(config.min_wait(), super::DEFAULT_RETRY_MIN_WAIT);
        assert_eq!(config.max_wait(), super::DEFAULT_RETRY_MAX_WAIT);
        assert!(RetryConfig::new().with_max_attempts(0).validate().is_err());
    }
}
