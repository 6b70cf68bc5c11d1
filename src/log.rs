use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::metrics::{request_latency_histogram, LatencyObserver, TRANSPORT_ERROR_STATUS};
use crate::{Request, Response, Result, Transport};

pub const DEFAULT_SLOW_LATENCY: Duration = Duration::from_millis(500);

/// Configures the logging transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    /// Emit a `slow log` event for successful calls slower than `slow_latency`.
    pub slow_log: bool,
    pub slow_latency: Duration,
    /// Exempt 404 responses from the slow log.
    pub ignore_not_found: bool,
    /// Emit an `access log` event for every call.
    pub access_log: bool,
    /// Attach request and response headers to access log events.
    pub include_headers: bool,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slow_log(mut self, enabled: bool, slow_latency: Duration) -> Self {
        self.slow_log = enabled;
        self.slow_latency = slow_latency;
        self
    }

    pub fn ignore_not_found(mut self, ignore: bool) -> Self {
        self.ignore_not_found = ignore;
        self
    }

    pub fn with_access_log(mut self, enabled: bool) -> Self {
        self.access_log = enabled;
        self
    }

    pub fn include_headers(mut self, include: bool) -> Self {
        self.include_headers = include;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            slow_log: true,
            slow_latency: DEFAULT_SLOW_LATENCY,
            ignore_not_found: false,
            access_log: false,
            include_headers: false,
        }
    }
}

/// Observation-only decorator: times each call, records it in the latency
/// histogram and emits slow/access log events. Outcomes pass through untouched.
pub struct LogTransport<T> {
    inner: T,
    config: LogConfig,
    observer: Arc<dyn LatencyObserver>,
}

impl<T: Transport> LogTransport<T> {
    /// Wraps `inner`, reporting latencies to the process-wide histogram.
    pub fn new(inner: T, config: LogConfig) -> Self {
        Self::with_observer(inner, config, request_latency_histogram())
    }

    pub fn with_observer(inner: T, config: LogConfig, observer: Arc<dyn LatencyObserver>) -> Self {
        Self {
            inner,
            config,
            observer,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let host = request.host();
        let request_headers =
            (self.config.access_log && self.config.include_headers)
                .then(|| request.headers().clone());

        let started_at = Instant::now();
        let outcome = self.inner.round_trip(request).await;
        let latency = started_at.elapsed();
        let latency_ms = latency.as_millis() as u64;

        let status = match &outcome {
            Ok(response) => response.status().as_u16().to_string(),
            Err(_) => TRANSPORT_ERROR_STATUS.to_owned(),
        };
        self.observer
            .observe(latency.as_secs_f64() * 1_000.0, method.as_str(), &status, &host);

        if self.config.slow_log && latency > self.config.slow_latency {
            if let Ok(response) = &outcome {
                if self.is_slow_log_status(response.status()) {
                    tracing::info!(
                        method = %method,
                        host = %host,
                        url = %url,
                        latency_ms,
                        "slow log"
                    );
                }
            }
        }

        if self.config.access_log {
            let error = outcome.as_ref().err().map(ToString::to_string);
            match request_headers {
                Some(request_headers) => {
                    let response_headers = outcome
                        .as_ref()
                        .map(|response| format_headers(response.headers()))
                        .unwrap_or_default();
                    tracing::info!(
                        method = %method,
                        host = %host,
                        url = %url,
                        status = %status,
                        latency_ms,
                        error = error.as_deref(),
                        req_headers = %format_headers(&request_headers),
                        resp_headers = %response_headers,
                        "access log"
                    );
                }
                None => {
                    tracing::info!(
                        method = %method,
                        host = %host,
                        url = %url,
                        status = %status,
                        latency_ms,
                        error = error.as_deref(),
                        "access log"
                    );
                }
            }
        }

        outcome
    }

    fn is_slow_log_status(&self, status: StatusCode) -> bool {
        status == StatusCode::OK
            || (status == StatusCode::NOT_FOUND && !self.config.ignore_not_found)
    }
}

impl<T: Transport> Transport for LogTransport<T> {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(self.execute(request))
    }
}

impl<T> fmt::Debug for LogTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Renders headers as `name: v1;v2` pairs separated by `, `.
pub(crate) fn format_headers(headers: &HeaderMap) -> String {
    let mut rendered = Vec::with_capacity(headers.keys_len());
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .map(|value| value.to_str().unwrap_or("<binary>"))
            .collect();
        rendered.push(format!("{}: {}", name, values.join(";")));
    }
    rendered.join(", ")
}
