//! Retry decision policy: which outcomes are worth another attempt.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use reqwest::StatusCode;

use crate::{CallContext, HttpError, Response, Result};

/// Outcome of a retry check.
#[derive(Clone, Debug, Default)]
pub struct RetryDecision {
    /// Whether another attempt should be made.
    pub retry: bool,
    /// Error describing why, when the policy has one to report.
    pub error: Option<HttpError>,
}

impl RetryDecision {
    pub fn retry() -> Self {
        Self {
            retry: true,
            error: None,
        }
    }

    pub fn stop() -> Self {
        Self::default()
    }

    pub fn with_error(mut self, error: HttpError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Decides from `(context, last_outcome)` whether to retry.
pub type CheckRetryFn = Arc<dyn Fn(&CallContext, &Result<Response>) -> RetryDecision + Send + Sync>;

/// Default policy: retries connection errors, 429 and 5xx responses except
/// 501, and never retries a cancelled or expired call.
pub fn default_retry_policy(ctx: &CallContext, outcome: &Result<Response>) -> RetryDecision {
    if let Some(err) = ctx.err() {
        return RetryDecision::stop().with_error(err);
    }

    match outcome {
        Err(err) if is_permanent_error(err) => RetryDecision::stop().with_error(err.clone()),
        Err(_) => RetryDecision::retry(),
        Ok(response) => classify_status(response.status()),
    }
}

/// Classifies a response status for retry purposes.
pub fn classify_status(status: StatusCode) -> RetryDecision {
    let code = status.as_u16();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RetryDecision::retry();
    }
    if code >= 500 && status != StatusCode::NOT_IMPLEMENTED {
        return RetryDecision::retry().with_error(HttpError::UnexpectedStatus { status: code });
    }
    RetryDecision::stop()
}

/// Returns `true` for errors another attempt cannot fix: exhausted redirects,
/// unsupported URL schemes and untrusted certificates, plus configuration
/// and cancellation errors.
pub fn is_permanent_error(err: &HttpError) -> bool {
    match err {
        HttpError::Config(_) | HttpError::Cancelled | HttpError::DeadlineExceeded => true,
        HttpError::Transport(_) => {
            if err
                .as_reqwest()
                .is_some_and(|inner| inner.is_redirect() || inner.is_builder())
            {
                return true;
            }
            err.messages().iter().any(|message| {
                redirect_error().is_match(message)
                    || scheme_error().is_match(message)
                    || untrusted_error().is_match(message)
            })
        }
        HttpError::UnexpectedStatus { .. } | HttpError::Decode(_) => false,
    }
}

// The underlying errors are untyped, so they are matched on their messages.

fn redirect_error() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"stopped after \d+ redirects\z|too many redirects")
            .expect("redirect pattern is valid")
    })
}

fn scheme_error() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"unsupported protocol scheme|URL scheme is not allowed")
            .expect("scheme pattern is valid")
    })
}

fn untrusted_error() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)certificate is not trusted|unknown (certificate )?authority|UnknownIssuer|invalid peer certificate|certificate verify failed",
        )
        .expect("certificate pattern is valid")
    })
}
