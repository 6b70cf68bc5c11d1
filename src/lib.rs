//! `layered-http` is an async HTTP client that runs every call through a
//! chain of transports: latency logging, then retry with backoff, then a
//! pooled `reqwest` connection layer.
//!
//! - [`HttpClient`] builds and sends requests, with default headers and
//!   options that can be changed at runtime.
//! - [`RetryTransport`] replays the buffered request body on each attempt
//!   and waits between attempts according to a pluggable backoff.
//! - [`LogTransport`] records call latency into [`metrics`] and writes slow
//!   and access log events through `tracing`.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use layered_http::{HttpClient, RetryConfig};
//!
//! # async fn run() -> layered_http::Result<()> {
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .retry(RetryConfig::new().with_max_attempts(5))
//!     .user_agent("inventory-sync/1.0")
//!     .build()?;
//!
//! let response = client
//!     .get("https://api.example.com/items")
//!     .query(&[("page", "1")])
//!     .send()
//!     .await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod body;
mod chain;
mod client;
mod context;
mod default;
mod error;
mod log;
mod options;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub mod backoff;
pub mod metrics;
pub mod policy;

pub use body::Body;
pub use chain::{build_base_transport, build_chain, layer};
pub use client::{ClientBuilder, HttpClient, RequestBuilder};
pub use context::CallContext;
pub use default::{
    default_client, delete, get, get_len, head, patch, patch_json, post, post_json, put, put_json,
};
pub use error::{BoxError, HttpError};
pub use log::{LogConfig, LogTransport, DEFAULT_SLOW_LATENCY};
pub use options::{
    ClientOptions, CookieJar, Proxy, ProxyFn, ProxyKind, RedirectFn, RedirectPolicy, RequestHook,
    ResponseHook, TlsOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONNS_PER_HOST,
    DEFAULT_MAX_IDLE_CONNS_PER_HOST, DEFAULT_POOL_IDLE_TIMEOUT, DEFAULT_TIMEOUT,
};
pub use request::{Parts, Request};
pub use response::Response;
pub use retry::{
    RetryConfig, RetryErrorFn, RetryTransport, DEFAULT_RETRY_MAX_COUNT, DEFAULT_RETRY_MAX_WAIT,
    DEFAULT_RETRY_MIN_WAIT,
};
pub use transport::{ReqwestTransport, SharedTransport, Transport};
pub use util::{append_params, content_type, real_host, real_ip, real_port};

pub use reqwest::{Method, StatusCode, Url};

pub type Result<T> = std::result::Result<T, HttpError>;
