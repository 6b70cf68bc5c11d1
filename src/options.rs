use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::CookieStore;
use reqwest::{Certificate, Url};

use crate::error::BoxError;
use crate::{HttpError, LogConfig, Request, Response, Result, RetryConfig};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 50;
pub const DEFAULT_MAX_CONNS_PER_HOST: usize = 200;
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Proxy protocol requested for a proxy address.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProxyKind {
    #[default]
    Http,
    Socks4,
    Socks5,
    Socks4a,
}

/// Picks a proxy per request URL; `Ok(None)` connects directly.
pub type ProxyFn =
    Arc<dyn Fn(&Url) -> std::result::Result<Option<(ProxyKind, String)>, BoxError> + Send + Sync>;

#[derive(Clone)]
pub enum Proxy {
    /// Fixed proxy, `host:port` or a full URL.
    Address { kind: ProxyKind, addr: String },
    Custom(ProxyFn),
}

impl Proxy {
    pub fn http(addr: impl Into<String>) -> Self {
        Self::Address {
            kind: ProxyKind::Http,
            addr: addr.into(),
        }
    }

    pub fn custom<F>(select: F) -> Self
    where
        F: Fn(&Url) -> std::result::Result<Option<(ProxyKind, String)>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom(Arc::new(select))
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address { kind, addr } => f
                .debug_struct("Address")
                .field("kind", kind)
                .field("addr", addr)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Resolves a proxy address into a URL, defaulting the scheme to `http://`.
pub(crate) fn proxy_url(kind: ProxyKind, addr: &str) -> Result<Url> {
    if kind != ProxyKind::Http {
        return Err(HttpError::config(format!(
            "only http proxies are supported, got {kind:?}"
        )));
    }
    let addr = addr.trim();
    let full = if addr.contains("://") {
        addr.to_owned()
    } else {
        format!("http://{addr}")
    };
    Url::parse(&full)
        .map_err(|err| HttpError::config(format!("invalid proxy address {addr:?}: {err}")))
}

/// TLS settings passed through to the base transport.
#[derive(Clone, Debug)]
pub struct TlsOptions {
    /// Extra trusted root certificates.
    pub root_certificates: Vec<Certificate>,
    /// Whether the bundled web PKI roots stay trusted.
    pub built_in_roots: bool,
    pub min_version: Option<reqwest::tls::Version>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            root_certificates: Vec::new(),
            built_in_roots: true,
            min_version: None,
        }
    }
}

#[derive(Clone, Default)]
pub enum CookieJar {
    #[default]
    Disabled,
    /// The client's own in-memory jar, kept for the client's lifetime.
    Default,
    Custom(Arc<dyn CookieStore>),
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Default => f.write_str("Default"),
            Self::Custom(_) => f.write_str("Custom(<store>)"),
        }
    }
}

/// Decides whether to follow a redirect to `next`, given the URLs visited so far.
pub type RedirectFn = Arc<dyn Fn(&Url, &[Url]) -> std::result::Result<(), BoxError> + Send + Sync>;

#[derive(Clone, Default)]
pub enum RedirectPolicy {
    /// Follow up to 10 redirects.
    #[default]
    Default,
    None,
    Limited(usize),
    Custom(RedirectFn),
}

impl RedirectPolicy {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&Url, &[Url]) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(check))
    }
}

impl fmt::Debug for RedirectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::None => f.write_str("None"),
            Self::Limited(max) => f.debug_tuple("Limited").field(max).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Called with every outgoing request just before it enters the transport chain.
pub type RequestHook = Arc<dyn Fn(&Request) + Send + Sync>;
/// Called with the outcome of every call.
pub type ResponseHook = Arc<dyn Fn(std::result::Result<&Response, &HttpError>) + Send + Sync>;

/// Client and transport configuration.
#[derive(Clone)]
pub struct ClientOptions {
    /// Bound on a whole logical call, retries and waits included.
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Bound on a single network attempt.
    pub deadline_timeout: Option<Duration>,
    pub proxy: Option<Proxy>,
    pub max_idle_conns_per_host: usize,
    pub pool_idle_timeout: Option<Duration>,
    /// `0` leaves concurrent connections per host unbounded.
    pub max_conns_per_host: usize,
    /// Accept any server certificate.
    pub insecure_tls: bool,
    pub tls: Option<TlsOptions>,
    pub retry: RetryConfig,
    pub log: LogConfig,
    pub cookie_jar: CookieJar,
    pub redirect: RedirectPolicy,
    pub request_hook: Option<RequestHook>,
    pub response_hook: Option<ResponseHook>,
    /// Dump outgoing requests at debug level.
    pub debug: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            deadline_timeout: None,
            proxy: None,
            max_idle_conns_per_host: DEFAULT_MAX_IDLE_CONNS_PER_HOST,
            pool_idle_timeout: Some(DEFAULT_POOL_IDLE_TIMEOUT),
            max_conns_per_host: DEFAULT_MAX_CONNS_PER_HOST,
            insecure_tls: false,
            tls: None,
            retry: RetryConfig::default(),
            log: LogConfig::default(),
            cookie_jar: CookieJar::Disabled,
            redirect: RedirectPolicy::Default,
            request_hook: None,
            response_hook: None,
            debug: false,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("deadline_timeout", &self.deadline_timeout)
            .field("proxy", &self.proxy)
            .field("max_idle_conns_per_host", &self.max_idle_conns_per_host)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("max_conns_per_host", &self.max_conns_per_host)
            .field("insecure_tls", &self.insecure_tls)
            .field("tls", &self.tls)
            .field("retry", &self.retry)
            .field("log", &self.log)
            .field("cookie_jar", &self.cookie_jar)
            .field("redirect", &self.redirect)
            .field("request_hook", &self.request_hook.is_some())
            .field("response_hook", &self.response_hook.is_some())
            .field("debug", &self.debug)
            .finish()
    }
}

impl ClientOptions {
    /// Builds options from the environment on top of the defaults.
    ///
    /// Reads:
    /// - `HTTP_CLIENT_TIMEOUT_MS`: whole-call timeout, `0` disables it
    /// - `HTTP_CLIENT_CONNECT_TIMEOUT_MS`: connect timeout, `0` disables it
    /// - `HTTP_CLIENT_PROXY`: HTTP proxy address
    /// - `HTTP_CLIENT_INSECURE_TLS`: `true`/`1` to skip certificate checks
    /// - `HTTP_CLIENT_RETRY_MAX`: total attempts per call
    ///
    /// Unset variables keep their defaults; malformed ones are configuration errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "HTTP_CLIENT_TIMEOUT_MS")? {
            options.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "HTTP_CLIENT_CONNECT_TIMEOUT_MS")? {
            options.connect_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(addr) = lookup("HTTP_CLIENT_PROXY").filter(|value| !value.trim().is_empty()) {
            options.proxy = Some(Proxy::http(addr));
        }
        if let Some(raw) = lookup("HTTP_CLIENT_INSECURE_TLS") {
            options.insecure_tls = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(HttpError::config(format!(
                        "HTTP_CLIENT_INSECURE_TLS must be a boolean, got {other:?}"
                    )))
                }
            };
        }
        if let Some(max) = parse_var::<u32, _>(&lookup, "HTTP_CLIENT_RETRY_MAX")? {
            options.retry = options.retry.with_max_attempts(max);
        }

        options.validate()?;
        Ok(options)
    }

    /// Connect timeout actually applied: never longer than the call timeout.
    pub fn effective_connect_timeout(&self) -> Option<Duration> {
        match (self.timeout, self.connect_timeout) {
            (Some(timeout), None) => Some(timeout),
            (Some(timeout), Some(connect)) if connect > timeout || connect.is_zero() => {
                Some(timeout)
            }
            (_, connect) => connect.filter(|connect| !connect.is_zero()),
        }
    }

    /// Checks every option that can be checked before a request is sent.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;

        if let Some(Proxy::Address { kind, addr }) = &self.proxy {
            proxy_url(*kind, addr)?;
        }
        if matches!(self.timeout, Some(timeout) if timeout.is_zero()) {
            return Err(HttpError::config("timeout must be greater than zero"));
        }
        if matches!(self.deadline_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(HttpError::config("deadline timeout must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| HttpError::config(format!("{key} is invalid ({raw:?}): {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{
        proxy_url, ClientOptions, Proxy, ProxyKind, DEFAULT_MAX_CONNS_PER_HOST, DEFAULT_TIMEOUT,
    };
    use crate::{HttpError, RetryConfig};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let options = ClientOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(options.max_conns_per_host, DEFAULT_MAX_CONNS_PER_HOST);
        assert_eq!(options.retry.max_attempts(), 3);
        assert!(options.log.slow_log);
        assert!(!options.log.access_log);
    }

    #[test]
    fn proxy_address_gets_http_scheme() {
        let url = proxy_url(ProxyKind::Http, "10.0.0.1:3128").expect("valid proxy");
        assert_eq!(url.as_str(), "http://10.0.0.1:3128/");

        let url = proxy_url(ProxyKind::Http, "https://proxy.internal:443").expect("valid proxy");
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn non_http_proxy_kinds_are_rejected() {
        let options = ClientOptions {
            proxy: Some(Proxy::Address {
                kind: ProxyKind::Socks5,
                addr: "127.0.0.1:1080".to_owned(),
            }),
            ..ClientOptions::default()
        };
        assert!(matches!(options.validate(), Err(HttpError::Config(_))));
    }

    #[test]
    fn zero_attempts_is_a_config_error() {
        let options = ClientOptions {
            retry: RetryConfig::new().with_max_attempts(0),
            ..ClientOptions::default()
        };
        assert!(matches!(options.validate(), Err(HttpError::Config(_))));
    }

    #[test]
    fn connect_timeout_is_clamped_to_timeout() {
        let options = ClientOptions {
            timeout: Some(Duration::from_secs(5)),
            connect_timeout: Some(Duration::from_secs(30)),
            ..ClientOptions::default()
        };
        assert_eq!(options.effective_connect_timeout(), Some(Duration::from_secs(5)));

        let options = ClientOptions {
            timeout: Some(Duration::from_secs(5)),
            connect_timeout: Some(Duration::ZERO),
            ..ClientOptions::default()
        };
        assert_eq!(options.effective_connect_timeout(), Some(Duration::from_secs(5)));

        let options = ClientOptions {
            timeout: None,
            connect_timeout: Some(Duration::from_secs(2)),
            ..ClientOptions::default()
        };
        assert_eq!(options.effective_connect_timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn env_overrides_defaults() {
        let options = ClientOptions::from_lookup(lookup(&[
            ("HTTP_CLIENT_TIMEOUT_MS", "1500"),
            ("HTTP_CLIENT_CONNECT_TIMEOUT_MS", "0"),
            ("HTTP_CLIENT_PROXY", "proxy.local:8080"),
            ("HTTP_CLIENT_INSECURE_TLS", "true"),
            ("HTTP_CLIENT_RETRY_MAX", "5"),
        ]))
        .expect("valid env");

        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.connect_timeout, None);
        assert!(matches!(
            options.proxy,
            Some(Proxy::Address { ref addr, .. }) if addr == "proxy.local:8080"
        ));
        assert!(options.insecure_tls);
        assert_eq!(options.retry.max_attempts(), 5);
    }

    #[test]
    fn malformed_env_is_rejected() {
        let err = ClientOptions::from_lookup(lookup(&[("HTTP_CLIENT_TIMEOUT_MS", "soon")]))
            .expect_err("non-numeric timeout");
        assert!(err.to_string().contains("HTTP_CLIENT_TIMEOUT_MS"));

        let err = ClientOptions::from_lookup(lookup(&[("HTTP_CLIENT_RETRY_MAX", "0")]))
            .expect_err("zero attempts");
        assert!(matches!(err, HttpError::Config(_)));

        let insecure = lookup(&[("HTTP_CLIENT_INSECURE_TLS", "maybe")]);
        assert!(ClientOptions::from_lookup(insecure).is_err());
    }
}
