//! Builds the transport chain: `reqwest` base → retry → log.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::{redirect, Url};

use crate::options::{proxy_url, CookieJar, Proxy, RedirectPolicy};
use crate::{
    ClientOptions, HttpError, LogConfig, LogTransport, ReqwestTransport, Result, RetryConfig,
    RetryTransport, SharedTransport, Transport,
};

/// Validates `options` and builds the full chain around a fresh `reqwest` client.
///
/// `default_jar` backs [`CookieJar::Default`] so that cookies survive chain
/// rebuilds.
pub fn build_chain(options: &ClientOptions, default_jar: &Arc<Jar>) -> Result<SharedTransport> {
    options.validate()?;
    let base = build_base_transport(options, default_jar)?;
    Ok(layer(base, options.retry.clone(), options.log.clone()))
}

/// Wraps any base transport with the retrying and logging decorators.
pub fn layer<T>(base: T, retry: RetryConfig, log: LogConfig) -> SharedTransport
where
    T: Transport + 'static,
{
    let retrying = RetryTransport::new(base, retry);
    Arc::new(LogTransport::new(retrying, log))
}

/// Builds the single-attempt `reqwest` transport described by `options`.
pub fn build_base_transport(
    options: &ClientOptions,
    default_jar: &Arc<Jar>,
) -> Result<ReqwestTransport> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(options.max_idle_conns_per_host)
        .pool_idle_timeout(options.pool_idle_timeout)
        .danger_accept_invalid_certs(options.insecure_tls)
        .redirect(redirect_policy(&options.redirect));

    if let Some(connect_timeout) = options.effective_connect_timeout() {
        builder = builder.connect_timeout(connect_timeout);
    }
    if let Some(deadline_timeout) = options.deadline_timeout {
        builder = builder.timeout(deadline_timeout);
    }

    match &options.proxy {
        Some(Proxy::Address { kind, addr }) => {
            let url = proxy_url(*kind, addr)?;
            let proxy = reqwest::Proxy::all(url)
                .map_err(|err| HttpError::config(format!("invalid proxy: {err}")))?;
            builder = builder.proxy(proxy);
        }
        Some(Proxy::Custom(select)) => {
            let select = Arc::clone(select);
            // Selection errors are surfaced per attempt by the base transport.
            builder = builder.proxy(reqwest::Proxy::custom(move |url| {
                select(url)
                    .ok()
                    .flatten()
                    .and_then(|(kind, addr)| proxy_url(kind, &addr).ok())
            }));
        }
        None => {}
    }

    if let Some(tls) = &options.tls {
        builder = builder.tls_built_in_root_certs(tls.built_in_roots);
        for certificate in &tls.root_certificates {
            builder = builder.add_root_certificate(certificate.clone());
        }
        if let Some(version) = tls.min_version {
            builder = builder.min_tls_version(version);
        }
    }

    match &options.cookie_jar {
        CookieJar::Disabled => {}
        CookieJar::Default => builder = builder.cookie_provider(Arc::clone(default_jar)),
        CookieJar::Custom(store) => {
            builder = builder.cookie_provider(Arc::new(SharedCookieStore(Arc::clone(store))))
        }
    }

    let client = builder
        .build()
        .map_err(|err| HttpError::config(format!("failed to build HTTP client: {err}")))?;

    let mut transport =
        ReqwestTransport::new(client).with_max_conns_per_host(options.max_conns_per_host);
    if let Some(Proxy::Custom(select)) = &options.proxy {
        transport = transport.with_proxy_selector(Arc::clone(select));
    }
    Ok(transport)
}

fn redirect_policy(policy: &RedirectPolicy) -> redirect::Policy {
    match policy {
        RedirectPolicy::Default => redirect::Policy::default(),
        RedirectPolicy::None => redirect::Policy::none(),
        RedirectPolicy::Limited(max) => redirect::Policy::limited(*max),
        RedirectPolicy::Custom(check) => {
            let check = Arc::clone(check);
            redirect::Policy::custom(move |attempt| {
                match check(attempt.url(), attempt.previous()) {
                    Ok(()) => attempt.follow(),
                    Err(err) => attempt.error(err),
                }
            })
        }
    }
}

/// Adapts a type-erased cookie store to `reqwest`'s sized provider parameter.
struct SharedCookieStore(Arc<dyn CookieStore>);

impl CookieStore for SharedCookieStore {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.0.set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.0.cookies(url)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use reqwest::cookie::Jar;

    use super::build_chain;
    use crate::options::{CookieJar, Proxy, ProxyKind, RedirectPolicy};
    use crate::{ClientOptions, HttpError};

    #[test]
    fn builds_with_every_pass_through_option() {
        let options = ClientOptions {
            deadline_timeout: Some(Duration::from_secs(3)),
            proxy: Some(Proxy::custom(|_| Ok(None))),
            max_conns_per_host: 4,
            insecure_tls: true,
            cookie_jar: CookieJar::Custom(Arc::new(Jar::default())),
            redirect: RedirectPolicy::Limited(2),
            ..ClientOptions::default()
        };
        assert!(build_chain(&options, &Arc::new(Jar::default())).is_ok());
    }

    #[test]
    fn invalid_proxy_aborts_construction() {
        let options = ClientOptions {
            proxy: Some(Proxy::Address {
                kind: ProxyKind::Socks4,
                addr: "127.0.0.1:1080".to_owned(),
            }),
            ..ClientOptions::default()
        };
        let err = build_chain(&options, &Arc::new(Jar::default()))
            .err()
            .expect("socks proxy must be rejected");
        assert!(matches!(err, HttpError::Config(_)));
    }
}
