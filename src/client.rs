use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, PROXY_AUTHORIZATION,
    REFERER, USER_AGENT,
};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;

use crate::chain::build_chain;
use crate::log::format_headers;
use crate::options::{CookieJar, Proxy, RedirectPolicy, RequestHook, ResponseHook, TlsOptions};
use crate::request::{host_label, Parts};
use crate::util::{append_params, content_type};
use crate::{
    Body, CallContext, ClientOptions, HttpError, LogConfig, Request, Response, Result, RetryConfig,
    SharedTransport,
};

const BODY_PREVIEW_LIMIT: usize = 1024;

/// HTTP client running every call through the retry and logging chain.
///
/// Cloning is cheap; clones share headers, options and connection pools.
/// Default headers and options may be changed while calls are in flight:
/// each call works on a snapshot taken when it is sent.
#[derive(Clone)]
pub struct HttpClient {
    state: Arc<RwLock<ClientState>>,
    jar: Arc<Jar>,
}

struct ClientState {
    options: ClientOptions,
    headers: HeaderMap,
    transport: SharedTransport,
}

/// Per-call view of the client configuration.
struct Snapshot {
    options: ClientOptions,
    headers: HeaderMap,
    transport: SharedTransport,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("HttpClient")
            .field("headers", &redacted_headers(&state.headers))
            .field("options", &state.options)
            .finish()
    }
}

impl HttpClient {
    /// Creates a client with default options.
    pub fn new() -> Result<Self> {
        Self::with_options(ClientOptions::default())
    }

    /// Creates a client, validating `options` and building the transport chain.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        Self::from_parts(options, HeaderMap::new())
    }

    /// Creates a client from `HTTP_CLIENT_*` environment variables.
    ///
    /// See [`ClientOptions::from_env`] for the variables read.
    pub fn from_env() -> Result<Self> {
        Self::with_options(ClientOptions::from_env()?)
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    fn from_parts(options: ClientOptions, headers: HeaderMap) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let transport = build_chain(&options, &jar)?;
        Ok(Self {
            state: Arc::new(RwLock::new(ClientState {
                options,
                headers,
                transport,
            })),
            jar,
        })
    }

    /// Sets a default header sent with every call.
    pub fn set_header(&self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<()> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.headers.insert(name, value);
        Ok(())
    }

    /// Merges `headers` into the default headers, replacing existing names.
    pub fn set_headers(&self, headers: HeaderMap) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        merge_headers(&mut state.headers, headers);
    }

    pub fn remove_header(&self, name: impl AsRef<str>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.headers.remove(name.as_ref());
    }

    pub fn set_referer(&self, value: impl AsRef<str>) -> Result<()> {
        self.set_header(REFERER.as_str(), value)
    }

    pub fn set_user_agent(&self, value: impl AsRef<str>) -> Result<()> {
        self.set_header(USER_AGENT.as_str(), value)
    }

    pub fn set_content_type(&self, value: impl AsRef<str>) -> Result<()> {
        self.set_header(CONTENT_TYPE.as_str(), value)
    }

    /// Changes the client options and rebuilds the transport chain.
    ///
    /// The change is applied only if the new options are valid; calls already
    /// in flight keep the chain they started with.
    pub fn update_options<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut ClientOptions),
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut options = state.options.clone();
        update(&mut options);
        let transport = build_chain(&options, &self.jar)?;
        state.options = options;
        state.transport = transport;
        Ok(())
    }

    pub fn options(&self) -> ClientOptions {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .options
            .clone()
    }

    pub fn headers(&self) -> HeaderMap {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .headers
            .clone()
    }

    /// The current outermost transport of the chain.
    pub fn transport(&self) -> SharedTransport {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner).transport)
    }

    /// Jar used when the options select [`CookieJar::Default`].
    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            options: state.options.clone(),
            headers: state.headers.clone(),
            transport: Arc::clone(&state.transport),
        }
    }

    pub fn request(&self, method: Method, url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url.as_ref())
    }

    pub fn head(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    pub fn get(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    pub fn options_request(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::OPTIONS, url)
    }

    pub fn connect(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::CONNECT, url)
    }

    pub fn trace(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::TRACE, url)
    }

    /// Issues a `HEAD` request and returns the advertised `Content-Length`.
    pub async fn get_len(&self, url: impl AsRef<str>) -> Result<u64> {
        let response = self.head(url).send().await?;
        response.content_length().ok_or_else(|| {
            HttpError::Decode(format!(
                "missing or invalid Content-Length (status {})",
                response.status()
            ))
        })
    }
}

/// Chainable construction of an [`HttpClient`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    options: ClientOptions,
    headers: HeaderMap,
    error: Option<HttpError>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every option at once.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.options.timeout = None;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Some(timeout);
        self
    }

    pub fn deadline_timeout(mut self, timeout: Duration) -> Self {
        self.options.deadline_timeout = Some(timeout);
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.options.proxy = Some(proxy);
        self
    }

    pub fn max_idle_conns_per_host(mut self, max: usize) -> Self {
        self.options.max_idle_conns_per_host = max;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.pool_idle_timeout = timeout;
        self
    }

    pub fn max_conns_per_host(mut self, max: usize) -> Self {
        self.options.max_conns_per_host = max;
        self
    }

    pub fn insecure_tls(mut self, insecure: bool) -> Self {
        self.options.insecure_tls = insecure;
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.options.tls = Some(tls);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.options.log = log;
        self
    }

    pub fn cookie_jar(mut self, jar: CookieJar) -> Self {
        self.options.cookie_jar = jar;
        self
    }

    pub fn redirect(mut self, policy: RedirectPolicy) -> Self {
        self.options.redirect = policy;
        self
    }

    pub fn request_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        let hook: RequestHook = Arc::new(hook);
        self.options.request_hook = Some(hook);
        self
    }

    pub fn response_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(std::result::Result<&Response, &HttpError>) + Send + Sync + 'static,
    {
        let hook: ResponseHook = Arc::new(hook);
        self.options.response_hook = Some(hook);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match parse_header(name.as_ref(), value.as_ref()) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    pub fn user_agent(self, value: impl AsRef<str>) -> Self {
        self.header(USER_AGENT.as_str(), value)
    }

    pub fn build(self) -> Result<HttpClient> {
        if let Some(err) = self.error {
            return Err(err);
        }
        HttpClient::from_parts(self.options, self.headers)
    }
}

/// A single call being assembled; nothing is sent until [`RequestBuilder::send`].
#[derive(Debug)]
pub struct RequestBuilder {
    client: HttpClient,
    method: Method,
    url: Result<Url>,
    headers: HeaderMap,
    cookies: Vec<(String, String)>,
    body: Option<Body>,
    timeout: Option<Duration>,
    context: Option<CallContext>,
    error: Option<HttpError>,
}

impl RequestBuilder {
    fn new(client: HttpClient, method: Method, url: &str) -> Self {
        let url = Url::parse(url)
            .map_err(|err| HttpError::config(format!("invalid URL {url:?}: {err}")));
        Self {
            client,
            method,
            url,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: None,
            timeout: None,
            context: None,
            error: None,
        }
    }

    /// Sets a header for this call, overriding a client default of the same name.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match parse_header(name.as_ref(), value.as_ref()) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        merge_headers(&mut self.headers, headers);
        self
    }

    pub fn referer(self, value: impl AsRef<str>) -> Self {
        self.header(REFERER.as_str(), value)
    }

    pub fn user_agent(self, value: impl AsRef<str>) -> Self {
        self.header(USER_AGENT.as_str(), value)
    }

    pub fn content_type(self, value: impl AsRef<str>) -> Self {
        self.header(CONTENT_TYPE.as_str(), value)
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Appends query parameters to the URL.
    pub fn query<K, V>(mut self, params: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if let Ok(url) = &mut self.url {
            append_params(url, params);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type: application/json`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.body = Some(bytes.into());
                self.headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(content_type::APPLICATION_JSON),
                );
            }
            Err(err) => self.fail(HttpError::Decode(format!("failed to encode JSON body: {err}"))),
        }
        self
    }

    /// Sends `params` URL-encoded with `Content-Type: application/x-www-form-urlencoded`.
    pub fn form<K, V>(mut self, params: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(key, value)| (key.as_ref(), value.as_ref())))
            .finish();
        self.body = Some(encoded.into());
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(content_type::APPLICATION_FORM),
        );
        self
    }

    /// Overrides the client's whole-call timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Ties the call to a caller-owned cancellation context.
    pub fn context(mut self, context: CallContext) -> Self {
        self.context = Some(context);
        self
    }

    fn fail(&mut self, err: HttpError) {
        self.error.get_or_insert(err);
    }

    /// Sends the call through the transport chain.
    pub async fn send(self) -> Result<Response> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let url = self.url?;
        let snapshot = self.client.snapshot();
        let options = &snapshot.options;

        let mut headers = snapshot.headers;
        merge_headers(&mut headers, self.headers);

        if !self.cookies.is_empty() {
            attach_cookies(
                &mut headers,
                &self.cookies,
                &options.cookie_jar,
                &self.client.jar,
                &url,
            )?;
        }

        let mut context = self.context.unwrap_or_default();
        if let Some(timeout) = self.timeout.or(options.timeout) {
            context = context.with_timeout(timeout);
        }

        let body_preview = self.body.as_ref().map(body_preview).unwrap_or_default();
        let method = self.method;
        let request_headers = headers.clone();
        let request = Request::from_parts(
            Parts {
                method: method.clone(),
                url: url.clone(),
                headers,
                context,
            },
            self.body,
        );

        if options.debug {
            tracing::debug!(
                method = %method,
                url = %url,
                headers = %format_headers(&redacted_headers(&request_headers)),
                body = %body_preview,
                "http client request"
            );
        }
        if let Some(hook) = &options.request_hook {
            hook(&request);
        }

        let outcome = snapshot.transport.round_trip(request).await;

        let status = outcome.as_ref().ok().map(Response::status);
        if status != Some(StatusCode::OK) {
            let error = outcome.as_ref().err().map(ToString::to_string);
            tracing::warn!(
                method = %method,
                host = %host_label(&url),
                url = %url,
                body = %body_preview,
                req_headers = %format_headers(&redacted_headers(&request_headers)),
                status = status.map(|status| status.as_u16()),
                error = error.as_deref(),
                "http client abnormal log"
            );
        }

        if let Some(hook) = &options.response_hook {
            hook(outcome.as_ref());
        }

        outcome
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|err| HttpError::config(format!("invalid header name {name:?}: {err}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|err| HttpError::config(format!("invalid value for header {name:?}: {err}")))?;
    Ok((header_name, header_value))
}

/// Replaces every header of `target` whose name appears in `overrides`.
fn merge_headers(target: &mut HeaderMap, overrides: HeaderMap) {
    let mut current: Option<HeaderName> = None;
    for (name, value) in overrides {
        if let Some(name) = name {
            target.remove(&name);
            current = Some(name);
        }
        if let Some(name) = &current {
            target.append(name.clone(), value);
        }
    }
}

fn attach_cookies(
    headers: &mut HeaderMap,
    cookies: &[(String, String)],
    jar: &CookieJar,
    default_jar: &Jar,
    url: &Url,
) -> Result<()> {
    let pairs: Vec<String> = cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();

    match jar {
        CookieJar::Default => {
            for pair in &pairs {
                default_jar.add_cookie_str(pair, url);
            }
        }
        CookieJar::Custom(store) => {
            let values = pairs
                .iter()
                .map(|pair| {
                    HeaderValue::from_str(pair)
                        .map_err(|err| HttpError::config(format!("invalid cookie {pair:?}: {err}")))
                })
                .collect::<Result<Vec<_>>>()?;
            store.set_cookies(&mut values.iter(), url);
        }
        CookieJar::Disabled => {
            let value = HeaderValue::from_str(&pairs.join("; "))
                .map_err(|err| HttpError::config(format!("invalid cookie header: {err}")))?;
            headers.append(COOKIE, value);
        }
    }
    Ok(())
}

fn body_preview(body: &Body) -> String {
    match body.as_bytes() {
        Some(bytes) if bytes.len() > BODY_PREVIEW_LIMIT => format!(
            "{}... ({} bytes)",
            String::from_utf8_lossy(&bytes[..BODY_PREVIEW_LIMIT]),
            bytes.len()
        ),
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => "<stream>".to_owned(),
    }
}

fn redacted_headers(headers: &HeaderMap) -> HeaderMap {
    let mut redacted = headers.clone();
    for name in [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE] {
        if redacted.contains_key(&name) {
            redacted.insert(name, HeaderValue::from_static("<redacted>"));
        }
    }
    redacted
}
