use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::options::{proxy_url, ProxyFn};
use crate::{request::host_label, HttpError, Request, Response, Result};

/// Something that can perform one request/response exchange.
///
/// Implementations must be safe to call concurrently from many logical calls.
pub trait Transport: Send + Sync {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>>;
}

/// Type-erased transport shared between clients and decorators.
pub type SharedTransport = Arc<dyn Transport>;

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        (**self).round_trip(request)
    }
}

/// Base transport performing exactly one network attempt through `reqwest`.
///
/// Connection pooling, TLS, proxies, redirects and cookies are handled by
/// the wrapped [`reqwest::Client`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    host_limits: Option<Arc<HostLimiter>>,
    proxy_selector: Option<ProxyFn>,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("client", &self.client)
            .field("host_limits", &self.host_limits)
            .field("proxy_selector", &self.proxy_selector.is_some())
            .finish()
    }
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            host_limits: None,
            proxy_selector: None,
        }
    }

    /// Caps concurrent connections per host. `0` disables the cap.
    ///
    /// A permit is held from the start of an attempt until its response body
    /// is drained or dropped.
    pub fn with_max_conns_per_host(mut self, max: usize) -> Self {
        self.host_limits = (max > 0).then(|| Arc::new(HostLimiter::new(max)));
        self
    }

    /// Fails an attempt when `select` errors or picks an unsupported proxy,
    /// instead of letting the request go out without a proxy.
    pub fn with_proxy_selector(mut self, select: ProxyFn) -> Self {
        self.proxy_selector = Some(select);
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();

        if let Some(select) = &self.proxy_selector {
            if let Some((kind, addr)) = select(&parts.url).map_err(HttpError::transport_boxed)? {
                proxy_url(kind, &addr)?;
            }
        }

        let permit = match &self.host_limits {
            Some(limits) => Some(limits.acquire(&host_label(&parts.url)).await?),
            None => None,
        };

        let mut outgoing = reqwest::Request::new(parts.method, parts.url);
        *outgoing.headers_mut() = parts.headers;
        if let Some(body) = body {
            *outgoing.body_mut() = Some(body.into_reqwest());
        }

        tokio::select! {
            biased;
            err = parts.context.done() => Err(err),
            result = self.client.execute(outgoing) => {
                result
                    .map(|response| Response::from_reqwest(response, permit))
                    .map_err(HttpError::from)
            }
        }
    }
}

impl Transport for ReqwestTransport {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(self.execute(request))
    }
}

/// Per-host semaphores bounding concurrent connections.
///
/// Hosts with no outstanding permit are evicted on the next acquire.
#[derive(Debug)]
struct HostLimiter {
    max: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    fn new(max: usize) -> Self {
        Self {
            max,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            hosts.retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
            Arc::clone(
                hosts
                    .entry(host.to_owned())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.max))),
            )
        };
        semaphore.acquire_owned().await.map_err(HttpError::transport)
    }
}
