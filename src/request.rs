use reqwest::header::HeaderMap;
use reqwest::{Method, Url};

use crate::{Body, CallContext};

/// Everything about an outgoing request except its body.
#[derive(Clone, Debug)]
pub struct Parts {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub context: CallContext,
}

/// Outgoing request handed to a [`Transport`](crate::Transport).
#[derive(Debug)]
pub struct Request {
    parts: Parts,
    body: Option<Body>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            parts: Parts {
                method,
                url,
                headers: HeaderMap::new(),
                context: CallContext::new(),
            },
            body: None,
        }
    }

    pub fn from_parts(parts: Parts, body: Option<Body>) -> Self {
        Self { parts, body }
    }

    pub fn into_parts(self) -> (Parts, Option<Body>) {
        (self.parts, self.body)
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.parts.context = context;
        self
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn url(&self) -> &Url {
        &self.parts.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn context(&self) -> &CallContext {
        &self.parts.context
    }

    /// Host and explicit port of the target URL, used as a metric and log label.
    pub fn host(&self) -> String {
        host_label(&self.parts.url)
    }
}

pub(crate) fn host_label(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_owned(),
        (None, _) => String::new(),
    }
}
