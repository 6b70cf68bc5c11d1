use bytes::Bytes;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::{Body, HttpError, Result};

/// Response produced by a [`Transport`](crate::Transport).
///
/// The body is single-use: read it with [`Response::bytes`], [`Response::text`]
/// or [`Response::json`], or drop the response to release the connection.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Option<Url>,
    body: Body,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Body>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            url: None,
            body: body.into(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Converts a network response; `guard` is held until its body is drained or dropped.
    pub(crate) fn from_reqwest<G>(response: reqwest::Response, guard: G) -> Self
    where
        G: Send + Unpin + 'static,
    {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body =
            Body::from_stream_guarded(response.bytes_stream().map_err(HttpError::from), guard);
        Self {
            status,
            headers,
            url: Some(url),
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Final URL after redirects, when the response came from the network.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Value of the `Content-Length` header, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Reads the whole (already transfer-decoded) body.
    pub async fn bytes(self) -> Result<Bytes> {
        self.body.collect().await
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let status = self.status;
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            HttpError::Decode(format!(
                "invalid JSON response (status {status}): {err}; body: {}",
                String::from_utf8_lossy(&bytes)
            ))
        })
    }
}
