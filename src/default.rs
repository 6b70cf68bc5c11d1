//! Process-wide client and one-shot helpers built on it.
//!
//! ```no_run
//! # async fn run() -> layered_http::Result<()> {
//! let body = layered_http::get("https://example.com/").await?.text().await?;
//! println!("{body}");
//! # Ok(())
//! # }
//! ```

use std::sync::OnceLock;

use serde::Serialize;

use crate::{Body, HttpClient, Response, Result};

/// Shared client with default options, created on first use.
///
/// Header and option changes made through the returned handle apply to every
/// later call of the helpers in this module.
pub fn default_client() -> Result<HttpClient> {
    static CLIENT: OnceLock<Result<HttpClient>> = OnceLock::new();
    CLIENT.get_or_init(HttpClient::new).clone()
}

pub async fn head(url: impl AsRef<str>) -> Result<Response> {
    default_client()?.head(url).send().await
}

pub async fn get(url: impl AsRef<str>) -> Result<Response> {
    default_client()?.get(url).send().await
}

pub async fn get_len(url: impl AsRef<str>) -> Result<u64> {
    default_client()?.get_len(url).await
}

pub async fn post(url: impl AsRef<str>, body: impl Into<Body>) -> Result<Response> {
    default_client()?.post(url).body(body).send().await
}

pub async fn post_json<T: Serialize + ?Sized>(url: impl AsRef<str>, value: &T) -> Result<Response> {
    default_client()?.post(url).json(value).send().await
}

pub async fn put(url: impl AsRef<str>, body: impl Into<Body>) -> Result<Response> {
    default_client()?.put(url).body(body).send().await
}

pub async fn put_json<T: Serialize + ?Sized>(url: impl AsRef<str>, value: &T) -> Result<Response> {
    default_client()?.put(url).json(value).send().await
}

pub async fn patch(url: impl AsRef<str>, body: impl Into<Body>) -> Result<Response> {
    default_client()?.patch(url).body(body).send().await
}

pub async fn patch_json<T: Serialize + ?Sized>(
    url: impl AsRef<str>,
    value: &T,
) -> Result<Response> {
    default_client()?.patch(url).json(value).send().await
}

pub async fn delete(url: impl AsRef<str>) -> Result<Response> {
    default_client()?.delete(url).send().await
}

#[cfg(test)]
mod tests {
    use super::default_client;

    #[test]
    fn default_client_is_shared() {
        let first = default_client().expect("default client");
        first
            .set_header("x-shared-marker", "1")
            .expect("valid header");
        let second = default_client().expect("default client");
        assert_eq!(second.headers().get("x-shared-marker").expect("shared"), "1");
        first.remove_header("x-shared-marker");
    }
}
