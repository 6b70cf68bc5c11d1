//! Small helpers shared by the client and by servers that sit behind proxies.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::{HeaderMap, HOST};
use reqwest::Url;

/// Common `Content-Type` values.
pub mod content_type {
    pub const TEXT_HTML: &str = "text/html";
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const TEXT_XML: &str = "text/xml";

    pub const IMAGE_GIF: &str = "image/gif";
    pub const IMAGE_JPEG: &str = "image/jpeg";
    pub const IMAGE_PNG: &str = "image/png";

    pub const MULTIPART_FORM: &str = "multipart/form-data";

    pub const APPLICATION_FORM: &str = "application/x-www-form-urlencoded";
    pub const APPLICATION_XHTML: &str = "application/xhtml+xml";
    pub const APPLICATION_XML: &str = "application/xml";
    pub const APPLICATION_JSON: &str = "application/json";
    pub const APPLICATION_JAVASCRIPT: &str = "application/javascript";
}

const FALLBACK_IP: &str = "127.0.0.1";

/// Appends URL-encoded `params` to the query string of `url`.
pub fn append_params<K, V>(url: &mut Url, params: &[(K, V)])
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return;
    }
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(key, value)| (key.as_ref(), value.as_ref())));
}

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^((25[0-5]|2[0-4]\d|[01]?\d?\d)\.){3}(25[0-5]|2[0-4]\d|[01]?\d?\d)$")
            .expect("IPv4 pattern is valid")
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Client address as reported by a fronting proxy.
///
/// Prefers `X-Real-Ip`, then the first `X-Forwarded-For` entry when it is an
/// IPv4 address, and falls back to `127.0.0.1`.
pub fn real_ip(headers: &HeaderMap) -> String {
    if let Some(ip) = header_str(headers, "x-real-ip") {
        return ip.to_owned();
    }
    header_str(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|first| ipv4_pattern().is_match(first))
        .unwrap_or(FALLBACK_IP)
        .to_owned()
}

/// Original host: `X-Host` if a proxy set it, otherwise `Host`.
pub fn real_host(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-host")
        .or_else(|| header_str(headers, HOST.as_str()))
        .map(str::to_owned)
}

/// `443` when `X-Scheme` says the original request was HTTPS, else `80`.
pub fn real_port(headers: &HeaderMap) -> u16 {
    match header_str(headers, "x-scheme") {
        Some(scheme) if scheme.eq_ignore_ascii_case("https") => 443,
        _ => 80,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::Url;

    use super::{append_params, real_host, real_ip, real_port};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn params_extend_existing_query() {
        let mut url = Url::parse("http://example.test/search?q=rust").expect("valid url");
        append_params(&mut url, &[("page", "2"), ("tag", "a b")]);
        assert_eq!(url.as_str(), "http://example.test/search?q=rust&page=2&tag=a+b");

        let mut url = Url::parse("http://example.test/").expect("valid url");
        append_params::<&str, &str>(&mut url, &[]);
        assert_eq!(url.as_str(), "http://example.test/");
    }

    #[test]
    fn real_ip_prefers_x_real_ip() {
        let map = headers(&[("x-real-ip", "10.1.1.1"), ("x-forwarded-for", "10.2.2.2")]);
        assert_eq!(real_ip(&map), "10.1.1.1");

        let map = headers(&[("x-forwarded-for", "10.2.2.2, 10.3.3.3")]);
        assert_eq!(real_ip(&map), "10.2.2.2");

        let map = headers(&[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(real_ip(&map), "127.0.0.1");
        assert_eq!(real_ip(&HeaderMap::new()), "127.0.0.1");
    }

    #[test]
    fn host_and_port_follow_proxy_headers() {
        let map = headers(&[("x-host", "public.example"), ("host", "internal:8080")]);
        assert_eq!(real_host(&map).as_deref(), Some("public.example"));
        let map = headers(&[("host", "internal:8080")]);
        assert_eq!(real_host(&map).as_deref(), Some("internal:8080"));
        assert_eq!(real_host(&HeaderMap::new()), None);

        assert_eq!(real_port(&headers(&[("x-scheme", "https")])), 443);
        assert_eq!(real_port(&headers(&[("x-scheme", "http")])), 80);
        assert_eq!(real_port(&HeaderMap::new()), 80);
    }
}
