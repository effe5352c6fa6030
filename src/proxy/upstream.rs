//! Upstream origin client
//!
//! The proxy forwards through the `UpstreamClient` trait; `HttpUpstream` is
//! the reqwest-backed implementation. Bodies are read fully into memory so
//! one buffer can serve both the reply and the cache commit.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, Method, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::types::{Result, VestibuleError};

/// Headers that describe a single connection and never cross the proxy
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A fully read origin response
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send one request to the origin and read the whole response
    async fn forward(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
        timeout: Duration,
    ) -> Result<UpstreamResponse>;
}

/// Drop hop-by-hop headers, plus any named by `Connection`
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let connection_named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lowered = name.as_str();
        if HOP_BY_HOP.contains(&lowered)
            || lowered.starts_with("proxy-")
            || connection_named.iter().any(|n| n == lowered)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// reqwest-backed origin client
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpUpstream {
    pub fn new(max_body_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| VestibuleError::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    async fn read_body(&self, mut response: reqwest::Response, url: &str) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| classify_body_error(e, url))?
        {
            if buf.len() + chunk.len() > self.max_body_bytes {
                return Err(VestibuleError::InvalidResponseEncoding(format!(
                    "{} body exceeds {} bytes",
                    url, self.max_body_bytes
                )));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn forward(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
        timeout: Duration,
    ) -> Result<UpstreamResponse> {
        let mut outbound = strip_hop_by_hop(headers);
        // reqwest derives Host from the URL
        outbound.remove(header::HOST);
        outbound.remove(header::CONTENT_LENGTH);

        let fetch = async {
            let response = self
                .client
                .request(method.clone(), url)
                .headers(outbound)
                .body(body)
                .send()
                .await
                .map_err(|e| classify_send_error(e, url))?;

            let status = response.status();
            let headers = strip_hop_by_hop(response.headers());
            let body = self.read_body(response, url).await?;
            Ok::<_, VestibuleError>(UpstreamResponse::new(status, headers, body))
        };

        // The deadline covers the body read as well as the headers
        let response = tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| {
                VestibuleError::UpstreamTimeout(format!("{} after {}ms", url, timeout.as_millis()))
            })??;

        debug!(url, status = response.status.as_u16(), bytes = response.body.len(), "Upstream responded");
        Ok(response)
    }
}

fn classify_send_error(e: reqwest::Error, url: &str) -> VestibuleError {
    if e.is_timeout() {
        VestibuleError::UpstreamTimeout(format!("{}: {}", url, e))
    } else {
        VestibuleError::UpstreamTransport(format!("{}: {}", url, e))
    }
}

fn classify_body_error(e: reqwest::Error, url: &str) -> VestibuleError {
    if e.is_timeout() {
        VestibuleError::UpstreamTimeout(format!("{}: {}", url, e))
    } else {
        VestibuleError::InvalidResponseEncoding(format!("{}: {}", url, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("proxy-connection", HeaderValue::from_static("close"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

        let stripped = strip_hop_by_hop(&headers);

        assert!(stripped.get(header::CONNECTION).is_none());
        assert!(stripped.get("keep-alive").is_none());
        assert!(stripped.get("x-session").is_none());
        assert!(stripped.get(header::TRANSFER_ENCODING).is_none());
        assert!(stripped.get("proxy-connection").is_none());
        assert_eq!(stripped.get(header::CONTENT_TYPE).unwrap(), "text/html");
        let cookies: Vec<_> = stripped.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_transport_error() {
        let upstream = HttpUpstream::new(1024).unwrap();
        // Nothing listens on the discard port
        let result = upstream
            .forward(
                &Method::GET,
                "http://127.0.0.1:9/",
                &HeaderMap::new(),
                Bytes::new(),
                Duration::from_secs(2),
            )
            .await;

        assert!(matches!(
            result,
            Err(VestibuleError::UpstreamTransport(_)) | Err(VestibuleError::UpstreamTimeout(_))
        ));
    }
}
