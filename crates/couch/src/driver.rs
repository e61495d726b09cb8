//! HTTP transport seam
//!
//! The adapter never talks to `reqwest` directly: every operation is a
//! [`HttpRequest`] value handed to an injectable [`HttpDriver`]. The
//! default driver wraps a process-wide `reqwest::Client`, safely reusable
//! across concurrent operations; tests substitute an in-memory driver.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::Value;
use tracing::debug;

use docent_core::{ByteStream, Error, Result};

/// HTTP method of a wire operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Wire name of the method
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Request payload
pub enum RequestBody {
    /// No body
    Empty,
    /// UTF-8 JSON body
    Json(Value),
    /// Chunked `application/octet` body, pumped from the stream one chunk
    /// at a time
    Octet(ByteStream),
}

/// One wire operation against the server
pub struct HttpRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Absolute path, already percent-encoded, starting with `/`
    pub path: String,
    /// Query parameters, raw values (the driver encodes them)
    pub query: Vec<(String, String)>,
    /// Request payload
    pub body: RequestBody,
}

impl HttpRequest {
    /// GET request
    pub fn get(path: impl Into<String>) -> Self {
        HttpRequest {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// PUT request
    pub fn put(path: impl Into<String>, body: RequestBody) -> Self {
        HttpRequest {
            method: HttpMethod::Put,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    /// DELETE request
    pub fn delete(path: impl Into<String>) -> Self {
        HttpRequest {
            method: HttpMethod::Delete,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Append a query parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// A buffered response
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Full response body
    pub body: Bytes,
}

impl HttpResponse {
    /// True for 2xx statuses
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with a `Transport` error unless the status is 2xx
    pub fn ensure_ok(&self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::transport(
                self.status,
                String::from_utf8_lossy(&self.body).into_owned(),
            ))
        }
    }

    /// Decode the body as JSON
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Codec {
            field: "response".to_string(),
            detail: format!("invalid json from backend: {e}"),
        })
    }
}

/// Pluggable HTTP transport
#[async_trait]
pub trait HttpDriver: Send + Sync {
    /// Execute a request, buffering the response body
    async fn execute(&self, req: HttpRequest) -> Result<HttpResponse>;

    /// Execute a request, streaming the response body (attachment reads)
    async fn execute_streaming(&self, req: HttpRequest) -> Result<(u16, ByteStream)>;
}

/// Default driver over a shared `reqwest::Client`
pub struct ReqwestDriver {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl ReqwestDriver {
    /// Driver against a base URL (no trailing slash), with optional
    /// Basic-auth credentials
    pub fn new(base_url: impl Into<String>, credentials: Option<(String, String)>) -> Self {
        ReqwestDriver {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    fn build(&self, req: HttpRequest) -> reqwest::RequestBuilder {
        debug!("{} {}", req.method.as_str(), req.path);
        let method = match req.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self.client.request(method, url).query(&req.query);
        if let Some((user, pass)) = &self.credentials {
            builder = builder.basic_auth(user, Some(pass));
        }
        match req.body {
            RequestBody::Empty => builder,
            RequestBody::Json(v) => builder.json(&v),
            RequestBody::Octet(stream) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/octet")
                .body(reqwest::Body::wrap_stream(stream)),
        }
    }
}

fn transport(e: reqwest::Error) -> Error {
    let status = e.status().map_or(0, |s| s.as_u16());
    Error::transport(status, e.to_string())
}

#[async_trait]
impl HttpDriver for ReqwestDriver {
    async fn execute(&self, req: HttpRequest) -> Result<HttpResponse> {
        let resp = self.build(req).send().await.map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(transport)?;
        Ok(HttpResponse { status, body })
    }

    async fn execute_streaming(&self, req: HttpRequest) -> Result<(u16, ByteStream)> {
        let resp = self.build(req).send().await.map_err(transport)?;
        let status = resp.status().as_u16();
        let stream = resp.bytes_stream().map_err(transport);
        Ok((status, Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::get("/db/doc1")
            .param("rev", "1-abc")
            .param("batch", "ok");
        assert_eq!(req.method.as_str(), "GET");
        assert_eq!(req.path, "/db/doc1");
        assert_eq!(req.query.len(), 2);
    }

    #[test]
    fn test_response_ensure_ok() {
        let resp = HttpResponse {
            status: 201,
            body: Bytes::from_static(b"{\"ok\":true}"),
        };
        assert!(resp.ensure_ok().is_ok());

        let resp = HttpResponse {
            status: 409,
            body: Bytes::from_static(b"{\"error\":\"conflict\"}"),
        };
        let err = resp.ensure_ok().unwrap_err();
        assert!(matches!(err, Error::Transport { status: 409, .. }));
    }

    #[test]
    fn test_response_json_decode_failure() {
        let resp = HttpResponse {
            status: 200,
            body: Bytes::from_static(b"not json"),
        };
        assert!(matches!(resp.json().unwrap_err(), Error::Codec { .. }));
    }
}
