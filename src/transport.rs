//! The boundary to whatever performs the network round trip.
//!
//! The executor never touches sockets. It hands a fully built
//! [`TransportRequest`] to a [`Transport`] and gets back a [`RawResponse`]
//! whose status has not been validated yet. [`crate::HyperTransport`] is the
//! default implementation.

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method, Request};
use url::Url;

use crate::error::Error;

/// A request ready for the wire.
///
/// Authentication providers receive and return this value, so it exposes
/// mutable access to headers.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Converts into an [`http::Request`], optionally replacing the body.
    pub fn to_http_request(&self, body: Option<Bytes>) -> Result<Request<Bytes>, Error> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.url.as_str());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
        }
        builder
            .body(body.unwrap_or_else(|| self.body.clone()))
            .map_err(|source| Error::InvalidParameter {
                name: "request".to_owned(),
                message: source.to_string(),
            })
    }
}

/// What came back from the wire, before status validation.
///
/// `status` is the raw numeric code; anything outside 100..=999 means the
/// peer did not speak HTTP.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<RawResponse, Error>>;

    /// Sends `request` with `body` as its payload. `body` is fully buffered,
    /// so calling this again with the same bytes is always safe.
    fn upload(
        &self,
        request: TransportRequest,
        body: Bytes,
    ) -> BoxFuture<'_, Result<RawResponse, Error>>;

    fn download(&self, request: TransportRequest) -> BoxFuture<'_, Result<RawResponse, Error>> {
        self.send(request)
    }
}
