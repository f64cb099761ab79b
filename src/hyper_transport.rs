use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, TransportErrorKind};
use crate::transport::{RawResponse, Transport, TransportRequest};
use crate::util::{classify_transport_error, redact_uri_for_logs};

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// [`Transport`] over hyper with rustls (ring provider, webpki roots).
///
/// Plain `http://` is accepted alongside `https://`. The per-request timeout
/// on [`TransportRequest`] bounds the whole round trip including the body.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish()
    }
}

pub struct HyperTransportBuilder {
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    http2_only: bool,
    max_response_body_bytes: usize,
}

impl HyperTransportBuilder {
    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host.max(1);
        self
    }

    pub fn http2_only(mut self, http2_only: bool) -> Self {
        self.http2_only = http2_only;
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn try_build(self) -> crate::Result<HyperTransport> {
        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| Error::Transport {
                kind: TransportErrorKind::Tls,
                method: Method::GET,
                uri: String::new(),
                source: Box::new(source),
            })?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .http2_only(self.http2_only)
            .build(https);
        Ok(HyperTransport {
            client,
            max_response_body_bytes: self.max_response_body_bytes,
        })
    }
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder {
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            http2_only: false,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }

    pub fn try_new() -> crate::Result<Self> {
        Self::builder().try_build()
    }

    async fn round_trip(
        &self,
        request: TransportRequest,
        body: Option<Bytes>,
    ) -> Result<RawResponse, Error> {
        let method = request.method().clone();
        let redacted_uri = redact_uri_for_logs(request.url().as_str());
        let request_timeout = request.timeout();
        let http_request = request.to_http_request(body)?.map(Full::new);

        let exchange = async {
            let response = self.client.request(http_request).await.map_err(|source| {
                Error::Transport {
                    kind: classify_transport_error(&source),
                    method: method.clone(),
                    uri: redacted_uri.clone(),
                    source: Box::new(source),
                }
            })?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = read_all_body_limited(
                response.into_body(),
                self.max_response_body_bytes,
                &method,
                &redacted_uri,
            )
            .await?;
            Ok::<_, Error>(RawResponse::new(status, headers, body))
        };

        let Some(request_timeout) = request_timeout else {
            return exchange.await;
        };
        match timeout(request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(uri = %redacted_uri, "transport timed out");
                Err(Error::Timeout {
                    timeout_ms: request_timeout.as_millis(),
                    method,
                    uri: redacted_uri,
                })
            }
        }
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<RawResponse, Error>> {
        self.round_trip(request, None).boxed()
    }

    fn upload(
        &self,
        request: TransportRequest,
        body: Bytes,
    ) -> BoxFuture<'_, Result<RawResponse, Error>> {
        self.round_trip(request, Some(body)).boxed()
    }
}

async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
    method: &Method,
    uri: &str,
) -> Result<Bytes, Error> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| Error::Transport {
            kind: TransportErrorKind::Read,
            method: method.clone(),
            uri: uri.to_owned(),
            source: Box::new(source),
        })?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(Error::ResponseBodyTooLarge {
                    limit_bytes: max_bytes,
                    actual_bytes: total_len,
                    method: method.clone(),
                    uri: uri.to_owned(),
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}
