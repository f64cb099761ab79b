use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{ACCEPT, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info_span, warn};

use crate::auth::AuthenticationPolicy;
use crate::cache::{CacheKey, CachedEntry, ResponseCache};
use crate::codec::Codec;
use crate::config::{ClientConfig, default_config};
use crate::error::Error;
use crate::hyper_transport::HyperTransport;
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::request::{CachePolicy, RequestDescriptor};
use crate::response::HttpOutcome;
use crate::retry::RetryPolicy;
use crate::transport::{Transport, TransportRequest};
use crate::util::redact_uri_for_logs;

/// Per-call execution switches.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    retry_policy: Option<RetryPolicy>,
    cache: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces both the descriptor's and the client's retry policy.
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// Opts into the response cache. Only GET and HEAD sends are cached.
    pub fn cached(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Send,
    Upload,
    Download,
}

impl Operation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

enum AttemptResult {
    Done(HttpOutcome),
    Retry,
}

pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config = self.config.with_base_url(base_url);
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config = self.config.with_default_header(name, value);
        self
    }

    pub fn try_default_header(mut self, name: &str, value: &str) -> crate::Result<Self> {
        self.config = self.config.try_with_default_header(name, value)?;
        Ok(self)
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(Some(request_timeout));
        self
    }

    pub fn no_request_timeout(mut self) -> Self {
        self.config = self.config.with_request_timeout(None);
        self
    }

    pub fn authentication(mut self, authentication: impl Into<AuthenticationPolicy>) -> Self {
        self.config = self.config.with_authentication(authentication);
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.config = self.config.with_retry_policy(retry_policy);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.config = self.config.with_codec(codec);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.config = self.config.with_cache(cache);
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.config = self.config.with_client_name(client_name);
        self
    }

    /// Uses `transport` instead of the default [`HyperTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn try_build(self) -> crate::Result<Client> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::try_new()?),
        };
        Ok(Client::new(self.config, transport))
    }
}

/// Executes [`RequestDescriptor`]s against a [`Transport`].
///
/// Cloning is cheap; clones share configuration, transport and metrics.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    metrics: ClientMetrics,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_shared_config(Arc::new(config), transport)
    }

    pub fn with_shared_config(config: Arc<ClientConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            metrics: ClientMetrics::default(),
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new(ClientConfig::default())
    }

    /// Builds a hyper-backed client from the process-wide default
    /// configuration (see [`crate::config::install_default`]).
    pub fn from_default() -> crate::Result<Self> {
        Ok(Self::with_shared_config(
            default_config(),
            Arc::new(HyperTransport::try_new()?),
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn send<R>(&self, descriptor: &RequestDescriptor<R>) -> crate::Result<R>
    where
        R: DeserializeOwned,
    {
        self.send_with(descriptor, CallOptions::default()).await
    }

    pub async fn send_with<R>(
        &self,
        descriptor: &RequestDescriptor<R>,
        options: CallOptions,
    ) -> crate::Result<R>
    where
        R: DeserializeOwned,
    {
        let outcome = self
            .execute(descriptor, Operation::Send, None, options)
            .await?;
        self.decode(&outcome)
    }

    /// Sends `body` as the request payload. The bytes are reused verbatim
    /// on every retried attempt.
    pub async fn upload<R>(
        &self,
        descriptor: &RequestDescriptor<R>,
        body: impl Into<Bytes>,
    ) -> crate::Result<R>
    where
        R: DeserializeOwned,
    {
        self.upload_with(descriptor, body, CallOptions::default())
            .await
    }

    pub async fn upload_with<R>(
        &self,
        descriptor: &RequestDescriptor<R>,
        body: impl Into<Bytes>,
        options: CallOptions,
    ) -> crate::Result<R>
    where
        R: DeserializeOwned,
    {
        let outcome = self
            .execute(descriptor, Operation::Upload, Some(body.into()), options)
            .await?;
        self.decode(&outcome)
    }

    /// Returns the raw response body without decoding.
    pub async fn download<R>(&self, descriptor: &RequestDescriptor<R>) -> crate::Result<Bytes> {
        self.download_with(descriptor, CallOptions::default())
            .await
    }

    pub async fn download_with<R>(
        &self,
        descriptor: &RequestDescriptor<R>,
        options: CallOptions,
    ) -> crate::Result<Bytes> {
        let outcome = self
            .execute(descriptor, Operation::Download, None, options)
            .await?;
        Ok(outcome.into_body())
    }

    /// GETs an absolute url and returns its body.
    pub async fn download_url(&self, url: &str) -> crate::Result<Bytes> {
        let descriptor = RequestDescriptor::<Bytes>::absolute(Method::GET, url)
            .header(ACCEPT, HeaderValue::from_static("*/*"))
            .build();
        self.download(&descriptor).await
    }

    fn decode<R>(&self, outcome: &HttpOutcome) -> crate::Result<R>
    where
        R: DeserializeOwned,
    {
        outcome
            .decode_with(self.config.codec())
            .inspect_err(|_| self.metrics.record_decode_error())
    }

    async fn execute<R>(
        &self,
        descriptor: &RequestDescriptor<R>,
        operation: Operation,
        upload_body: Option<Bytes>,
        options: CallOptions,
    ) -> crate::Result<HttpOutcome> {
        self.metrics.record_request_started();
        let _in_flight = self.metrics.enter_in_flight();
        let started = Instant::now();

        let result = self
            .execute_with_retry(descriptor, operation, upload_body, options)
            .await;
        match &result {
            Ok(outcome) => self
                .metrics
                .record_success(outcome.status().as_u16(), started.elapsed()),
            Err(error) => self.metrics.record_failure(error, started.elapsed()),
        }
        result
    }

    async fn execute_with_retry<R>(
        &self,
        descriptor: &RequestDescriptor<R>,
        operation: Operation,
        upload_body: Option<Bytes>,
        options: CallOptions,
    ) -> crate::Result<HttpOutcome> {
        let authentication = descriptor
            .authentication()
            .unwrap_or_else(|| self.config.authentication());
        let mut retry_policy = options
            .retry_policy
            .as_ref()
            .or(descriptor.retry_policy())
            .unwrap_or_else(|| self.config.retry_policy())
            .fresh();
        let use_cache = options.cache
            && operation == Operation::Send
            && matches!(*descriptor.method(), Method::GET | Method::HEAD);

        loop {
            let request = descriptor
                .build_transport_request(&self.config, authentication)
                .await?;
            let uri = redact_uri_for_logs(request.url().as_str());
            let span = info_span!(
                "reqflow.request",
                client = %self.config.client_name(),
                operation = operation.as_str(),
                method = %request.method(),
                uri = %uri,
                attempt = retry_policy.attempt() + 1,
                max_retries = retry_policy.configured_max_retries()
            );
            let result = self
                .run_attempt(
                    request,
                    &uri,
                    operation,
                    upload_body.as_ref(),
                    use_cache.then_some(descriptor.cache_policy()),
                    authentication,
                    &mut retry_policy,
                )
                .instrument(span)
                .await?;
            match result {
                AttemptResult::Done(outcome) => return Ok(outcome),
                AttemptResult::Retry => continue,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        request: TransportRequest,
        uri: &str,
        operation: Operation,
        upload_body: Option<&Bytes>,
        cache_policy: Option<CachePolicy>,
        authentication: &AuthenticationPolicy,
        retry_policy: &mut RetryPolicy,
    ) -> crate::Result<AttemptResult> {
        let method = request.method().clone();
        let cache_key = cache_policy.map(|_| CacheKey::for_request(&request));
        if let (Some(policy), Some(key)) = (cache_policy, &cache_key)
            && policy.allows_lookup()
            && let Some(entry) = self.config.cache().lookup(key)
        {
            debug!(age_ms = entry.age().as_millis() as u64, "cache hit");
            self.metrics.record_cache_hit();
            return Ok(AttemptResult::Done(entry.into_outcome()));
        }

        debug!("sending request");
        self.metrics.record_attempt();
        let started = Instant::now();
        let raw = match operation {
            Operation::Send => self.transport.send(request).await?,
            Operation::Upload => {
                let body = upload_body.cloned().unwrap_or_default();
                self.transport.upload(request, body).await?
            }
            Operation::Download => self.transport.download(request).await?,
        };

        let status = StatusCode::from_u16(raw.status).map_err(|_| Error::InvalidResponse {
            method: method.clone(),
            uri: uri.to_owned(),
            reason: format!("status code {} is not a valid http status", raw.status),
        })?;
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        let outcome = HttpOutcome::new(status, raw.headers, raw.body);

        if outcome.is_success() {
            if let (Some(policy), Some(key)) = (cache_policy, cache_key)
                && policy.allows_store()
            {
                self.config
                    .cache()
                    .store(key, CachedEntry::from_outcome(&outcome));
                self.metrics.record_cache_store();
                debug!("response stored in cache");
            }
            return Ok(AttemptResult::Done(outcome));
        }

        if retry_policy
            .should_retry(&outcome, authentication.provider())
            .await?
        {
            warn!(
                status = status.as_u16(),
                retry = retry_policy.attempt(),
                "retrying request after failed status"
            );
            self.metrics.record_retry();
            return Ok(AttemptResult::Retry);
        }

        let body = outcome.body().clone();
        Err(Error::HttpStatus {
            status: status.as_u16(),
            method,
            uri: uri.to_owned(),
            headers: Box::new(outcome.headers().clone()),
            body,
        })
    }
}
