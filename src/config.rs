//! Client configuration.
//!
//! A [`ClientConfig`] is assembled once and then shared read-only by every
//! operation of a [`crate::Client`]. For applications that want a single
//! process-wide configuration there is [`install_default`]; it can be set
//! exactly once, before any client is built from it.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

use crate::auth::AuthenticationPolicy;
use crate::cache::{MemoryCache, ResponseCache};
use crate::codec::{Codec, JsonCodec};
use crate::retry::RetryPolicy;
use crate::util::{parse_header_name, parse_header_value};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_CLIENT_NAME: &str = concat!("reqflow/", env!("CARGO_PKG_VERSION"));

static DEFAULT_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

#[derive(Clone)]
pub struct ClientConfig {
    base_url: Option<String>,
    default_headers: HeaderMap,
    request_timeout: Option<Duration>,
    authentication: AuthenticationPolicy,
    retry_policy: RetryPolicy,
    codec: Arc<dyn Codec>,
    cache: Arc<dyn ResponseCache>,
    client_name: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .field("request_timeout", &self.request_timeout)
            .field("retry_policy", &self.retry_policy)
            .field("client_name", &self.client_name)
            .finish_non_exhaustive()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            authentication: AuthenticationPolicy::none(),
            retry_policy: RetryPolicy::standard(),
            codec: Arc::new(JsonCodec::new()),
            cache: Arc::new(MemoryCache::new()),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_with_default_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.with_default_header(name, value))
    }

    /// `None` leaves attempts unbounded in time.
    pub fn with_request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout.map(|timeout| timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn with_authentication(mut self, authentication: impl Into<AuthenticationPolicy>) -> Self {
        self.authentication = authentication.into();
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|base_url| !base_url.is_empty())
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn authentication(&self) -> &AuthenticationPolicy {
        &self.authentication
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn cache(&self) -> &dyn ResponseCache {
        self.cache.as_ref()
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }
}

/// Installs the process-wide default configuration.
///
/// Succeeds once; later calls hand the rejected configuration back. Clients
/// built earlier keep the configuration they were built with.
pub fn install_default(config: ClientConfig) -> Result<(), ClientConfig> {
    let config = Arc::new(config);
    DEFAULT_CONFIG
        .set(Arc::clone(&config))
        .map_err(|_| Arc::unwrap_or_clone(config))
}

/// The installed process-wide configuration, or [`ClientConfig::default`].
pub fn default_config() -> Arc<ClientConfig> {
    DEFAULT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(ClientConfig::default()))
}
