use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::auth::AuthenticationPolicy;
use crate::codec::CodecError;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::multipart::{MultipartField, encode_multipart, generate_boundary};
use crate::retry::RetryPolicy;
use crate::transport::TransportRequest;
use crate::util::{
    append_query_pairs, insert_missing_headers, join_base_path, parse_header_name,
    parse_header_value, parse_http_url,
};

/// Where a request goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Joined onto `base_url`, or the client's base url when `None`.
    Path {
        base_url: Option<String>,
        path: String,
    },
    Absolute(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContentEncoding {
    Json(Option<Value>),
    Multipart(Vec<MultipartField>),
}

impl Default for ContentEncoding {
    fn default() -> Self {
        Self::Json(None)
    }
}

/// Caching directive for one request.
///
/// Affects both the `Cache-Control` header sent upstream and whether the
/// client's response cache is read or written when caching is enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    #[default]
    UseProtocolDefault,
    /// Skip the local lookup and ask intermediaries to revalidate.
    ReloadIgnoringCache,
    /// Accept stale responses from intermediaries.
    ReturnCacheDataElseLoad,
    /// Never store the response.
    NoStore,
}

impl CachePolicy {
    fn cache_control(self) -> Option<HeaderValue> {
        match self {
            Self::UseProtocolDefault => None,
            Self::ReloadIgnoringCache => Some(HeaderValue::from_static("no-cache")),
            Self::ReturnCacheDataElseLoad => Some(HeaderValue::from_static("max-stale")),
            Self::NoStore => Some(HeaderValue::from_static("no-store")),
        }
    }

    pub(crate) fn allows_lookup(self) -> bool {
        !matches!(self, Self::ReloadIgnoringCache | Self::NoStore)
    }

    pub(crate) fn allows_store(self) -> bool {
        !matches!(self, Self::NoStore)
    }
}

/// An immutable description of one HTTP call whose successful response
/// decodes into `R`.
pub struct RequestDescriptor<R> {
    method: Method,
    target: Target,
    content: ContentEncoding,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    timeout: Option<Duration>,
    cache_policy: CachePolicy,
    authentication: Option<AuthenticationPolicy>,
    retry_policy: Option<RetryPolicy>,
    _result: PhantomData<fn() -> R>,
}

impl<R> Clone for RequestDescriptor<R> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            target: self.target.clone(),
            content: self.content.clone(),
            headers: self.headers.clone(),
            query: self.query.clone(),
            timeout: self.timeout,
            cache_policy: self.cache_policy,
            authentication: self.authentication.clone(),
            retry_policy: self.retry_policy.clone(),
            _result: PhantomData,
        }
    }
}

impl<R> fmt::Debug for RequestDescriptor<R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("content", &self.content)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("timeout", &self.timeout)
            .field("cache_policy", &self.cache_policy)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl<R> RequestDescriptor<R> {
    pub fn builder(method: Method, path: impl Into<String>) -> RequestDescriptorBuilder<R> {
        RequestDescriptorBuilder::new(
            method,
            Target::Path {
                base_url: None,
                path: path.into(),
            },
        )
    }

    pub fn absolute(method: Method, url: impl Into<String>) -> RequestDescriptorBuilder<R> {
        RequestDescriptorBuilder::new(method, Target::Absolute(url.into()))
    }

    pub fn get(path: impl Into<String>) -> RequestDescriptorBuilder<R> {
        Self::builder(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> RequestDescriptorBuilder<R> {
        Self::builder(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> RequestDescriptorBuilder<R> {
        Self::builder(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> RequestDescriptorBuilder<R> {
        Self::builder(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> RequestDescriptorBuilder<R> {
        Self::builder(Method::DELETE, path)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn content(&self) -> &ContentEncoding {
        &self.content
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn authentication(&self) -> Option<&AuthenticationPolicy> {
        self.authentication.as_ref()
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// Resolves the full url, query included.
    pub fn resolve_url(&self, config: &ClientConfig) -> crate::Result<Url> {
        let mut url = match &self.target {
            Target::Absolute(url) => parse_http_url(url)?,
            Target::Path { base_url, path } => {
                if is_absolute_http(path) {
                    parse_http_url(path)?
                } else {
                    let base_url = base_url
                        .as_deref()
                        .filter(|base_url| !base_url.is_empty())
                        .or(config.base_url())
                        .ok_or_else(|| Error::MissingBaseUrl { path: path.clone() })?;
                    join_base_path(&parse_http_url(base_url)?, path)
                }
            }
        };
        append_query_pairs(&mut url, &self.query);
        Ok(url)
    }

    /// Translates this description into a wire request for one attempt.
    ///
    /// Header precedence, highest first: authentication, body content type,
    /// caller headers, client default headers, then the built-in `Accept`
    /// and `User-Agent`.
    pub async fn build_transport_request(
        &self,
        config: &ClientConfig,
        authentication: &AuthenticationPolicy,
    ) -> crate::Result<TransportRequest> {
        let url = self.resolve_url(config)?;
        let request = TransportRequest::new(self.method.clone(), url);
        let mut request = authentication.provider().authenticate(request).await?;

        match &self.content {
            ContentEncoding::Json(Some(value)) => {
                let body = config
                    .codec()
                    .encode(value)
                    .map_err(|source| Error::Encode { source })?;
                if !self.headers.contains_key(CONTENT_TYPE)
                    && !request.headers().contains_key(CONTENT_TYPE)
                {
                    request
                        .headers_mut()
                        .insert(CONTENT_TYPE, config.codec().content_type());
                }
                request.set_body(body);
            }
            ContentEncoding::Json(None) => {}
            ContentEncoding::Multipart(fields) => {
                let boundary = generate_boundary();
                let content_type = parse_header_value(
                    CONTENT_TYPE.as_str(),
                    &format!("multipart/form-data; boundary={boundary}"),
                )?;
                if !request.headers().contains_key(CONTENT_TYPE) {
                    request.headers_mut().insert(CONTENT_TYPE, content_type);
                }
                request.set_body(encode_multipart(fields, &boundary));
            }
        }

        insert_missing_headers(request.headers_mut(), &self.headers);
        insert_missing_headers(request.headers_mut(), config.default_headers());
        let headers = request.headers_mut();
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(
                USER_AGENT,
                parse_header_value(USER_AGENT.as_str(), config.client_name())?,
            );
        }
        if let Some(cache_control) = self.cache_policy.cache_control()
            && !headers.contains_key(CACHE_CONTROL)
        {
            headers.insert(CACHE_CONTROL, cache_control);
        }

        request.set_timeout(self.timeout.or(config.request_timeout()));
        Ok(request)
    }
}

fn is_absolute_http(path: &str) -> bool {
    let lower = path.get(..8).unwrap_or(path).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[derive(Debug)]
pub struct RequestDescriptorBuilder<R> {
    descriptor: RequestDescriptor<R>,
}

impl<R> RequestDescriptorBuilder<R> {
    fn new(method: Method, target: Target) -> Self {
        Self {
            descriptor: RequestDescriptor {
                method,
                target,
                content: ContentEncoding::default(),
                headers: HeaderMap::new(),
                query: Vec::new(),
                timeout: None,
                cache_policy: CachePolicy::default(),
                authentication: None,
                retry_policy: None,
                _result: PhantomData,
            },
        }
    }

    /// Overrides the client's base url for a path target.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        if let Target::Path {
            base_url: current, ..
        } = &mut self.descriptor.target
        {
            *current = Some(base_url.into());
        }
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.descriptor.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor.query.push((name.into(), value.into()));
        self
    }

    pub fn query_pairs<K, V, I>(mut self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.descriptor.query.extend(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn json<T>(mut self, payload: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(payload).map_err(|source| Error::Encode {
            source: CodecError::Json(source),
        })?;
        self.descriptor.content = ContentEncoding::Json(Some(value));
        Ok(self)
    }

    pub fn json_value(mut self, value: Value) -> Self {
        self.descriptor.content = ContentEncoding::Json(Some(value));
        self
    }

    /// Appends a multipart field, switching the body to multipart encoding.
    pub fn multipart_field(mut self, field: MultipartField) -> Self {
        match &mut self.descriptor.content {
            ContentEncoding::Multipart(fields) => fields.push(field),
            content => *content = ContentEncoding::Multipart(vec![field]),
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.descriptor.cache_policy = cache_policy;
        self
    }

    pub fn authentication(mut self, authentication: impl Into<AuthenticationPolicy>) -> Self {
        self.descriptor.authentication = Some(authentication.into());
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.descriptor.retry_policy = Some(retry_policy);
        self
    }

    pub fn build(self) -> RequestDescriptor<R> {
        self.descriptor
    }
}

impl<R> From<RequestDescriptorBuilder<R>> for RequestDescriptor<R> {
    fn from(builder: RequestDescriptorBuilder<R>) -> Self {
        builder.build()
    }
}
