//! Request signing and credential recovery.
//!
//! An [`AuthenticationProvider`] gets two hooks: `authenticate` runs on every
//! attempt while the transport request is being built, and `attempt_recovery`
//! runs when the server answers with an authentication-class status. If
//! recovery reports `true` the request is rebuilt, so `authenticate` sees any
//! refreshed credentials on the retried attempt.

use std::fmt;
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, ready};
use http::HeaderValue;
use http::header::{AUTHORIZATION, HeaderName};
use tracing::debug;

use crate::error::Error;
use crate::response::HttpOutcome;
use crate::transport::TransportRequest;
use crate::util::{parse_header_name, parse_header_value};

pub trait AuthenticationProvider: Send + Sync {
    fn authenticate(&self, request: TransportRequest)
    -> BoxFuture<'_, crate::Result<TransportRequest>>;

    /// Tries to make the next attempt succeed after `outcome` was rejected.
    /// `Ok(false)` declines; the original HTTP error is then surfaced.
    fn attempt_recovery<'a>(&'a self, outcome: &'a HttpOutcome) -> BoxFuture<'a, crate::Result<bool>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthentication;

impl AuthenticationProvider for NoAuthentication {
    fn authenticate(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, crate::Result<TransportRequest>> {
        ready(Ok(request)).boxed()
    }

    fn attempt_recovery<'a>(&'a self, _outcome: &'a HttpOutcome) -> BoxFuture<'a, crate::Result<bool>> {
        ready(Ok(false)).boxed()
    }
}

/// Sets one fixed header, e.g. an API key. Never recovers.
#[derive(Clone, Debug)]
pub struct StaticHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl StaticHeader {
    pub fn new(name: HeaderName, mut value: HeaderValue) -> Self {
        value.set_sensitive(true);
        Self { name, value }
    }

    pub fn try_new(name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(Self::new(name, value))
    }
}

impl AuthenticationProvider for StaticHeader {
    fn authenticate(
        &self,
        mut request: TransportRequest,
    ) -> BoxFuture<'_, crate::Result<TransportRequest>> {
        request
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
        ready(Ok(request)).boxed()
    }

    fn attempt_recovery<'a>(&'a self, _outcome: &'a HttpOutcome) -> BoxFuture<'a, crate::Result<bool>> {
        ready(Ok(false)).boxed()
    }
}

type RefreshFn = dyn Fn() -> BoxFuture<'static, crate::Result<Option<String>>> + Send + Sync;

/// `Authorization: Bearer <token>` with an async refresh hook.
///
/// The refresh function returns the new token, or `None` to decline recovery.
/// Concurrent recoveries wait on one refresh: a caller that finds the token
/// already replaced by the time it gets the gate retries with that token.
pub struct BearerTokenProvider {
    token: RwLock<Option<String>>,
    refresh: Option<Arc<RefreshFn>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl fmt::Debug for BearerTokenProvider {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BearerTokenProvider")
            .field("has_token", &self.current_token().is_some())
            .field("refreshable", &self.refresh.is_some())
            .finish()
    }
}

impl BearerTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            refresh: None,
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// A provider with no token yet; the first 401 triggers `refresh`.
    pub fn empty() -> Self {
        Self {
            token: RwLock::new(None),
            refresh: None,
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_refresh<F>(mut self, refresh: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, crate::Result<Option<String>>> + Send + Sync + 'static,
    {
        self.refresh = Some(Arc::new(refresh));
        self
    }

    pub fn current_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        match self.token.write() {
            Ok(mut guard) => *guard = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }

    async fn recover(&self) -> crate::Result<bool> {
        let Some(refresh) = self.refresh.clone() else {
            return Ok(false);
        };
        let rejected = self.current_token();
        let _gate = self.refresh_gate.lock().await;
        if self.current_token() != rejected {
            debug!("bearer token already refreshed by a concurrent request");
            return Ok(true);
        }
        match refresh().await? {
            Some(token) => {
                debug!("bearer token refreshed");
                self.set_token(token);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl AuthenticationProvider for BearerTokenProvider {
    fn authenticate(
        &self,
        mut request: TransportRequest,
    ) -> BoxFuture<'_, crate::Result<TransportRequest>> {
        let result = match self.current_token() {
            Some(token) => parse_header_value(AUTHORIZATION.as_str(), &format!("Bearer {token}"))
                .map(|mut value| {
                    value.set_sensitive(true);
                    request.headers_mut().insert(AUTHORIZATION, value);
                    request
                }),
            None => Ok(request),
        };
        ready(result).boxed()
    }

    fn attempt_recovery<'a>(&'a self, _outcome: &'a HttpOutcome) -> BoxFuture<'a, crate::Result<bool>> {
        self.recover().boxed()
    }
}

/// Per-request choice of authentication provider.
#[derive(Clone)]
pub struct AuthenticationPolicy {
    provider: Arc<dyn AuthenticationProvider>,
}

impl AuthenticationPolicy {
    pub fn new(provider: Arc<dyn AuthenticationProvider>) -> Self {
        Self { provider }
    }

    pub fn none() -> Self {
        Self::new(Arc::new(NoAuthentication))
    }

    pub fn provider(&self) -> &dyn AuthenticationProvider {
        self.provider.as_ref()
    }
}

impl Default for AuthenticationPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for AuthenticationPolicy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("AuthenticationPolicy").finish_non_exhaustive()
    }
}

impl<P> From<P> for AuthenticationPolicy
where
    P: AuthenticationProvider + 'static,
{
    fn from(provider: P) -> Self {
        Self::new(Arc::new(provider))
    }
}

/// Convenience for refresh hooks that fail with a plain message.
pub fn refresh_failed(message: impl Into<String>) -> Error {
    Error::authentication(message.into())
}
