use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::auth::AuthenticationProvider;
use crate::response::HttpOutcome;
use crate::util::parse_retry_after;

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(300);
const DEFAULT_RETRY_AFTER_CEILING: Duration = Duration::from_secs(60);

/// Decides whether a rejected attempt is worth repeating.
///
/// Implementations perform their own side effects (sleeping, refreshing
/// credentials) before answering. `attempt` is the 1-based number of the
/// retry that would follow a `true` answer.
pub trait RetryStrategy: Send + Sync {
    fn should_retry<'a>(
        &'a self,
        outcome: &'a HttpOutcome,
        attempt: usize,
        authentication: &'a dyn AuthenticationProvider,
    ) -> BoxFuture<'a, crate::Result<bool>>;
}

/// A strategy plus the attempt state of one logical operation.
///
/// The client clones a fresh policy (attempt 0) for every call, so the
/// counter is never shared between concurrent operations. The bound on
/// `max_retries` is enforced here, not by the strategy.
#[derive(Clone)]
pub struct RetryPolicy {
    strategy: Arc<dyn RetryStrategy>,
    attempt: usize,
    max_retries: usize,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("attempt", &self.attempt)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(strategy: Arc<dyn RetryStrategy>) -> Self {
        Self {
            strategy,
            attempt: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn standard() -> Self {
        Self::new(Arc::new(DefaultRetryStrategy::default()))
    }

    pub fn disabled() -> Self {
        Self::standard().max_retries(0)
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn configured_max_retries(&self) -> usize {
        self.max_retries
    }

    /// Retries granted so far in this operation.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_retries
    }

    pub(crate) fn fresh(&self) -> Self {
        Self {
            strategy: Arc::clone(&self.strategy),
            attempt: 0,
            max_retries: self.max_retries,
        }
    }

    /// Asks the strategy about `outcome` and advances the counter on a yes.
    pub async fn should_retry(
        &mut self,
        outcome: &HttpOutcome,
        authentication: &dyn AuthenticationProvider,
    ) -> crate::Result<bool> {
        if self.is_exhausted() {
            return Ok(false);
        }
        let next_attempt = self.attempt + 1;
        let retry = self
            .strategy
            .should_retry(outcome, next_attempt, authentication)
            .await?;
        if retry {
            self.attempt = next_attempt;
        }
        Ok(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Authentication statuses go through provider recovery, transient
/// statuses wait out a backoff, everything else is final.
#[derive(Clone, Debug)]
pub struct DefaultRetryStrategy {
    authentication_status_codes: BTreeSet<u16>,
    transient_status_codes: BTreeSet<u16>,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Option<Duration>,
    jitter_ratio: f64,
    retry_after_ceiling: Option<Duration>,
}

impl Default for DefaultRetryStrategy {
    fn default() -> Self {
        Self {
            authentication_status_codes: default_authentication_status_codes(),
            transient_status_codes: default_transient_status_codes(),
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: 1.0,
            max_delay: None,
            jitter_ratio: 0.0,
            retry_after_ceiling: Some(DEFAULT_RETRY_AFTER_CEILING),
        }
    }
}

impl DefaultRetryStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authentication_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.authentication_status_codes = codes.into_iter().collect();
        self
    }

    pub fn transient_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.transient_status_codes = codes.into_iter().collect();
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(0.0)
        } else {
            1.0
        };
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Largest `Retry-After` honoured; longer hints fall back to the computed
    /// backoff. `None` ignores the header entirely.
    pub fn retry_after_ceiling(mut self, ceiling: Option<Duration>) -> Self {
        self.retry_after_ceiling = ceiling;
        self
    }

    pub fn is_authentication_status(&self, status: u16) -> bool {
        self.authentication_status_codes.contains(&status)
    }

    pub fn is_transient_status(&self, status: u16) -> bool {
        self.transient_status_codes.contains(&status)
    }

    /// `base_delay * multiplier^(attempt - 1)`, capped by `max_delay`, then
    /// jittered if a ratio is configured.
    pub fn backoff_for_retry(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let seconds = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let mut delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
        if let Some(max_delay) = self.max_delay {
            delay = delay.min(max_delay);
        }
        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut sampled_ms = rand::rng().random_range(low..=high);
        if let Some(max_delay) = self.max_delay {
            sampled_ms = sampled_ms.min(max_delay.as_millis().min(u64::MAX as u128) as u64);
        }
        Duration::from_millis(sampled_ms)
    }

    fn delay_for(&self, outcome: &HttpOutcome, attempt: usize) -> Duration {
        let computed = self.backoff_for_retry(attempt);
        let Some(ceiling) = self.retry_after_ceiling else {
            return computed;
        };
        match parse_retry_after(outcome.headers(), SystemTime::now()) {
            Some(hint) if hint <= ceiling => hint,
            _ => computed,
        }
    }

    async fn decide(
        &self,
        outcome: &HttpOutcome,
        attempt: usize,
        authentication: &dyn AuthenticationProvider,
    ) -> crate::Result<bool> {
        let status = outcome.status().as_u16();
        if self.is_authentication_status(status) {
            let recovered = authentication.attempt_recovery(outcome).await?;
            debug!(status, recovered, "authentication recovery finished");
            return Ok(recovered);
        }
        if self.is_transient_status(status) {
            let delay = self.delay_for(outcome, attempt);
            debug!(status, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            if !delay.is_zero() {
                sleep(delay).await;
            }
            return Ok(true);
        }
        Ok(false)
    }
}

impl RetryStrategy for DefaultRetryStrategy {
    fn should_retry<'a>(
        &'a self,
        outcome: &'a HttpOutcome,
        attempt: usize,
        authentication: &'a dyn AuthenticationProvider,
    ) -> BoxFuture<'a, crate::Result<bool>> {
        self.decide(outcome, attempt, authentication).boxed()
    }
}

fn default_authentication_status_codes() -> BTreeSet<u16> {
    [401_u16, 403].into_iter().collect()
}

fn default_transient_status_codes() -> BTreeSet<u16> {
    [408_u16, 500, 502, 503, 504].into_iter().collect()
}
