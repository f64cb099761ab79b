use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_stores: u64,
    pub decode_errors: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Arc<ClientMetricsInner>,
}

#[derive(Debug, Default)]
struct ClientMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    cache_stores: AtomicU64,
    decode_errors: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: ClientMetrics,
}

impl ClientMetrics {
    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_store(&self) {
        self.inner.cache_stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Decoding happens after the round trip has been counted as a success.
    pub(crate) fn record_decode_error(&self) {
        self.inner.decode_errors.fetch_add(1, Ordering::Relaxed);
        self.add_error_count("decode".to_owned());
    }

    pub(crate) fn record_success(&self, status: u16, latency: Duration) {
        self.inner
            .requests_succeeded
            .fetch_add(1, Ordering::Relaxed);
        self.add_status_count(status);
        self.record_latency(latency);
    }

    pub(crate) fn record_failure(&self, error: &Error, latency: Duration) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
        match error {
            Error::HttpStatus { status, .. } => {
                self.add_status_count(*status);
                self.add_error_count(format!("http_status:{status}"));
            }
            Error::Transport { kind, .. } => {
                self.add_error_count(format!("transport:{kind}"));
            }
            _ => self.add_error_count(error.code().as_str().to_owned()),
        }
    }

    pub(crate) fn snapshot(&self) -> ClientMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        ClientMetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_stores: self.inner.cache_stores.load(Ordering::Relaxed),
            decode_errors: self.inner.decode_errors.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, error_key: String) {
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use http::HeaderMap;

    use super::ClientMetrics;
    use crate::error::Error;

    #[test]
    fn in_flight_guard_decrements_on_drop() {
        let metrics = ClientMetrics::default();
        let guard = metrics.enter_in_flight();
        assert_eq!(metrics.snapshot().in_flight, 1);
        drop(guard);
        assert_eq!(metrics.snapshot().in_flight, 0);
    }

    #[test]
    fn failures_are_keyed_by_status_or_code() {
        let metrics = ClientMetrics::default();
        metrics.record_failure(
            &Error::HttpStatus {
                status: 503,
                method: http::Method::GET,
                uri: "https://api.example.com/".to_owned(),
                headers: Box::new(HeaderMap::new()),
                body: Bytes::new(),
            },
            Duration::from_millis(4),
        );
        metrics.record_failure(
            &Error::MissingBaseUrl {
                path: "/v1".to_owned(),
            },
            Duration::from_millis(2),
        );
        metrics.record_success(200, Duration::from_millis(6));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_failed, 2);
        assert_eq!(snapshot.requests_succeeded, 1);
        assert_eq!(snapshot.status_counts.get(&503), Some(&1));
        assert_eq!(snapshot.status_counts.get(&200), Some(&1));
        assert_eq!(snapshot.error_counts.get("http_status:503"), Some(&1));
        assert_eq!(snapshot.error_counts.get("missing_base_url"), Some(&1));
        assert_eq!(snapshot.latency_samples, 3);
        assert!((snapshot.latency_avg_ms - 4.0).abs() < f64::EPSILON);
    }
}
