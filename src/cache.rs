//! Response caching for idempotent reads.
//!
//! The client only consults a [`ResponseCache`] when a call opts in and the
//! method is GET or HEAD. A hit replaces the round trip entirely.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, HeaderName};
use http::{HeaderMap, Method, StatusCode};

use crate::response::HttpOutcome;
use crate::transport::TransportRequest;
use crate::util::lock_unpoisoned;

const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 256;

/// Identity of a cacheable request: method, resolved url, and the request
/// headers that change the representation or its audience.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: String,
    accept: Option<Vec<u8>>,
    authorization: Option<Vec<u8>>,
}

impl CacheKey {
    pub fn for_request(request: &TransportRequest) -> Self {
        let header_bytes = |name: HeaderName| {
            request
                .headers()
                .get(name)
                .map(|value| value.as_bytes().to_vec())
        };
        Self {
            method: request.method().clone(),
            url: request.url().as_str().to_owned(),
            accept: header_bytes(ACCEPT),
            authorization: header_bytes(AUTHORIZATION),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Clone, Debug)]
pub struct CachedEntry {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    stored_at: Instant,
}

impl CachedEntry {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: Instant::now(),
        }
    }

    pub(crate) fn from_outcome(outcome: &HttpOutcome) -> Self {
        Self::new(
            outcome.status(),
            outcome.headers().clone(),
            outcome.body().clone(),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    pub(crate) fn into_outcome(self) -> HttpOutcome {
        HttpOutcome::new(self.status, self.headers, self.body)
    }
}

/// Storage for previously successful responses.
///
/// Implementations must tolerate concurrent `lookup`/`store` calls.
pub trait ResponseCache: Send + Sync {
    fn lookup(&self, key: &CacheKey) -> Option<CachedEntry>;

    fn store(&self, key: CacheKey, entry: CachedEntry);
}

/// Never hits, never stores.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl ResponseCache for NoCache {
    fn lookup(&self, _key: &CacheKey) -> Option<CachedEntry> {
        None
    }

    fn store(&self, _key: CacheKey, _entry: CachedEntry) {}
}

/// Bounded in-process cache with optional time-to-live. When full, the
/// oldest stored key is evicted first.
#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    time_to_live: Option<Duration>,
    state: Mutex<MemoryCacheState>,
}

#[derive(Debug, Default)]
struct MemoryCacheState {
    entries: HashMap<CacheKey, CachedEntry>,
    order: VecDeque<CacheKey>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            time_to_live: None,
            state: Mutex::new(MemoryCacheState::default()),
        }
    }

    pub fn time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = Some(time_to_live);
        self
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.entries.clear();
        state.order.clear();
    }

    fn is_fresh(&self, entry: &CachedEntry) -> bool {
        self.time_to_live.is_none_or(|ttl| entry.age() < ttl)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache for MemoryCache {
    fn lookup(&self, key: &CacheKey) -> Option<CachedEntry> {
        let mut state = lock_unpoisoned(&self.state);
        let entry = state.entries.get(key)?.clone();
        if self.is_fresh(&entry) {
            return Some(entry);
        }
        state.entries.remove(key);
        state.order.retain(|item| item != key);
        None
    }

    fn store(&self, key: CacheKey, entry: CachedEntry) {
        let mut state = lock_unpoisoned(&self.state);
        if state.entries.insert(key.clone(), entry).is_some() {
            state.order.retain(|item| item != &key);
        }
        state.order.push_back(key);
        while state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.entries.remove(&evicted);
            }
        }
    }
}
