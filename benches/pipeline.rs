use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all, ready};
use http::HeaderMap;
use reqflow::prelude::{
    CallOptions, Client, DefaultRetryStrategy, RequestDescriptor, RetryPolicy, Transport,
    TransportRequest,
};
use reqflow::{RawResponse, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::runtime::Runtime;

/// Answers from memory so the numbers measure the pipeline, not sockets.
/// Every `fail_every`-th call returns 503 when `fail_every` is non-zero.
struct InMemoryTransport {
    body: Bytes,
    fail_every: usize,
    calls: AtomicUsize,
}

impl InMemoryTransport {
    fn new(body: &'static [u8], fail_every: usize) -> Arc<Self> {
        Arc::new(Self {
            body: Bytes::from_static(body),
            fail_every,
            calls: AtomicUsize::new(0),
        })
    }

    fn respond(&self) -> BoxFuture<'_, Result<RawResponse>> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let status = if self.fail_every != 0 && call % self.fail_every != 0 {
            503
        } else {
            200
        };
        ready(Ok(RawResponse::new(status, HeaderMap::new(), self.body.clone()))).boxed()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, _request: TransportRequest) -> BoxFuture<'_, Result<RawResponse>> {
        self.respond()
    }

    fn upload(&self, _request: TransportRequest, _body: Bytes) -> BoxFuture<'_, Result<RawResponse>> {
        self.respond()
    }
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Item {
    id: u64,
    name: String,
    tags: Vec<String>,
}

const ITEM_BODY: &[u8] = br#"{"id":7,"name":"lamp","tags":["home","light","sale"]}"#;

fn benchmark_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("build benchmark runtime")
}

fn benchmark_client(transport: Arc<InMemoryTransport>) -> Client {
    Client::builder()
        .base_url("https://api.example.com")
        .retry_policy(
            RetryPolicy::standard()
                .max_retries(3)
                .strategy(Arc::new(
                    DefaultRetryStrategy::new().base_delay(Duration::ZERO),
                )),
        )
        .transport(transport)
        .try_build()
        .expect("build benchmark client")
}

fn bench_send_and_decode(c: &mut Criterion) {
    let runtime = benchmark_runtime();
    let client = benchmark_client(InMemoryTransport::new(ITEM_BODY, 0));
    let get = RequestDescriptor::<Item>::get("/v1/items/7").build();
    let post = RequestDescriptor::<Value>::post("/v1/items")
        .json(&json!({ "name": "lamp", "tags": ["home", "light"] }))
        .expect("encode benchmark payload")
        .build();

    let mut group = c.benchmark_group("send_and_decode");
    group.sample_size(80);
    group.bench_function("get_item", |b| {
        b.to_async(&runtime).iter(|| async {
            let item = client.send(&get).await.expect("get should succeed");
            black_box(item);
        });
    });
    group.bench_function("post_json", |b| {
        b.to_async(&runtime).iter(|| async {
            let value = client.send(&post).await.expect("post should succeed");
            black_box(value);
        });
    });
    group.finish();
}

fn bench_retry_and_cache(c: &mut Criterion) {
    let runtime = benchmark_runtime();
    let flaky = benchmark_client(InMemoryTransport::new(ITEM_BODY, 3));
    let cached = benchmark_client(InMemoryTransport::new(ITEM_BODY, 0));
    let descriptor = RequestDescriptor::<Item>::get("/v1/items/7").build();

    let mut group = c.benchmark_group("retry_and_cache");
    group.sample_size(60);
    group.bench_function("two_retries_then_success", |b| {
        b.to_async(&runtime).iter(|| async {
            let item = flaky.send(&descriptor).await.expect("third attempt succeeds");
            black_box(item);
        });
    });
    group.bench_function("cache_hit", |b| {
        b.to_async(&runtime).iter(|| async {
            let item = cached
                .send_with(&descriptor, CallOptions::new().cached(true))
                .await
                .expect("cached get should succeed");
            black_box(item);
        });
    });
    group.finish();
}

fn bench_concurrent_sends(c: &mut Criterion) {
    let runtime = benchmark_runtime();
    let client = Arc::new(benchmark_client(InMemoryTransport::new(ITEM_BODY, 0)));
    let descriptor = Arc::new(RequestDescriptor::<Item>::get("/v1/items/7").build());

    let mut group = c.benchmark_group("concurrent_sends");
    group.sample_size(40);
    for concurrency in [8_usize, 64] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&runtime).iter(|| {
                    let client = Arc::clone(&client);
                    let descriptor = Arc::clone(&descriptor);
                    async move {
                        let sends = (0..concurrency).map(|_| client.send(&descriptor));
                        for result in join_all(sends).await {
                            black_box(result.expect("concurrent send should succeed"));
                        }
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_send_and_decode,
    bench_retry_and_cache,
    bench_concurrent_sends
);
criterion_main!(benches);
