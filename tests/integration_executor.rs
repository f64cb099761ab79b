use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, ready};
use http::{HeaderMap, HeaderValue, Method};
use reqflow::config::{default_config, install_default};
use reqflow::prelude::{
    BearerTokenProvider, CachePolicy, CallOptions, Client, ClientConfig, DefaultRetryStrategy,
    Error, ErrorCode, ErrorKind, RequestDescriptor, RetryPolicy, Transport, TransportRequest,
};
use reqflow::{MemoryCache, RawResponse, TransportErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

type Responder =
    dyn Fn(&TransportRequest, Option<&Bytes>) -> reqflow::Result<RawResponse> + Send + Sync;

#[derive(Clone, Debug)]
struct CapturedCall {
    operation: &'static str,
    request: TransportRequest,
    upload: Option<Bytes>,
}

struct ScriptedTransport {
    responder: Box<Responder>,
    calls: Mutex<Vec<CapturedCall>>,
}

impl ScriptedTransport {
    fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&TransportRequest, Option<&Bytes>) -> reqflow::Result<RawResponse>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers with `responses` in order, repeating the last one.
    fn sequence(responses: Vec<(u16, &'static str)>) -> Arc<Self> {
        let next = AtomicUsize::new(0);
        Self::new(move |_, _| {
            let index = next
                .fetch_add(1, Ordering::SeqCst)
                .min(responses.len().saturating_sub(1));
            let (status, body) = responses[index];
            Ok(RawResponse::new(status, HeaderMap::new(), body))
        })
    }

    fn always(status: u16, body: &'static str) -> Arc<Self> {
        Self::sequence(vec![(status, body)])
    }

    fn calls(&self) -> Vec<CapturedCall> {
        self.calls.lock().expect("lock calls").clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("lock calls").len()
    }

    fn record(
        &self,
        operation: &'static str,
        request: TransportRequest,
        upload: Option<Bytes>,
    ) -> BoxFuture<'_, reqflow::Result<RawResponse>> {
        let result = (self.responder)(&request, upload.as_ref());
        self.calls.lock().expect("lock calls").push(CapturedCall {
            operation,
            request,
            upload,
        });
        ready(result).boxed()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, reqflow::Result<RawResponse>> {
        self.record("send", request, None)
    }

    fn upload(
        &self,
        request: TransportRequest,
        body: Bytes,
    ) -> BoxFuture<'_, reqflow::Result<RawResponse>> {
        self.record("upload", request, Some(body))
    }

    fn download(&self, request: TransportRequest) -> BoxFuture<'_, reqflow::Result<RawResponse>> {
        self.record("download", request, None)
    }
}

fn immediate_retries(max_retries: usize) -> RetryPolicy {
    RetryPolicy::standard()
        .max_retries(max_retries)
        .strategy(Arc::new(
            DefaultRetryStrategy::new().base_delay(Duration::ZERO),
        ))
}

fn client_with(transport: Arc<ScriptedTransport>) -> Client {
    Client::builder()
        .base_url("https://api.example.com")
        .retry_policy(immediate_retries(3))
        .transport(transport)
        .try_build()
        .expect("client should build")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Item {
    id: u64,
    name: String,
    tags: Vec<String>,
}

#[tokio::test]
async fn transient_status_is_retried_up_to_max_then_surfaced() {
    let transport = ScriptedTransport::always(503, "busy");
    let client = client_with(Arc::clone(&transport));
    let descriptor = RequestDescriptor::<Value>::get("/v1/items").build();

    let error = client
        .send(&descriptor)
        .await
        .expect_err("503 every time should fail");

    match &error {
        Error::HttpStatus { status, body, .. } => {
            assert_eq!(*status, 503);
            assert_eq!(body, &Bytes::from_static(b"busy"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(error.kind(), ErrorKind::HttpStatus);
    assert_eq!(transport.call_count(), 4);

    let metrics = client.metrics_snapshot();
    assert_eq!(metrics.retries, 3);
    assert_eq!(metrics.attempts, 4);
    assert_eq!(metrics.requests_failed, 1);
    assert_eq!(metrics.error_counts.get("http_status:503"), Some(&1));
    assert_eq!(metrics.in_flight, 0);
}

#[tokio::test]
async fn transient_status_recovers_on_a_later_attempt() {
    let transport = ScriptedTransport::sequence(vec![(502, ""), (504, ""), (200, r#"{"ok":true}"#)]);
    let client = client_with(Arc::clone(&transport));
    let descriptor = RequestDescriptor::<Value>::get("/v1/health").build();

    let value = client.send(&descriptor).await.expect("third attempt succeeds");
    assert_eq!(value, json!({ "ok": true }));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(client.metrics_snapshot().retries, 2);
}

#[tokio::test]
async fn unauthorized_then_refresh_retries_once_with_new_token() {
    let transport = ScriptedTransport::sequence(vec![(401, "expired"), (200, r#"{"id":"me"}"#)]);
    let refreshes = Arc::new(AtomicUsize::new(0));
    let refresh_counter = Arc::clone(&refreshes);
    let provider = BearerTokenProvider::new("old").with_refresh(move || {
        refresh_counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, Error>(Some("new".to_owned())) }.boxed()
    });
    let client = Client::builder()
        .base_url("https://api.example.com")
        .authentication(provider)
        .retry_policy(immediate_retries(3))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");

    let value = client
        .send(&RequestDescriptor::<Value>::get("/v1/me").build())
        .await
        .expect("retry after refresh succeeds");
    assert_eq!(value["id"], "me");

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(calls[0].request.headers()["authorization"], "Bearer old");
    assert_eq!(calls[1].request.headers()["authorization"], "Bearer new");
    assert_eq!(client.metrics_snapshot().retries, 1);
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let transport = ScriptedTransport::new(|request, _| {
        let status = match request.headers().get("authorization") {
            Some(value) if value == "Bearer old" => 401,
            _ => 200,
        };
        Ok(RawResponse::new(status, HeaderMap::new(), r#"{"id":"me"}"#))
    });
    let refreshes = Arc::new(AtomicUsize::new(0));
    let refresh_counter = Arc::clone(&refreshes);
    let provider = BearerTokenProvider::new("old").with_refresh(move || {
        let generation = refresh_counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, Error>(Some(format!("new-{generation}")))
        }
        .boxed()
    });
    let client = Client::builder()
        .base_url("https://api.example.com")
        .authentication(provider)
        .retry_policy(immediate_retries(3))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");
    let descriptor = RequestDescriptor::<Value>::get("/v1/me").build();

    let (first, second, third) = tokio::join!(
        client.send(&descriptor),
        client.send(&descriptor),
        client.send(&descriptor)
    );
    for result in [first, second, third] {
        assert_eq!(result.expect("retry with refreshed token")["id"], "me");
    }

    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    let calls = transport.calls();
    assert_eq!(calls.len(), 6);
    let refreshed = calls
        .iter()
        .filter(|call| call.request.headers()["authorization"] == "Bearer new-1")
        .count();
    assert_eq!(refreshed, 3);
}

#[tokio::test]
async fn forbidden_with_declined_recovery_is_not_retried() {
    let transport = ScriptedTransport::always(403, "denied");
    let client = Client::builder()
        .base_url("https://api.example.com")
        .authentication(BearerTokenProvider::new("token"))
        .retry_policy(immediate_retries(3))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");

    let error = client
        .send(&RequestDescriptor::<Value>::delete("/v1/items/1").build())
        .await
        .expect_err("403 is surfaced");
    assert_eq!(error.status().map(|status| status.as_u16()), Some(403));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn failing_refresh_propagates_authentication_error() {
    let transport = ScriptedTransport::always(401, "");
    let provider = BearerTokenProvider::empty()
        .with_refresh(|| async { Err::<Option<String>, _>(reqflow::refresh_failed("token endpoint down")) }.boxed());
    let client = Client::builder()
        .base_url("https://api.example.com")
        .authentication(provider)
        .retry_policy(immediate_retries(3))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");

    let error = client
        .send(&RequestDescriptor::<Value>::get("/v1/me").build())
        .await
        .expect_err("refresh failure is terminal");
    assert_eq!(error.code(), ErrorCode::Authentication);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn success_decodes_into_result_type() {
    let transport = ScriptedTransport::always(
        200,
        r#"{"id":7,"name":"lamp","tags":["home","light"]}"#,
    );
    let client = client_with(Arc::clone(&transport));

    let item = client
        .send(&RequestDescriptor::<Item>::get("/v1/items/7").build())
        .await
        .expect("decode item");
    assert_eq!(
        item,
        Item {
            id: 7,
            name: "lamp".to_owned(),
            tags: vec!["home".to_owned(), "light".to_owned()],
        }
    );
    assert_eq!(transport.call_count(), 1);
    assert_eq!(client.metrics_snapshot().retries, 0);
}

#[tokio::test]
async fn undecodable_success_is_a_decode_error_without_retry() {
    let transport = ScriptedTransport::always(200, "<html>oops</html>");
    let client = client_with(Arc::clone(&transport));

    let error = client
        .send(&RequestDescriptor::<Item>::get("/v1/items/7").build())
        .await
        .expect_err("html is not an item");
    match &error {
        Error::Decode { body, .. } => assert_eq!(body, "<html>oops</html>"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(error.kind(), ErrorKind::Decoding);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(client.metrics_snapshot().decode_errors, 1);
}

#[tokio::test]
async fn empty_success_body_decodes_as_unit_or_none() {
    let transport = ScriptedTransport::always(204, "");
    let client = client_with(Arc::clone(&transport));

    client
        .send(&RequestDescriptor::<()>::delete("/v1/items/7").build())
        .await
        .expect("unit from empty body");
    let missing = client
        .send(&RequestDescriptor::<Option<Item>>::get("/v1/items/7").build())
        .await
        .expect("none from empty body");
    assert_eq!(missing, None);
}

#[tokio::test]
async fn cached_get_skips_the_transport() {
    let transport = ScriptedTransport::always(200, r#"{"version":1}"#);
    let client = client_with(Arc::clone(&transport));
    let descriptor = RequestDescriptor::<Value>::get("/v1/config").build();
    let options = CallOptions::new().cached(true);

    let first = client
        .send_with(&descriptor, options.clone())
        .await
        .expect("first fetch");
    let second = client
        .send_with(&descriptor, options.clone())
        .await
        .expect("cached fetch");
    assert_eq!(first, second);
    assert_eq!(transport.call_count(), 1);

    client.send(&descriptor).await.expect("uncached fetch");
    assert_eq!(transport.call_count(), 2);

    let metrics = client.metrics_snapshot();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.cache_stores, 1);
}

#[tokio::test]
async fn reload_ignoring_cache_refreshes_the_stored_entry() {
    let transport = ScriptedTransport::sequence(vec![
        (200, r#"{"version":1}"#),
        (200, r#"{"version":2}"#),
    ]);
    let client = client_with(Arc::clone(&transport));
    let options = CallOptions::new().cached(true);
    let cached = RequestDescriptor::<Value>::get("/v1/config").build();
    let reload = RequestDescriptor::<Value>::get("/v1/config")
        .cache_policy(CachePolicy::ReloadIgnoringCache)
        .build();

    client
        .send_with(&cached, options.clone())
        .await
        .expect("prime cache");
    let reloaded = client
        .send_with(&reload, options.clone())
        .await
        .expect("reload");
    assert_eq!(reloaded["version"], 2);
    assert_eq!(transport.calls()[1].request.headers()["cache-control"], "no-cache");

    // Same identity, so the reload replaced the stored entry.
    let after = client
        .send_with(&cached, options)
        .await
        .expect("cached after reload");
    assert_eq!(after["version"], 2);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn non_idempotent_methods_are_never_cached() {
    let transport = ScriptedTransport::always(200, r#"{"created":true}"#);
    let cache = Arc::new(MemoryCache::new());
    let client = Client::builder()
        .base_url("https://api.example.com")
        .cache(Arc::clone(&cache) as Arc<dyn reqflow::ResponseCache>)
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");
    let descriptor = RequestDescriptor::<Value>::post("/v1/items")
        .json(&json!({ "name": "demo" }))
        .expect("json")
        .build();

    for _ in 0..2 {
        client
            .send_with(&descriptor, CallOptions::new().cached(true))
            .await
            .expect("post");
    }
    assert_eq!(transport.call_count(), 2);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn no_store_policy_is_not_written_to_the_cache() {
    let transport = ScriptedTransport::always(200, r#"{"secret":true}"#);
    let cache = Arc::new(MemoryCache::new());
    let client = Client::builder()
        .base_url("https://api.example.com")
        .cache(Arc::clone(&cache) as Arc<dyn reqflow::ResponseCache>)
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");
    let descriptor = RequestDescriptor::<Value>::get("/v1/secret")
        .cache_policy(CachePolicy::NoStore)
        .build();

    client
        .send_with(&descriptor, CallOptions::new().cached(true))
        .await
        .expect("get");
    assert!(cache.is_empty());
}

#[tokio::test]
async fn encoded_body_round_trips_through_echo() {
    let transport = ScriptedTransport::new(|request, _| {
        Ok(RawResponse::new(200, HeaderMap::new(), request.body().clone()))
    });
    let client = client_with(Arc::clone(&transport));
    let item = Item {
        id: 42,
        name: "echo \"quoted\" ✓".to_owned(),
        tags: vec![],
    };

    let echoed = client
        .send(
            &RequestDescriptor::<Item>::post("/v1/echo")
                .json(&item)
                .expect("json")
                .build(),
        )
        .await
        .expect("echo");
    assert_eq!(echoed, item);
    assert_eq!(
        transport.calls()[0].request.headers()["content-type"],
        "application/json"
    );
}

#[tokio::test]
async fn missing_base_url_fails_before_any_transport_call() {
    let transport = ScriptedTransport::always(200, "{}");
    let client = Client::builder()
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");

    let error = client
        .send(&RequestDescriptor::<Value>::get("/v1/items").build())
        .await
        .expect_err("no base url");
    assert_eq!(error.code(), ErrorCode::MissingBaseUrl);
    assert_eq!(transport.call_count(), 0);
    assert_eq!(client.metrics_snapshot().error_counts.get("missing_base_url"), Some(&1));
}

#[tokio::test]
async fn invalid_status_is_an_invalid_response() {
    for status in [0_u16, 42, 1000] {
        let transport = ScriptedTransport::always(status, "");
        let client = client_with(Arc::clone(&transport));

        let error = client
            .send(&RequestDescriptor::<Value>::get("/v1/items").build())
            .await
            .expect_err("status is not http");
        assert_eq!(error.code(), ErrorCode::InvalidResponse, "status {status}");
        assert_eq!(transport.call_count(), 1);
    }
}

#[tokio::test]
async fn transport_errors_are_terminal() {
    let transport = ScriptedTransport::new(|request, _| {
        Err(Error::Transport {
            kind: TransportErrorKind::Connect,
            method: request.method().clone(),
            uri: request.url().to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
        })
    });
    let client = client_with(Arc::clone(&transport));

    let error = client
        .send(&RequestDescriptor::<Value>::get("/v1/items").build())
        .await
        .expect_err("connect failure");
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(
        client.metrics_snapshot().error_counts.get("transport:connect"),
        Some(&1)
    );
}

#[tokio::test]
async fn upload_replays_the_same_bytes_on_retry() {
    let transport = ScriptedTransport::sequence(vec![(503, ""), (201, r#"{"stored":true}"#)]);
    let client = client_with(Arc::clone(&transport));
    let descriptor = RequestDescriptor::<Value>::put("/v1/blobs/1")
        .try_header("content-type", "application/octet-stream")
        .expect("header")
        .build();

    let value = client
        .upload(&descriptor, Bytes::from_static(b"\x00\x01payload"))
        .await
        .expect("upload succeeds on retry");
    assert_eq!(value["stored"], true);

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert_eq!(call.operation, "upload");
        assert_eq!(
            call.upload.as_deref(),
            Some(&b"\x00\x01payload"[..])
        );
        assert_eq!(call.request.headers()["content-type"], "application/octet-stream");
    }
}

#[tokio::test]
async fn download_url_returns_raw_bytes() {
    let transport = ScriptedTransport::new(|request, _| {
        assert_eq!(request.method(), Method::GET);
        Ok(RawResponse::new(200, HeaderMap::new(), &b"\x89PNG raw"[..]))
    });
    let client = Client::builder()
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");

    let bytes = client
        .download_url("https://cdn.example.com/logo.png?sig=abc")
        .await
        .expect("download");
    assert_eq!(&bytes[..], b"\x89PNG raw");

    let calls = transport.calls();
    assert_eq!(calls[0].operation, "download");
    assert_eq!(calls[0].request.headers()["accept"], "*/*");
    assert_eq!(
        calls[0].request.url().as_str(),
        "https://cdn.example.com/logo.png?sig=abc"
    );
}

#[tokio::test]
async fn download_failure_surfaces_http_status() {
    let transport = ScriptedTransport::always(404, "missing");
    let client = client_with(Arc::clone(&transport));

    let error = client
        .download(&RequestDescriptor::<Bytes>::get("/files/none").build())
        .await
        .expect_err("404");
    assert_eq!(error.status().map(|status| status.as_u16()), Some(404));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn call_options_retry_policy_overrides_client_policy() {
    let transport = ScriptedTransport::always(500, "");
    let client = client_with(Arc::clone(&transport));
    let descriptor = RequestDescriptor::<Value>::get("/v1/items")
        .retry_policy(immediate_retries(1))
        .build();

    client
        .send(&descriptor)
        .await
        .expect_err("descriptor policy allows one retry");
    assert_eq!(transport.call_count(), 2);

    client
        .send_with(&descriptor, CallOptions::new().retry_policy(RetryPolicy::disabled()))
        .await
        .expect_err("call option disables retries");
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn short_retry_after_replaces_default_backoff() {
    let next = AtomicUsize::new(0);
    let transport = ScriptedTransport::new(move |_, _| {
        if next.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut headers = HeaderMap::new();
            headers.insert("retry-after", HeaderValue::from_static("0"));
            Ok(RawResponse::new(503, headers, ""))
        } else {
            Ok(RawResponse::new(200, HeaderMap::new(), "{}"))
        }
    });
    let client = Client::builder()
        .base_url("https://api.example.com")
        .retry_policy(
            RetryPolicy::standard().strategy(Arc::new(
                DefaultRetryStrategy::new().base_delay(Duration::from_secs(5)),
            )),
        )
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");

    let started = Instant::now();
    client
        .send(&RequestDescriptor::<Value>::get("/v1/items").build())
        .await
        .expect("second attempt succeeds");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_operations_keep_separate_attempt_counters() {
    let transport = ScriptedTransport::new(|request, _| {
        let status = if request.url().path() == "/flaky" { 503 } else { 200 };
        Ok(RawResponse::new(status, HeaderMap::new(), "{}"))
    });
    let client = Client::builder()
        .base_url("https://api.example.com")
        .retry_policy(immediate_retries(2))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .try_build()
        .expect("client should build");
    let flaky = RequestDescriptor::<Value>::get("/flaky").build();
    let steady = RequestDescriptor::<Value>::get("/steady").build();

    let (first, second, third) = tokio::join!(
        client.send(&flaky),
        client.send(&flaky),
        client.send(&steady)
    );
    assert!(first.is_err());
    assert!(second.is_err());
    assert!(third.is_ok());

    let calls = transport.calls();
    let flaky_calls = calls
        .iter()
        .filter(|call| call.request.url().path() == "/flaky")
        .count();
    assert_eq!(flaky_calls, 6);
    assert_eq!(calls.len(), 7);
}

#[tokio::test]
async fn process_default_config_is_set_once() {
    let installed = install_default(
        ClientConfig::new()
            .with_base_url("https://default.example.com")
            .with_client_name("defaults-test"),
    );
    assert!(installed.is_ok());

    let rejected = install_default(ClientConfig::new().with_base_url("https://other.example.com"))
        .expect_err("second install is rejected");
    assert_eq!(rejected.base_url(), Some("https://other.example.com"));

    let config = default_config();
    assert_eq!(config.base_url(), Some("https://default.example.com"));
    assert_eq!(config.client_name(), "defaults-test");

    let client = Client::from_default().expect("hyper client from defaults");
    assert_eq!(client.config().base_url(), Some("https://default.example.com"));
}
