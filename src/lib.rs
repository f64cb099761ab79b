//! `reqflow` turns typed request descriptions into decoded responses, applying
//! authentication, retry with backoff, and optional response caching along the way.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use reqflow::prelude::{BearerTokenProvider, Client, DefaultRetryStrategy, RequestDescriptor, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")
//!         .client_name("my-app/1.0")
//!         .request_timeout(Duration::from_secs(3))
//!         .authentication(BearerTokenProvider::new("token"))
//!         .retry_policy(
//!             RetryPolicy::standard().max_retries(2).strategy(Arc::new(
//!                 DefaultRetryStrategy::new()
//!                     .base_delay(Duration::from_millis(100))
//!                     .multiplier(2.0),
//!             )),
//!         )
//!         .try_build()?;
//!
//!     let create = RequestDescriptor::<Item>::post("/v1/items")
//!         .json(&serde_json::json!({ "name": "demo" }))?
//!         .build();
//!     let created = client.send(&create).await?;
//!
//!     println!("created id={}", created.id);
//!     Ok(())
//! }
//! ```
//!
//! # Retry Behaviour
//!
//! - Transport failures and timeouts are returned immediately.
//! - `401`/`403` retry only when the authentication provider recovers.
//! - `408`/`500`/`502`/`503`/`504` retry after a backoff, up to `max_retries`.

mod auth;
mod cache;
mod client;
mod codec;
pub mod config;
mod error;
mod hyper_transport;
mod metrics;
mod multipart;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::auth::{
    AuthenticationPolicy, AuthenticationProvider, BearerTokenProvider, NoAuthentication,
    StaticHeader, refresh_failed,
};
pub use crate::cache::{CacheKey, CachedEntry, MemoryCache, NoCache, ResponseCache};
pub use crate::client::{CallOptions, Client, ClientBuilder};
pub use crate::codec::{Codec, CodecError, JsonCodec, KeyStrategy};
pub use crate::config::ClientConfig;
pub use crate::error::{Error, ErrorCode, ErrorKind, TransportErrorKind};
pub use crate::hyper_transport::{HyperTransport, HyperTransportBuilder};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::multipart::MultipartField;
pub use crate::request::{
    CachePolicy, ContentEncoding, RequestDescriptor, RequestDescriptorBuilder, Target,
};
pub use crate::response::HttpOutcome;
pub use crate::retry::{DefaultRetryStrategy, RetryPolicy, RetryStrategy};
pub use crate::transport::{RawResponse, Transport, TransportRequest};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AuthenticationPolicy, AuthenticationProvider, BearerTokenProvider, CachePolicy,
        CallOptions, Client, ClientConfig, ClientMetricsSnapshot, DefaultRetryStrategy, Error,
        ErrorCode, ErrorKind, HttpOutcome, MemoryCache, MultipartField, RequestDescriptor,
        Result, RetryPolicy, RetryStrategy, StaticHeader, Transport, TransportRequest,
    };
}
