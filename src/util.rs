use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use url::Url;

use crate::error::{Error, TransportErrorKind};

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Inserts every header of `from` that `into` does not already carry.
pub(crate) fn insert_missing_headers(into: &mut HeaderMap, from: &HeaderMap) {
    for name in from.keys() {
        if into.contains_key(name) {
            continue;
        }
        for value in from.get_all(name) {
            into.append(name.clone(), value.clone());
        }
    }
}

/// Strips credentials, query and fragment so a url can be logged.
pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    match Url::parse(uri_text) {
        Ok(mut url) => {
            if url.has_authority() {
                let _ = url.set_username("");
                let _ = url.set_password(None);
            }
            url.set_query(None);
            url.set_fragment(None);
            url.into()
        }
        Err(_) => match uri_text.find(['?', '#']) {
            Some(end) => uri_text[..end].to_owned(),
            None => uri_text.to_owned(),
        },
    }
}

/// Appends `path` below the path of `base`.
///
/// The base query survives and comes first; a query carried by `path` is
/// appended after it. The base fragment is dropped.
pub(crate) fn join_base_path(base: &Url, path: &str) -> Url {
    let (path, path_query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };
    let path = path.split('#').next().unwrap_or_default();

    let mut joined = base.clone();
    joined.set_fragment(None);
    let relative = path.trim_start_matches('/');
    if !relative.is_empty() {
        let prefix = base.path().trim_end_matches('/');
        joined.set_path(&format!("{prefix}/{relative}"));
    }
    if let Some(extra) = path_query.filter(|query| !query.is_empty()) {
        let merged = match base.query().filter(|query| !query.is_empty()) {
            Some(existing) => format!("{existing}&{extra}"),
            None => extra.to_owned(),
        };
        joined.set_query(Some(&merged));
    }
    joined
}

/// Parses an absolute http(s) url.
pub(crate) fn parse_http_url(text: &str) -> Result<Url, Error> {
    let url = Url::parse(text).map_err(|source| Error::InvalidUrl {
        url: text.to_owned(),
        reason: source.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl {
            url: text.to_owned(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl {
            url: text.to_owned(),
            reason: "missing host".to_owned(),
        });
    }
    Ok(url)
}

pub(crate) fn append_query_pairs(url: &mut Url, query_pairs: &[(String, String)]) {
    if query_pairs.is_empty() {
        return;
    }
    let mut serializer = url.query_pairs_mut();
    for (name, value) in query_pairs {
        serializer.append_pair(name, value);
    }
}

const DNS_MARKERS: &[&str] = &["dns", "name or service not known", "failed to lookup address"];
const TLS_MARKERS: &[&str] = &["tls", "certificate", "handshake"];
const READ_MARKERS: &[&str] = &[
    "read",
    "connection reset",
    "broken pipe",
    "unexpected eof",
    "connection closed",
];

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    let chain = error_chain_text(error);
    let mentions = |markers: &[&str]| markers.iter().any(|marker| chain.contains(marker));

    match error.is_connect() {
        true if mentions(DNS_MARKERS) => TransportErrorKind::Dns,
        true if mentions(TLS_MARKERS) => TransportErrorKind::Tls,
        true => TransportErrorKind::Connect,
        false if mentions(READ_MARKERS) => TransportErrorKind::Read,
        false => TransportErrorKind::Other,
    }
}

/// Lowercased display text of `error` and every source below it.
fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    std::iter::successors(Some(error), |current| current.source())
        .map(|current| current.to_string())
        .collect::<Vec<_>>()
        .join(": ")
        .to_ascii_lowercase()
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Reads `Retry-After` as delta seconds or an HTTP date relative to `now`.
/// Dates in the past mean "retry now".
pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    raw.parse::<u64>().map(Duration::from_secs).ok().or_else(|| {
        let at = httpdate::parse_http_date(raw).ok()?;
        Some(at.duration_since(now).unwrap_or(Duration::ZERO))
    })
}

/// Lossy text of an error body, cut after `MAX_ERROR_BODY_LEN` characters.
pub(crate) fn truncate_body(body: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(body).into_owned();
    if let Some((cut, _)) = text.char_indices().nth(MAX_ERROR_BODY_LEN) {
        text.truncate(cut);
        text.push_str("...(truncated)");
    }
    text
}
