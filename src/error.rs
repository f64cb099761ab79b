use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

use crate::codec::CodecError;
use crate::util::truncate_body;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Broad classification used by callers that only care which layer failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request could not be described or built. Caller misuse, never retried.
    Configuration,
    /// The network round trip itself failed.
    Transport,
    /// The transport produced something that is not an HTTP response.
    InvalidResponse,
    /// The server answered with a status outside 200-299.
    HttpStatus,
    /// The server answered successfully but the body did not decode.
    Decoding,
    /// An authentication provider failed while signing or recovering.
    Authentication,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    MissingBaseUrl,
    InvalidUrl,
    InvalidParameter,
    InvalidHeaderName,
    InvalidHeaderValue,
    Encode,
    Authentication,
    Transport,
    Timeout,
    ResponseBodyTooLarge,
    InvalidResponse,
    HttpStatus,
    Decode,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingBaseUrl => "missing_base_url",
            Self::InvalidUrl => "invalid_url",
            Self::InvalidParameter => "invalid_parameter",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::Encode => "encode",
            Self::Authentication => "authentication",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::InvalidResponse => "invalid_response",
            Self::HttpStatus => "http_status",
            Self::Decode => "decode",
        }
    }

    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::MissingBaseUrl
            | Self::InvalidUrl
            | Self::InvalidParameter
            | Self::InvalidHeaderName
            | Self::InvalidHeaderValue
            | Self::Encode => ErrorKind::Configuration,
            Self::Authentication => ErrorKind::Authentication,
            Self::Transport | Self::Timeout | Self::ResponseBodyTooLarge => ErrorKind::Transport,
            Self::InvalidResponse => ErrorKind::InvalidResponse,
            Self::HttpStatus => ErrorKind::HttpStatus,
            Self::Decode => ErrorKind::Decoding,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no base url configured for relative path {path}")]
    MissingBaseUrl { path: String },
    #[error("invalid request url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid request parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to encode request body: {source}")]
    Encode {
        #[source]
        source: CodecError,
    },
    #[error("authentication provider failed: {source}")]
    Authentication {
        #[source]
        source: BoxError,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("invalid http response for {method} {uri}: {reason}")]
    InvalidResponse {
        method: Method,
        uri: String,
        reason: String,
    },
    #[error("http status error {status} for {method} {uri}: {}", truncate_body(.body))]
    HttpStatus {
        status: u16,
        method: Method,
        uri: String,
        headers: Box<HeaderMap>,
        body: Bytes,
    },
    #[error("failed to decode response body: {source}; body={body}")]
    Decode {
        #[source]
        source: CodecError,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingBaseUrl { .. } => ErrorCode::MissingBaseUrl,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Encode { .. } => ErrorCode::Encode,
            Self::Authentication { .. } => ErrorCode::Authentication,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::InvalidResponse { .. } => ErrorCode::InvalidResponse,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::Decode { .. } => ErrorCode::Decode,
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// Wraps any provider failure as an authentication error.
    pub fn authentication(source: impl Into<BoxError>) -> Self {
        Self::Authentication {
            source: source.into(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    /// Raw response body of an HTTP status error.
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::HttpStatus { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn response_headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::HttpStatus { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// Short human-readable summary of what went wrong.
    pub fn description(&self) -> &'static str {
        match self {
            Self::MissingBaseUrl { .. } => "The request has no base URL to resolve its path against.",
            Self::InvalidUrl { .. } => "The request URL could not be constructed.",
            Self::InvalidParameter { .. } => "A request parameter is invalid.",
            Self::InvalidHeaderName { .. } => "A request header name is invalid.",
            Self::InvalidHeaderValue { .. } => "A request header value is invalid.",
            Self::Encode { .. } => "The request body could not be encoded.",
            Self::Authentication { .. } => "The request could not be authenticated.",
            Self::Transport { .. } => "The server could not be reached.",
            Self::Timeout { .. } => "The request timed out.",
            Self::ResponseBodyTooLarge { .. } => "The response was larger than allowed.",
            Self::InvalidResponse { .. } => "The server returned an invalid response.",
            Self::HttpStatus { .. } => "The server rejected the request.",
            Self::Decode { .. } => "The response could not be decoded.",
        }
    }

    /// Technical detail suitable for logs.
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// What the caller can change to make the request succeed. Only
    /// configuration errors carry one.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::MissingBaseUrl { .. } => Some(
                "Set a base URL on the client builder or the request, or use an absolute URL.",
            ),
            Self::InvalidUrl { .. } => {
                Some("Check that the base URL and path form a valid http(s) URL.")
            }
            Self::InvalidParameter { .. } => Some("Check the request parameters."),
            Self::InvalidHeaderName { .. } | Self::InvalidHeaderValue { .. } => {
                Some("Use only visible ASCII characters in header names and values.")
            }
            Self::Encode { .. } => Some("Check that the request body can be represented as JSON."),
            _ => None,
        }
    }
}
