use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::codec::{Codec, JsonCodec, decode_as};
use crate::error::Error;
use crate::util::truncate_body;

/// A completed round trip with a valid HTTP status.
#[derive(Clone, Debug)]
pub struct HttpOutcome {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpOutcome {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
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

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        self.decode_with(&JsonCodec::new())
    }

    pub(crate) fn decode_with<T>(&self, codec: &dyn Codec) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        decode_as(codec, &self.body).map_err(|source| Error::Decode {
            source,
            body: truncate_body(&self.body),
        })
    }
}
