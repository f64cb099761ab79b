//! Body (de)serialization.
//!
//! Request bodies travel through the pipeline as [`serde_json::Value`] so a
//! descriptor stays cheap to clone and replay. The [`Codec`] turns that value
//! into wire bytes and back; the client then maps the decoded value onto the
//! caller's result type.

use bytes::Bytes;
use http::HeaderValue;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

pub trait Codec: Send + Sync {
    fn content_type(&self) -> HeaderValue;

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError>;

    fn decode(&self, body: &[u8]) -> Result<Value, CodecError>;
}

/// Decodes `body` with `codec` and maps the result onto `T`.
pub(crate) fn decode_as<T>(codec: &dyn Codec, body: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    let value = codec.decode(body)?;
    Ok(serde_json::from_value(value)?)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Keys pass through unchanged.
    #[default]
    Preserve,
    /// Outgoing keys are written in snake_case; incoming snake_case keys are
    /// read back as camelCase.
    SnakeCase,
}

#[derive(Clone, Debug, Default)]
pub struct JsonCodec {
    key_strategy: KeyStrategy,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> HeaderValue {
        HeaderValue::from_static("application/json")
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        let encoded = match self.key_strategy {
            KeyStrategy::Preserve => serde_json::to_vec(value)?,
            KeyStrategy::SnakeCase => serde_json::to_vec(&rename_keys(value, to_snake_case))?,
        };
        Ok(Bytes::from(encoded))
    }

    fn decode(&self, body: &[u8]) -> Result<Value, CodecError> {
        // 204-style empty bodies decode as null so `()` and `Option<T>` work.
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_slice(body)?;
        Ok(match self.key_strategy {
            KeyStrategy::Preserve => value,
            KeyStrategy::SnakeCase => rename_keys(&value, to_camel_case),
        })
    }
}

fn rename_keys(value: &Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(object) => {
            let mut renamed = Map::with_capacity(object.len());
            for (key, item) in object {
                renamed.insert(rename(key), rename_keys(item, rename));
            }
            Value::Object(renamed)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| rename_keys(item, rename)).collect()),
        other => other.clone(),
    }
}

fn to_snake_case(key: &str) -> String {
    let mut snake = String::with_capacity(key.len() + 4);
    for (index, ch) in key.char_indices() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake
}

fn to_camel_case(key: &str) -> String {
    let mut camel = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' && !camel.is_empty() {
            upper_next = true;
            continue;
        }
        if upper_next {
            camel.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            camel.push(ch);
        }
    }
    camel
}
