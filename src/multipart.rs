use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

/// One part of a `multipart/form-data` body.
///
/// Parameters end up in the part's `Content-Disposition` header; `name` and
/// `filename` are the common ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartField {
    parameters: BTreeMap<String, String>,
    data: Bytes,
    mime_type: Option<String>,
}

impl MultipartField {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("name".to_owned(), name.into());
        Self {
            parameters,
            data: data.into(),
            mime_type: None,
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, Bytes::from(value.into()))
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::new(name, data)
            .parameter("filename", filename)
            .mime_type(mime_type)
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn content_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    fn disposition(&self) -> String {
        let mut disposition = String::from("form-data");
        // `name` first, then `filename`, then the rest in key order.
        let ordered = ["name", "filename"]
            .into_iter()
            .filter_map(|key| self.parameters.get_key_value(key))
            .chain(
                self.parameters
                    .iter()
                    .filter(|(key, _)| !matches!(key.as_str(), "name" | "filename")),
            );
        for (key, value) in ordered {
            disposition.push_str("; ");
            disposition.push_str(key);
            disposition.push_str("=\"");
            disposition.push_str(&escape_quoted(value));
            disposition.push('"');
        }
        disposition
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

pub(crate) fn generate_boundary() -> String {
    let mut rng = rand::rng();
    format!(
        "reqflow-boundary-{:016x}{:016x}",
        rng.random::<u64>(),
        rng.random::<u64>()
    )
}

/// Serializes `fields` in order, delimited by `boundary`.
pub(crate) fn encode_multipart(fields: &[MultipartField], boundary: &str) -> Bytes {
    let capacity = fields
        .iter()
        .map(|field| field.data.len() + 128)
        .sum::<usize>()
        + boundary.len()
        + 8;
    let mut body = BytesMut::with_capacity(capacity);
    for field in fields {
        body.put_slice(b"--");
        body.put_slice(boundary.as_bytes());
        body.put_slice(b"\r\nContent-Disposition: ");
        body.put_slice(field.disposition().as_bytes());
        body.put_slice(b"\r\n");
        if let Some(mime_type) = &field.mime_type {
            body.put_slice(b"Content-Type: ");
            body.put_slice(mime_type.as_bytes());
            body.put_slice(b"\r\n");
        }
        body.put_slice(b"\r\n");
        body.put_slice(&field.data);
        body.put_slice(b"\r\n");
    }
    body.put_slice(b"--");
    body.put_slice(boundary.as_bytes());
    body.put_slice(b"--\r\n");
    body.freeze()
}

#[cfg(test)]
mod tests {
    use super::{MultipartField, encode_multipart, generate_boundary};

    #[test]
    fn fields_are_encoded_in_insertion_order() {
        let fields = vec![
            MultipartField::text("title", "hello"),
            MultipartField::file("upload", "a.png", "image/png", &b"\x89PNG"[..]),
        ];
        let body = encode_multipart(&fields, "XYZ");
        let expected = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
hello\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.png\"\r\n\
Content-Type: image/png\r\n\
\r\n\
\x89PNG\r\n\
--XYZ--\r\n";
        assert_eq!(&body[..], &expected[..]);
    }

    #[test]
    fn empty_field_list_still_closes_the_body() {
        let body = encode_multipart(&[], "B");
        assert_eq!(&body[..], b"--B--\r\n");
    }

    #[test]
    fn quotes_in_parameters_are_escaped() {
        let field = MultipartField::text("a\"b", "v");
        let body = encode_multipart(&[field], "B");
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("name=\"a\\\"b\""));
    }

    #[test]
    fn boundaries_are_fresh() {
        assert_ne!(generate_boundary(), generate_boundary());
    }
}
