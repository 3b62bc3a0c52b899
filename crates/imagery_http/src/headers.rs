//! Typed headers of the tus 1.0.0 resumable upload protocol.
use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use headers::{Header, HeaderName, HeaderValue};

pub static TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub static TUS_VERSION: HeaderName = HeaderName::from_static("tus-version");
pub static TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub static TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub static IMAGE_ID: HeaderName = HeaderName::from_static("image-id");
pub static IMAGE_URL: HeaderName = HeaderName::from_static("image-url");

pub static TUS_RESUMABLE_VERSION: HeaderValue = HeaderValue::from_static("1.0.0");

pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

static UPLOAD_OFFSET_NAME: HeaderName = HeaderName::from_static("upload-offset");
static UPLOAD_LENGTH_NAME: HeaderName = HeaderName::from_static("upload-length");
static UPLOAD_METADATA_NAME: HeaderName = HeaderName::from_static("upload-metadata");

fn decode_u64<'i, I>(values: &mut I) -> Result<u64, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let value = values.next().ok_or_else(headers::Error::invalid)?;
    value
        .to_str()
        .map_err(|_| headers::Error::invalid())?
        .parse::<u64>()
        .map_err(|_| headers::Error::invalid())
}

fn encode_u64<E>(n: u64, values: &mut E)
where
    E: Extend<HeaderValue>,
{
    values.extend(std::iter::once(HeaderValue::from(n)))
}

/// `Tus-Resumable`, the protocol version a request or response speaks.
pub struct TusResumable(pub String);

impl TusResumable {
    pub fn is_supported(&self) -> bool {
        self.0 == "1.0.0"
    }
}

impl Header for TusResumable {
    fn name() -> &'static HeaderName {
        &TUS_RESUMABLE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        Ok(TusResumable(s.trim().to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(value))
        }
    }
}

/// `Upload-Offset`, the byte offset a PATCH starts at or the server has reached.
pub struct UploadOffset(pub u64);

impl Header for UploadOffset {
    fn name() -> &'static HeaderName {
        &UPLOAD_OFFSET_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        decode_u64(values).map(UploadOffset)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_u64(self.0, values)
    }
}

/// `Upload-Length`, the total size of an upload declared at creation.
pub struct UploadLength(pub u64);

impl Header for UploadLength {
    fn name() -> &'static HeaderName {
        &UPLOAD_LENGTH_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        decode_u64(values).map(UploadLength)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_u64(self.0, values)
    }
}

/// `Upload-Metadata`: comma separated `key base64(value)` pairs. Keys may appear without a
/// value, in which case they map to an empty string.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UploadMetadata(pub HashMap<String, String>);

impl UploadMetadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl Header for UploadMetadata {
    fn name() -> &'static HeaderName {
        &UPLOAD_METADATA_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;

        let mut pairs = HashMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut parts = pair.split(' ').filter(|p| !p.is_empty());
            let key = parts.next().ok_or_else(headers::Error::invalid)?;
            let value = match parts.next() {
                Some(encoded) => {
                    let bytes = STANDARD
                        .decode(encoded)
                        .map_err(|_| headers::Error::invalid())?;
                    String::from_utf8(bytes).map_err(|_| headers::Error::invalid())?
                }
                None => String::new(),
            };
            if parts.next().is_some() || pairs.insert(key.to_string(), value).is_some() {
                return Err(headers::Error::invalid());
            }
        }

        Ok(UploadMetadata(pairs))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let s = self
            .0
            .iter()
            .map(|(k, v)| match v.is_empty() {
                true => k.clone(),
                false => format!("{} {}", k, STANDARD.encode(v)),
            })
            .collect::<Vec<String>>()
            .join(",");
        if let Ok(value) = HeaderValue::from_str(&s) {
            values.extend(std::iter::once(value))
        }
    }
}
