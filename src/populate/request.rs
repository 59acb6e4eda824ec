use std::path::PathBuf;

use bytes::Bytes;
use http::HeaderValue;

use crate::cache::CacheEntry;

use super::{POPULATE_PATH, PopulateError};

/// Body source for a population call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulationBody {
    Bytes(Bytes),
    /// Streamed from disk; the length is taken from file metadata when the call starts.
    File(PathBuf),
}

/// Everything needed for one population call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationRequest {
    pub host: String,
    pub path: String,
    pub content_type: String,
    pub validator: String,
    pub body: PopulationBody,
}

impl PopulationRequest {
    pub fn file(
        host: impl Into<String>,
        path: impl Into<String>,
        content_type: impl Into<String>,
        body_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            content_type: content_type.into(),
            validator: String::new(),
            body: PopulationBody::File(body_path.into()),
        }
    }

    pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
        self.validator = validator.into();
        self
    }
}

impl From<CacheEntry> for PopulationRequest {
    fn from(entry: CacheEntry) -> Self {
        Self {
            host: entry.host,
            path: entry.path,
            content_type: entry.content_type,
            validator: entry.validator,
            body: PopulationBody::Bytes(entry.body),
        }
    }
}

impl From<&CacheEntry> for PopulationRequest {
    fn from(entry: &CacheEntry) -> Self {
        Self::from(entry.clone())
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, PopulateError> {
    HeaderValue::from_str(value).map_err(|source| PopulateError::InvalidHeader { name, source })
}

fn push_header(buffer: &mut Vec<u8>, name: &str, value: &HeaderValue) {
    buffer.extend_from_slice(name.as_bytes());
    buffer.extend_from_slice(b": ");
    buffer.extend_from_slice(value.as_bytes());
    buffer.extend_from_slice(b"\r\n");
}

/// Serializes the request line and headers. Header values are validated before
/// anything is written so a bad entry never reaches the network.
pub(crate) fn build_request_head(
    request: &PopulationRequest,
    content_length: u64,
) -> Result<Vec<u8>, PopulateError> {
    let host = header_value("Host", &request.host)?;
    let target_path = header_value("Target-Path", &request.path)?;
    let content_type = header_value("Content-Type", &request.content_type)?;
    let validator = if request.validator.is_empty() {
        None
    } else {
        Some(header_value("ETag", &request.validator)?)
    };

    let mut buffer = Vec::with_capacity(256);
    buffer.extend_from_slice(b"POST ");
    buffer.extend_from_slice(POPULATE_PATH.as_bytes());
    buffer.extend_from_slice(b" HTTP/1.1\r\n");

    push_header(&mut buffer, "Host", &host);
    push_header(&mut buffer, "Target-Path", &target_path);
    push_header(&mut buffer, "Content-Type", &content_type);
    if let Some(validator) = validator.as_ref() {
        push_header(&mut buffer, "ETag", validator);
    }
    buffer.extend_from_slice(b"Content-Length: ");
    buffer.extend_from_slice(content_length.to_string().as_bytes());
    buffer.extend_from_slice(b"\r\n");
    buffer.extend_from_slice(b"Connection: close\r\n");

    buffer.extend_from_slice(b"\r\n");
    Ok(buffer)
}
