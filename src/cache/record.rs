//! Binary cache record layout.
//!
//! Every integer is a little-endian `i64`:
//!
//! ```text
//! created_at | content_type_len | content_type | validator_len | validator | body_len | body
//! ```
//!
//! Strings are raw UTF-8 without a terminator. Nothing follows the body.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

const INT_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub created_at: i64,
    pub content_type: String,
    pub validator: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    CreatedAt,
    ContentTypeLength,
    ContentType,
    ValidatorLength,
    Validator,
    BodyLength,
    Body,
}

impl RecordField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::CreatedAt => "created_at",
            RecordField::ContentTypeLength => "content_type length",
            RecordField::ContentType => "content_type",
            RecordField::ValidatorLength => "validator length",
            RecordField::Validator => "validator",
            RecordField::BodyLength => "body length",
            RecordField::Body => "body",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("truncated record: {field} needs {declared} bytes but only {remaining} remain")]
    Truncated {
        field: RecordField,
        declared: u64,
        remaining: usize,
    },
    #[error("record declares negative {field} ({declared})")]
    NegativeLength { field: RecordField, declared: i64 },
    #[error("record {field} is not valid UTF-8")]
    InvalidUtf8 { field: RecordField },
    #[error("record has {count} unexpected trailing bytes after the body")]
    TrailingBytes { count: usize },
}

impl RecordError {
    pub fn is_truncated(&self) -> bool {
        matches!(self, RecordError::Truncated { .. })
    }
}

pub fn encoded_len(record: &CacheRecord) -> usize {
    INT_LEN * 4 + record.content_type.len() + record.validator.len() + record.body.len()
}

pub fn encode(record: &CacheRecord) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(encoded_len(record));
    write_header(
        &mut buffer,
        record.created_at,
        &record.content_type,
        &record.validator,
        record.body.len() as u64,
    );
    buffer.extend_from_slice(&record.body);
    buffer
}

/// Everything that precedes the body, for callers that stream the body separately.
pub fn encode_header(
    created_at: i64,
    content_type: &str,
    validator: &str,
    body_len: u64,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(INT_LEN * 4 + content_type.len() + validator.len());
    write_header(&mut buffer, created_at, content_type, validator, body_len);
    buffer
}

fn write_header(
    buffer: &mut Vec<u8>,
    created_at: i64,
    content_type: &str,
    validator: &str,
    body_len: u64,
) {
    buffer.extend_from_slice(&created_at.to_le_bytes());
    buffer.extend_from_slice(&(content_type.len() as i64).to_le_bytes());
    buffer.extend_from_slice(content_type.as_bytes());
    buffer.extend_from_slice(&(validator.len() as i64).to_le_bytes());
    buffer.extend_from_slice(validator.as_bytes());
    buffer.extend_from_slice(&(body_len as i64).to_le_bytes());
}

pub fn decode(buf: &[u8]) -> Result<CacheRecord, RecordError> {
    let mut cursor = Cursor { buf, pos: 0 };

    let created_at = cursor.read_i64(RecordField::CreatedAt)?;
    let content_type =
        cursor.read_string(RecordField::ContentTypeLength, RecordField::ContentType)?;
    let validator = cursor.read_string(RecordField::ValidatorLength, RecordField::Validator)?;
    let body_len = cursor.read_len(RecordField::BodyLength)?;
    let body = cursor.take(body_len, RecordField::Body)?;

    let trailing = cursor.remaining();
    if trailing > 0 {
        return Err(RecordError::TrailingBytes { count: trailing });
    }

    Ok(CacheRecord {
        created_at,
        content_type,
        validator,
        body: Bytes::copy_from_slice(body),
    })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: u64, field: RecordField) -> Result<&'a [u8], RecordError> {
        let remaining = self.remaining();
        if len > remaining as u64 {
            return Err(RecordError::Truncated {
                field,
                declared: len,
                remaining,
            });
        }
        let len = len as usize;
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_i64(&mut self, field: RecordField) -> Result<i64, RecordError> {
        let bytes = self.take(INT_LEN as u64, field)?;
        let mut raw = [0u8; INT_LEN];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    fn read_len(&mut self, field: RecordField) -> Result<u64, RecordError> {
        let declared = self.read_i64(field)?;
        u64::try_from(declared).map_err(|_| RecordError::NegativeLength { field, declared })
    }

    fn read_string(
        &mut self,
        len_field: RecordField,
        field: RecordField,
    ) -> Result<String, RecordError> {
        let len = self.read_len(len_field)?;
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| RecordError::InvalidUtf8 { field })
    }
}
