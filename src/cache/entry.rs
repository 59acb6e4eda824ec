use bytes::Bytes;
use time::OffsetDateTime;

use super::key::{CacheKey, InvalidKeyInput};
use super::record::CacheRecord;

/// One cached response addressable by host and path.
///
/// `validator` is opaque; the empty string means no validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub host: String,
    pub path: String,
    pub content_type: String,
    pub validator: String,
    pub body: Bytes,
    pub created_at: i64,
}

impl CacheEntry {
    pub fn new(
        host: impl Into<String>,
        path: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            content_type: content_type.into(),
            validator: String::new(),
            body: body.into(),
            created_at: unix_now(),
        }
    }

    pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
        self.validator = validator.into();
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn validator(&self) -> Option<&str> {
        if self.validator.is_empty() {
            None
        } else {
            Some(&self.validator)
        }
    }

    pub fn key(&self) -> Result<CacheKey, InvalidKeyInput> {
        CacheKey::derive(&self.host, &self.path)
    }

    pub fn record(&self) -> CacheRecord {
        CacheRecord {
            created_at: self.created_at,
            content_type: self.content_type.clone(),
            validator: self.validator.clone(),
            body: self.body.clone(),
        }
    }

    pub fn from_record(
        host: impl Into<String>,
        path: impl Into<String>,
        record: CacheRecord,
    ) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            content_type: record.content_type,
            validator: record.validator,
            body: record.body,
            created_at: record.created_at,
        }
    }
}

/// Seconds since the unix epoch, UTC.
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Generated weak validator of the form `w/<created_at>`.
pub fn weak_validator(created_at: i64) -> String {
    format!("w/{created_at}")
}
