use std::fmt;

use http::Uri;
use thiserror::Error;

const KEY_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyField {
    Host,
    Path,
}

impl KeyField {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyField::Host => "host",
            KeyField::Path => "path",
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid cache key input: {field} must not be empty")]
pub struct InvalidKeyInput {
    pub field: KeyField,
}

/// Stable identifier for a cache entry addressed by host and path.
///
/// The digest is the first 128 bits of BLAKE3 over `host`, a single NUL byte and
/// `path`, rendered as lowercase hex. Inputs are hashed verbatim. The derivation is
/// identified by [`CacheKey::SCHEME`]; third parties can reproduce keys with any
/// BLAKE3 implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    host: String,
    path: String,
    hex: String,
}

impl CacheKey {
    pub const SCHEME: &'static str = "blake3-128/v1";

    pub fn derive(host: &str, path: &str) -> Result<Self, InvalidKeyInput> {
        if host.trim().is_empty() {
            return Err(InvalidKeyInput {
                field: KeyField::Host,
            });
        }
        if path.trim().is_empty() {
            return Err(InvalidKeyInput {
                field: KeyField::Path,
            });
        }
        let hex = Self::digest_hex(host, path);
        Ok(Self {
            host: host.to_string(),
            path: path.to_string(),
            hex,
        })
    }

    /// Splits an absolute URL such as `http://example.com/test?a=1` into its
    /// host (with any explicit port) and path-and-query before deriving the key.
    /// Userinfo is dropped; it never reaches the proxy's `Host` header.
    pub fn from_url(url: &str) -> Result<Self, InvalidKeyInput> {
        let uri: Uri = url.trim().parse().map_err(|_| InvalidKeyInput {
            field: KeyField::Host,
        })?;
        let authority = uri.authority().ok_or(InvalidKeyInput {
            field: KeyField::Host,
        })?;
        let host = match authority.port() {
            Some(port) => format!("{}:{}", authority.host(), port.as_str()),
            None => authority.host().to_string(),
        };
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/");
        Self::derive(&host, path)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    fn digest_hex(host: &str, path: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(host.as_bytes());
        hasher.update(&[0]);
        hasher.update(path.as_bytes());
        hasher.finalize().to_hex()[..KEY_BYTES * 2].to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}
