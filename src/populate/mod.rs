//! Client side of the cache-population side channel.
//!
//! A population call is a `POST /cache/populate` whose `Host` and `Target-Path`
//! headers name the logical cache entry and whose body is stored verbatim by the
//! proxy. Only a `200` response counts as stored.

mod batch;
mod client;
mod request;
mod response;

use std::path::PathBuf;

use http::StatusCode;
use http::header::InvalidHeaderValue;
use thiserror::Error;

use crate::cache::InvalidKeyInput;

pub use batch::{BatchDriver, BatchReport, EntryResult};
pub use client::{ClientConfig, PopulationClient, PopulationReceipt};
pub use request::{PopulationBody, PopulationRequest};

pub const POPULATE_PATH: &str = "/cache/populate";

#[derive(Debug, Error)]
pub enum PopulateError {
    #[error(transparent)]
    InvalidKey(#[from] InvalidKeyInput),
    #[error("invalid {name} header value")]
    InvalidHeader {
        name: &'static str,
        #[source]
        source: InvalidHeaderValue,
    },
    #[error("failed to open body file {}", .path.display())]
    Body {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("population failed with status {status}: {body}")]
    Failed { status: StatusCode, body: String },
    #[error("transport error: {cause:#}")]
    Transport { cause: anyhow::Error },
}

impl PopulateError {
    /// Short label used in structured logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            PopulateError::InvalidKey(_) => "invalid_key",
            PopulateError::InvalidHeader { .. } => "invalid_header",
            PopulateError::Body { .. } => "body_unreadable",
            PopulateError::Failed { .. } => "rejected",
            PopulateError::Transport { .. } => "transport_error",
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PopulateError::Failed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, PopulateError::Transport { .. })
    }
}

#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    use std::time::Duration;

    use anyhow::Result;
    use tokio::io::{AsyncRead, BufReader};
    use tokio::time::Instant;

    pub use super::response::parse_status_line;

    /// Reads a full population response and returns its status and captured body.
    pub async fn read_population_response<S>(
        reader: &mut BufReader<S>,
        timeout: Duration,
        max_header_bytes: usize,
        max_body: usize,
    ) -> Result<(u16, String)>
    where
        S: AsyncRead + Unpin,
    {
        let deadline = Instant::now() + timeout;
        let head = super::response::read_response_head(reader, deadline, max_header_bytes).await?;
        let body =
            super::response::read_response_body(reader, head.body_plan, deadline, max_body).await?;
        Ok((head.status.as_u16(), body.text))
    }
}
