use std::time::Duration;

use anyhow::{Result, anyhow};
use http::StatusCode;
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct PopulationLogEvent {
    pub host: String,
    pub path: String,
    pub key: Option<String>,
    pub endpoint: String,
    pub bytes: Option<u64>,
    pub status: Option<u16>,
    pub outcome: String,
    pub elapsed_ms: u128,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct PopulationLogBuilder {
    event: PopulationLogEvent,
}

impl PopulationLogBuilder {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            event: PopulationLogEvent {
                host: host.into(),
                path: path.into(),
                key: None,
                endpoint: String::new(),
                bytes: None,
                status: None,
                outcome: String::from("unknown"),
                elapsed_ms: 0,
                error: None,
            },
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.event.key = Some(key.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.event.endpoint = endpoint.into();
        self
    }

    pub fn bytes(mut self, bytes: u64) -> Self {
        self.event.bytes = Some(bytes);
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.event.status = Some(status.as_u16());
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.event.outcome = outcome.into();
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.event.error = Some(error.into());
        self
    }

    pub fn build(self) -> PopulationLogEvent {
        self.event
    }

    pub fn log(self) {
        log_population(self.build());
    }
}

pub fn log_population(event: PopulationLogEvent) {
    let PopulationLogEvent {
        host,
        path,
        key,
        endpoint,
        bytes,
        status,
        outcome,
        elapsed_ms,
        error,
    } = event;

    let now = OffsetDateTime::now_utc();
    let (year, month, day) = now.to_calendar_date();
    let (hour, minute, second) = now.to_hms();
    let millisecond = now.millisecond();
    let month_number: u8 = month.into();
    let ts = format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millisecond:03}Z",
        month = month_number
    );

    let key_field = key.as_deref();
    let error_field = error.as_deref();

    tracing::info!(
        target = "population_log",
        ts,
        host,
        path,
        key = key_field,
        endpoint,
        bytes,
        status,
        outcome,
        elapsed_ms,
        error = error_field
    );
}
