use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail, ensure};
use bytes::Bytes;
use http::{StatusCode, Uri};
use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::CacheEntry;
use crate::cache::CacheKey;
use crate::logging::PopulationLogBuilder;
use crate::util::{remaining_until, timeout_with_context};

use super::PopulateError;
use super::request::{PopulationBody, PopulationRequest, build_request_head};
use super::response::{ResponseBody, read_response_body, read_response_head};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RESPONSE_BODY: usize = 64 * 1024;
const MAX_RESPONSE_HEADER_BYTES: usize = 32 * 1024;
const FILE_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Uri,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_response_body: usize,
}

impl ClientConfig {
    /// Accepts a plain `http://host[:port]` URL. Any path on the endpoint is ignored;
    /// population requests always target `/cache/populate`.
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint: Uri = endpoint
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid proxy URL '{endpoint}': {err}"))?;
        let config = Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_response_body: DEFAULT_MAX_RESPONSE_BODY,
        };
        config.connect_target()?;
        Ok(config)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_response_body(mut self, limit: usize) -> Self {
        self.max_response_body = limit;
        self
    }

    /// `host:port` the client connects to.
    pub fn connect_target(&self) -> Result<String> {
        match self.endpoint.scheme_str() {
            Some("http") => {}
            Some(other) => bail!("unsupported proxy URL scheme '{other}'; only http is supported"),
            None => bail!("proxy URL '{}' must include the http scheme", self.endpoint),
        }
        let authority = self
            .endpoint
            .authority()
            .ok_or_else(|| anyhow!("proxy URL '{}' is missing a host", self.endpoint))?;
        let host = authority.host();
        ensure!(!host.is_empty(), "proxy URL '{}' is missing a host", self.endpoint);
        let port = authority.port_u16().unwrap_or(80);
        Ok(format!("{host}:{port}"))
    }
}

/// Outcome of a population call the proxy accepted.
#[derive(Debug, Clone)]
pub struct PopulationReceipt {
    pub key: CacheKey,
    pub status: StatusCode,
    pub body_bytes: u64,
    pub response: String,
    pub elapsed: Duration,
}

enum OpenedBody {
    Bytes(Bytes),
    File(AsyncFile),
}

/// Sends population calls to one proxy. Holds no per-entry state, so clones can be
/// shared across tasks freely.
#[derive(Debug, Clone)]
pub struct PopulationClient {
    config: Arc<ClientConfig>,
    target: Arc<str>,
}

impl PopulationClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        ensure!(
            !config.request_timeout.is_zero(),
            "request timeout must be greater than zero"
        );
        ensure!(
            !config.connect_timeout.is_zero(),
            "connect timeout must be greater than zero"
        );
        let target = config.connect_target()?;
        Ok(Self {
            config: Arc::new(config),
            target: Arc::from(target),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn populate(&self, entry: &CacheEntry) -> Result<PopulationReceipt, PopulateError> {
        self.send(&PopulationRequest::from(entry)).await
    }

    pub async fn send(
        &self,
        request: &PopulationRequest,
    ) -> Result<PopulationReceipt, PopulateError> {
        let started = Instant::now();
        let mut log = PopulationLogBuilder::new(request.host.as_str(), request.path.as_str())
            .endpoint(self.target());

        let result = match CacheKey::derive(&request.host, &request.path) {
            Ok(key) => {
                log = log.key(key.as_hex());
                self.deliver(request, key, started).await
            }
            Err(err) => Err(err.into()),
        };

        log = log.elapsed(started.elapsed());
        match &result {
            Ok(receipt) => {
                log = log
                    .bytes(receipt.body_bytes)
                    .status(receipt.status)
                    .outcome("stored");
            }
            Err(err) => {
                if let Some(status) = err.status() {
                    log = log.status(status);
                }
                log = log.outcome(err.outcome()).error(err.to_string());
            }
        }
        log.log();
        result
    }

    async fn deliver(
        &self,
        request: &PopulationRequest,
        key: CacheKey,
        started: Instant,
    ) -> Result<PopulationReceipt, PopulateError> {
        let (body, content_length) = open_body(&request.body).await?;
        let head = build_request_head(request, content_length)?;

        let deadline = started + self.config.request_timeout;
        let (status, response) = self
            .exchange(&head, body, content_length, deadline)
            .await
            .map_err(|cause| PopulateError::Transport { cause })?;

        if status != StatusCode::OK {
            return Err(PopulateError::Failed {
                status,
                body: response.text,
            });
        }

        debug!(key = %key, status = status.as_u16(), "entry stored by proxy");
        Ok(PopulationReceipt {
            key,
            status,
            body_bytes: content_length,
            response: response.text,
            elapsed: started.elapsed(),
        })
    }

    async fn exchange(
        &self,
        head: &[u8],
        body: OpenedBody,
        content_length: u64,
        deadline: Instant,
    ) -> Result<(StatusCode, ResponseBody)> {
        let connect_context = format!("connecting to proxy at {}", self.target);
        let connect_budget =
            remaining_until(deadline, &connect_context)?.min(self.config.connect_timeout);
        let stream = timeout_with_context(
            connect_budget,
            TcpStream::connect(self.target()),
            connect_context,
        )
        .await?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(
                proxy = %self.target,
                error = %err,
                "failed to set TCP_NODELAY on proxy connection"
            );
        }
        trace!(proxy = %self.target, "connected to proxy");

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let sent = match send_request(&mut write_half, head, body, deadline).await {
            Ok(sent) => sent,
            Err(send_err) => {
                // A proxy may answer and close before reading the whole body. Report
                // its status rather than the write error when one arrives.
                drop(write_half);
                return match self.read_response(&mut reader, deadline).await {
                    Ok((status, response)) if status != StatusCode::OK => {
                        debug!(
                            proxy = %self.target,
                            status = status.as_u16(),
                            error = %send_err,
                            "proxy answered before the request was fully sent"
                        );
                        Ok((status, response))
                    }
                    _ => Err(send_err),
                };
            }
        };
        ensure!(
            sent == content_length,
            "body length changed while sending ({sent} of {content_length} bytes)"
        );

        self.read_response(&mut reader, deadline).await
    }

    async fn read_response<R>(
        &self,
        reader: &mut BufReader<R>,
        deadline: Instant,
    ) -> Result<(StatusCode, ResponseBody)>
    where
        R: AsyncRead + Unpin,
    {
        let head = read_response_head(reader, deadline, MAX_RESPONSE_HEADER_BYTES).await?;
        let body = read_response_body(
            reader,
            head.body_plan,
            deadline,
            self.config.max_response_body,
        )
        .await?;
        Ok((head.status, body))
    }
}

/// Writes the head and body, then flushes. Returns the number of body bytes sent.
async fn send_request<W>(
    writer: &mut W,
    head: &[u8],
    body: OpenedBody,
    deadline: Instant,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    write_with_deadline(writer, head, deadline, "sending request head").await?;
    let sent = match body {
        OpenedBody::Bytes(bytes) => {
            write_with_deadline(writer, &bytes, deadline, "sending request body").await?;
            bytes.len() as u64
        }
        OpenedBody::File(mut file) => stream_file_body(&mut file, writer, deadline).await?,
    };
    let context = "flushing request to proxy";
    timeout_with_context(remaining_until(deadline, context)?, writer.flush(), context).await?;
    Ok(sent)
}

async fn open_body(body: &PopulationBody) -> Result<(OpenedBody, u64), PopulateError> {
    match body {
        PopulationBody::Bytes(bytes) => Ok((OpenedBody::Bytes(bytes.clone()), bytes.len() as u64)),
        PopulationBody::File(path) => {
            let to_error = |source: std::io::Error| PopulateError::Body {
                path: path.clone(),
                source,
            };
            let file = AsyncFile::open(path).await.map_err(to_error)?;
            let metadata = file.metadata().await.map_err(to_error)?;
            Ok((OpenedBody::File(file), metadata.len()))
        }
    }
}

async fn write_with_deadline<W>(
    writer: &mut W,
    data: &[u8],
    deadline: Instant,
    context: &str,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    timeout_with_context(
        remaining_until(deadline, context)?,
        writer.write_all(data),
        context,
    )
    .await
}

async fn stream_file_body<R, W>(file: &mut R, writer: &mut W, deadline: Instant) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; FILE_CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let context = "reading body file";
        let read = timeout_with_context(
            remaining_until(deadline, context)?,
            file.read(&mut buffer),
            context,
        )
        .await?;
        if read == 0 {
            break;
        }
        write_with_deadline(writer, &buffer[..read], deadline, "sending request body").await?;
        sent = sent.saturating_add(read as u64);
    }
    Ok(sent)
}
