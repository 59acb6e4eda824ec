use anyhow::{Context, Result, anyhow, bail, ensure};
use http::{StatusCode, Version};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time::Instant;

use crate::util::{remaining_until, timeout_with_context};

const MAX_CHUNK_LINE_LENGTH: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseBodyPlan {
    Empty,
    Fixed(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub body_plan: ResponseBodyPlan,
}

/// Diagnostic body returned by the proxy. `total_bytes` counts everything the
/// proxy sent; `text` holds at most the configured cap.
#[derive(Debug)]
pub(crate) struct ResponseBody {
    pub text: String,
    pub total_bytes: u64,
}

async fn read_line_with_deadline<S>(
    reader: &mut BufReader<S>,
    buf: &mut String,
    deadline: Instant,
    max_len: usize,
) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    ensure!(max_len > 0, "line length limit must be greater than zero");
    buf.clear();
    let mut collected = Vec::new();
    let context = "reading response line from proxy";

    loop {
        let remaining = remaining_until(deadline, context)?;
        let available = timeout_with_context(remaining, reader.fill_buf(), context).await?;

        if available.is_empty() {
            if collected.is_empty() {
                return Ok(0);
            }
            bail!("connection closed while reading response line from proxy");
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if collected
            .len()
            .checked_add(consume)
            .ok_or_else(|| anyhow!("response line length overflow"))?
            > max_len
        {
            bail!("response line exceeds limit of {max_len} bytes");
        }

        collected.extend_from_slice(&available[..consume]);
        reader.consume(consume);

        if newline_pos.is_some() {
            break;
        }
    }

    let string =
        String::from_utf8(collected).map_err(|_| anyhow!("response line contained invalid bytes"))?;
    let len = string.len();
    *buf = string;
    Ok(len)
}

pub fn parse_status_line(value: &str) -> Result<(Version, StatusCode)> {
    let mut parts = value.split_whitespace();
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("status line missing HTTP version"))?;
    let status = parts
        .next()
        .ok_or_else(|| anyhow!("status line missing status code"))?;

    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => bail!("unsupported HTTP version '{other}' from proxy"),
    };

    let status_code: u16 = status
        .parse()
        .with_context(|| format!("invalid status code '{status}'"))?;
    let status = StatusCode::from_u16(status_code)
        .map_err(|_| anyhow!("unsupported status code '{status_code}'"))?;

    Ok((version, status))
}

async fn read_single_head<S>(
    reader: &mut BufReader<S>,
    deadline: Instant,
    max_header_bytes: usize,
) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin,
{
    let mut line = String::new();
    let mut consumed =
        read_line_with_deadline(reader, &mut line, deadline, max_header_bytes).await?;
    if consumed == 0 {
        bail!("proxy closed connection before sending status line");
    }
    let (_, status) = parse_status_line(line.trim_end_matches(['\r', '\n']))?;

    let mut content_length = None;
    let mut chunked = false;
    loop {
        let remaining_budget = max_header_bytes.saturating_sub(consumed);
        ensure!(
            remaining_budget > 0,
            "response headers exceed limit of {max_header_bytes} bytes"
        );
        let read = read_line_with_deadline(reader, &mut line, deadline, remaining_budget).await?;
        if read == 0 {
            bail!("proxy closed connection during response headers");
        }
        consumed += read;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("response header missing ':' separator"))?;
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            ensure!(
                content_length.is_none(),
                "multiple Content-Length headers in response"
            );
            let parsed: u64 = value
                .parse()
                .with_context(|| format!("invalid Content-Length value '{value}'"))?;
            content_length = Some(parsed);
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            chunked = true;
        }
    }

    let body_plan = if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        ResponseBodyPlan::Empty
    } else if chunked {
        ResponseBodyPlan::Chunked
    } else if let Some(length) = content_length {
        if length == 0 {
            ResponseBodyPlan::Empty
        } else {
            ResponseBodyPlan::Fixed(length)
        }
    } else {
        ResponseBodyPlan::UntilClose
    };

    Ok(ResponseHead { status, body_plan })
}

/// Reads the final response head, skipping any interim 1xx responses.
pub(crate) async fn read_response_head<S>(
    reader: &mut BufReader<S>,
    deadline: Instant,
    max_header_bytes: usize,
) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin,
{
    ensure!(
        max_header_bytes > 0,
        "max response header size must be greater than zero"
    );
    loop {
        let head = read_single_head(reader, deadline, max_header_bytes).await?;
        if !head.status.is_informational() {
            return Ok(head);
        }
    }
}

struct CappedBody {
    kept: Vec<u8>,
    total: u64,
    cap: usize,
}

impl CappedBody {
    fn new(cap: usize) -> Self {
        Self {
            kept: Vec::new(),
            total: 0,
            cap,
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.total = self.total.saturating_add(data.len() as u64);
        let room = self.cap.saturating_sub(self.kept.len());
        let take = room.min(data.len());
        self.kept.extend_from_slice(&data[..take]);
    }

    fn finish(self) -> ResponseBody {
        ResponseBody {
            text: String::from_utf8_lossy(&self.kept).into_owned(),
            total_bytes: self.total,
        }
    }
}

async fn read_exact_into<S>(
    reader: &mut BufReader<S>,
    body: &mut CappedBody,
    mut remaining: u64,
    deadline: Instant,
    context: &str,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 8192];
    while remaining > 0 {
        let to_read = remaining.min(buffer.len() as u64) as usize;
        let read = timeout_with_context(
            remaining_until(deadline, context)?,
            reader.read(&mut buffer[..to_read]),
            context,
        )
        .await?;
        if read == 0 {
            bail!("proxy closed connection early while {context}");
        }
        body.push(&buffer[..read]);
        remaining -= read as u64;
    }
    Ok(())
}

pub(crate) async fn read_response_body<S>(
    reader: &mut BufReader<S>,
    plan: ResponseBodyPlan,
    deadline: Instant,
    cap: usize,
) -> Result<ResponseBody>
where
    S: AsyncRead + Unpin,
{
    let mut body = CappedBody::new(cap);
    match plan {
        ResponseBodyPlan::Empty => {}
        ResponseBodyPlan::Fixed(length) => {
            read_exact_into(reader, &mut body, length, deadline, "reading response body").await?;
        }
        ResponseBodyPlan::Chunked => {
            read_chunked_body(reader, &mut body, deadline).await?;
        }
        ResponseBodyPlan::UntilClose => {
            let context = "reading response body until close";
            let mut buffer = [0u8; 8192];
            loop {
                let read = timeout_with_context(
                    remaining_until(deadline, context)?,
                    reader.read(&mut buffer),
                    context,
                )
                .await?;
                if read == 0 {
                    break;
                }
                body.push(&buffer[..read]);
            }
        }
    }
    Ok(body.finish())
}

async fn read_chunked_body<S>(
    reader: &mut BufReader<S>,
    body: &mut CappedBody,
    deadline: Instant,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        let size_bytes =
            read_line_with_deadline(reader, &mut line, deadline, MAX_CHUNK_LINE_LENGTH).await?;
        if size_bytes == 0 {
            bail!("unexpected EOF while reading chunk size");
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let size_str = trimmed
            .split_once(';')
            .map(|(size, _)| size)
            .unwrap_or(trimmed)
            .trim();
        let chunk_size = u64::from_str_radix(size_str, 16)
            .with_context(|| format!("invalid chunk size '{size_str}'"))?;

        if chunk_size == 0 {
            loop {
                let trailer_bytes =
                    read_line_with_deadline(reader, &mut line, deadline, MAX_CHUNK_LINE_LENGTH)
                        .await?;
                if trailer_bytes == 0 || line.trim_end_matches(['\r', '\n']).is_empty() {
                    break;
                }
            }
            return Ok(());
        }

        read_exact_into(reader, body, chunk_size, deadline, "reading chunk data").await?;

        let mut crlf = [0u8; 2];
        let context = "reading chunk terminator";
        timeout_with_context(
            remaining_until(deadline, context)?,
            reader.read_exact(&mut crlf),
            context,
        )
        .await?;
        if &crlf != b"\r\n" {
            bail!("invalid chunk terminator in response body");
        }
    }
}
