use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::read_until_double_crlf;

/// An entry the stub accepted through its population endpoint.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub content_type: String,
    pub etag: Option<String>,
    pub body: Vec<u8>,
    pub request_head: String,
}

#[derive(Default)]
struct StubState {
    entries: Mutex<HashMap<(String, String), StoredEntry>>,
    heads: Mutex<Vec<String>>,
    populate_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_paths: HashSet<String>,
    delay: Option<StdDuration>,
    stall: bool,
}

#[derive(Default)]
pub struct StubProxyBuilder {
    fail_paths: HashSet<String>,
    delay: Option<StdDuration>,
    stall: bool,
}

impl StubProxyBuilder {
    /// Population calls whose Target-Path equals `path` get a 500.
    pub fn fail_path(mut self, path: &str) -> Self {
        self.fail_paths.insert(path.to_string());
        self
    }

    /// Holds each population call open for `delay` before answering.
    pub fn delay(mut self, delay: StdDuration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Accepts connections and never answers.
    pub fn stall(mut self) -> Self {
        self.stall = true;
        self
    }

    pub async fn spawn(self) -> Result<StubProxy> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(StubState {
            fail_paths: self.fail_paths,
            delay: self.delay,
            stall: self.stall,
            ..StubState::default()
        });
        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(&mut stream, &state).await;
                });
            }
        });
        Ok(StubProxy {
            addr,
            state,
            handle,
        })
    }
}

/// Minimal caching proxy: stores entries posted to `/cache/populate` and serves
/// them back to plain GET requests with `X-Cache: HIT`.
pub struct StubProxy {
    addr: SocketAddr,
    state: Arc<StubState>,
    handle: JoinHandle<()>,
}

impl StubProxy {
    pub fn builder() -> StubProxyBuilder {
        StubProxyBuilder::default()
    }

    pub async fn spawn() -> Result<Self> {
        Self::builder().spawn().await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn populate_calls(&self) -> usize {
        self.state.populate_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self) -> usize {
        self.state.entries.lock().len()
    }

    pub fn entry(&self, host: &str, path: &str) -> Option<StoredEntry> {
        self.state
            .entries
            .lock()
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    pub fn request_heads(&self) -> Vec<String> {
        self.state.heads.lock().clone()
    }
}

impl Drop for StubProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct ParsedHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

impl ParsedHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn parse_head(raw: &str) -> Result<ParsedHead> {
    let mut lines = raw.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| anyhow!("missing method"))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| anyhow!("missing request target"))?
        .to_string();
    let headers = lines
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    Ok(ParsedHead {
        method,
        target,
        headers,
    })
}

async fn handle_connection(stream: &mut TcpStream, state: &StubState) -> Result<()> {
    if state.stall {
        sleep(StdDuration::from_secs(60)).await;
        return Ok(());
    }

    let raw = read_until_double_crlf(stream).await?;
    let head = parse_head(&raw)?;
    match (head.method.as_str(), head.target.as_str()) {
        ("POST", "/cache/populate") => handle_populate(stream, state, &raw, &head).await,
        ("GET", _) => handle_get(stream, state, &head).await,
        _ => write_response(stream, "405 Method Not Allowed", &[], b"").await,
    }
}

async fn handle_populate(
    stream: &mut TcpStream,
    state: &StubState,
    raw: &str,
    head: &ParsedHead,
) -> Result<()> {
    state.populate_calls.fetch_add(1, Ordering::SeqCst);
    state.heads.lock().push(raw.to_string());

    let length: usize = head
        .header("Content-Length")
        .ok_or_else(|| anyhow!("missing Content-Length"))?
        .parse()?;
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;

    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);
    if let Some(delay) = state.delay {
        sleep(delay).await;
    }
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    let (Some(host), Some(path)) = (head.header("Host"), head.header("Target-Path")) else {
        return write_response(stream, "400 Bad Request", &[], b"missing Host or Target-Path")
            .await;
    };
    if state.fail_paths.contains(path) {
        return write_response(
            stream,
            "500 Internal Server Error",
            &[("Content-Type", "text/plain")],
            b"simulated failure",
        )
        .await;
    }

    let entry = StoredEntry {
        content_type: head.header("Content-Type").unwrap_or_default().to_string(),
        etag: head.header("ETag").map(str::to_string),
        body,
        request_head: raw.to_string(),
    };
    state
        .entries
        .lock()
        .insert((host.to_string(), path.to_string()), entry);
    write_response(
        stream,
        "200 OK",
        &[("Content-Type", "text/plain")],
        b"Cache entry stored",
    )
    .await
}

async fn handle_get(stream: &mut TcpStream, state: &StubState, head: &ParsedHead) -> Result<()> {
    let host = head.header("Host").unwrap_or_default().to_string();
    let found = state
        .entries
        .lock()
        .get(&(host, head.target.clone()))
        .cloned();
    match found {
        Some(entry) => {
            let mut headers = vec![
                ("X-Cache", "HIT"),
                ("Content-Type", entry.content_type.as_str()),
            ];
            if let Some(etag) = entry.etag.as_deref() {
                headers.push(("ETag", etag));
            }
            write_response(stream, "200 OK", &headers, &entry.body).await
        }
        None => write_response(stream, "404 Not Found", &[("X-Cache", "MISS")], b"").await,
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let mut response = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    stream.shutdown().await.ok();
    Ok(())
}
