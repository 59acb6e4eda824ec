#![allow(dead_code)]

pub mod logging;
mod stub_proxy;

use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use cachefill::populate::{ClientConfig, PopulationClient};

pub use stub_proxy::{StoredEntry, StubProxy, StubProxyBuilder};

pub fn client_for(proxy: &StubProxy) -> Result<PopulationClient> {
    client_with_timeout(proxy, StdDuration::from_secs(5))
}

pub fn client_with_timeout(
    proxy: &StubProxy,
    request_timeout: StdDuration,
) -> Result<PopulationClient> {
    let config = ClientConfig::new(&proxy.url())?.with_request_timeout(request_timeout);
    PopulationClient::new(config)
}

/// A response read back from the stub with a plain GET.
#[derive(Debug)]
pub struct FetchedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub async fn fetch(addr: SocketAddr, host: &str, path: &str) -> Result<FetchedResponse> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    timeout(StdDuration::from_secs(2), stream.read_to_end(&mut raw)).await??;
    let split = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("response missing header terminator"))?;
    let head = std::str::from_utf8(&raw[..split]).context("invalid UTF-8 response head")?;
    let body = raw[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| anyhow!("missing status code in response line"))?
        .parse::<u16>()
        .map_err(|err| anyhow!("invalid status code: {err}"))?;
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    Ok(FetchedResponse {
        status,
        headers,
        body,
    })
}

pub async fn read_until_double_crlf(stream: &mut TcpStream) -> Result<String> {
    let mut buffer = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let bytes = stream.read(&mut byte).await?;
        if bytes == 0 {
            break;
        }
        buffer.extend_from_slice(&byte);
        if buffer.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(buffer).context("invalid UTF-8 request head")
}
