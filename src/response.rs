// File: response.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::connect::Connection;
use crate::error::{ReplayError, ReplayResult};
use log::trace;
use tokio::io::{AsyncRead, AsyncWrite};

const MAX_HEAD_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_chunked(&self) -> bool {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("transfer-encoding"))
            .any(|(_, v)| {
                v.rsplit(',')
                    .next()
                    .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

/// Parses the status line and header block (without the blank line).
pub fn parse_head(head: &[u8]) -> ReplayResult<ResponseHead> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

    let status_line = lines
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| ReplayError::MalformedResponse("no status line".to_string()))?;

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();
    let reason = parts.next().unwrap_or_default();

    if !version.starts_with("HTTP/") {
        return Err(ReplayError::MalformedResponse(format!(
            "invalid status line: {}",
            status_line
        )));
    }
    let status = code
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|c| (100..=999).contains(c))
        .ok_or_else(|| {
            ReplayError::MalformedResponse(format!("invalid status code: {}", status_line))
        })?;

    let headers = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    Ok(ResponseHead {
        version: version.to_string(),
        status,
        reason: reason.trim().to_string(),
        headers,
    })
}

fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

/// Incremental chunked-body scanner that consumes from the front of a
/// buffer and reports when the terminating chunk and trailers are seen.
#[derive(Debug)]
struct ChunkedBody {
    state: ChunkState,
}

impl ChunkedBody {
    fn new() -> Self {
        Self {
            state: ChunkState::Size,
        }
    }

    fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
        let pos = buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Advances over `buf`, draining what it consumed. Returns true once the
    /// body is complete.
    fn advance(&mut self, buf: &mut Vec<u8>) -> ReplayResult<bool> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line) = Self::take_line(buf) else {
                        return Ok(false);
                    };
                    let text = String::from_utf8_lossy(&line);
                    let size_field = text.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(size_field, 16).map_err(|_| {
                        ReplayError::MalformedResponse(format!("invalid chunk size: {}", text))
                    })?;
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(false);
                    }
                    let take = remaining.min(buf.len() as u64);
                    buf.drain(..take as usize);
                    let left = remaining - take;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                }
                ChunkState::DataEnd => {
                    if Self::take_line(buf).is_none() {
                        return Ok(false);
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(line) = Self::take_line(buf) else {
                        return Ok(false);
                    };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(true),
            }
        }
    }
}

/// Reads exactly one HTTP response from a connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseReader {
    head_request: bool,
}

impl ResponseReader {
    pub fn new(head_request: bool) -> Self {
        Self { head_request }
    }

    pub async fn read_status<S>(&self, conn: &mut Connection<S>) -> ReplayResult<u16>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(self.read_response(conn).await?.status)
    }

    pub async fn read_response<S>(&self, conn: &mut Connection<S>) -> ReplayResult<ResponseHead>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = vec![0u8; READ_CHUNK];

        let head = loop {
            let (head_end, sep_len) = loop {
                if let Some(found) = find_head_end(&buf) {
                    break found;
                }
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(ReplayError::MalformedResponse(
                        "header block too large".to_string(),
                    ));
                }
                let n = conn.read(&mut chunk).await?;
                if n == 0 {
                    return Err(if buf.is_empty() {
                        ReplayError::ConnectionReset("closed before response".to_string())
                    } else {
                        ReplayError::MalformedResponse(
                            "connection closed inside header block".to_string(),
                        )
                    });
                }
                buf.extend_from_slice(&chunk[..n]);
            };

            let head = parse_head(&buf[..head_end])?;
            buf.drain(..head_end + sep_len);

            if (100..200).contains(&head.status) && head.status != 101 {
                trace!("skipping interim {} response", head.status);
                continue;
            }
            break head;
        };

        match self.framing(&head)? {
            BodyFraming::Empty => {}
            BodyFraming::Length(len) => {
                let mut remaining = len.saturating_sub(buf.len() as u64);
                while remaining > 0 {
                    let n = conn.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(ReplayError::ConnectionReset(format!(
                            "closed with {} body bytes outstanding",
                            remaining
                        )));
                    }
                    remaining = remaining.saturating_sub(n as u64);
                }
            }
            BodyFraming::Chunked => {
                let mut body = ChunkedBody::new();
                while !body.advance(&mut buf)? {
                    let n = conn.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(ReplayError::ConnectionReset(
                            "closed inside chunked body".to_string(),
                        ));
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
            BodyFraming::UntilClose => loop {
                if conn.read(&mut chunk).await? == 0 {
                    break;
                }
            },
        }

        Ok(head)
    }

    fn framing(&self, head: &ResponseHead) -> ReplayResult<BodyFraming> {
        if self.head_request || head.status == 204 || head.status == 304 || head.status == 101 {
            return Ok(BodyFraming::Empty);
        }
        if head.is_chunked() {
            return Ok(BodyFraming::Chunked);
        }
        match head.header("content-length") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(BodyFraming::Length)
                .map_err(|_| {
                    ReplayError::MalformedResponse(format!("invalid Content-Length: {}", value))
                }),
            None => Ok(BodyFraming::UntilClose),
        }
    }
}
