// File: request.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Raw request templates and their wire form.
//!
//! Templates are stored exactly as they should hit the wire, including
//! deliberately odd header lines. Only `Host`, `Connection` and
//! `Content-Length` are ever rewritten; every other byte of the head and the
//! whole body pass through untouched.

use crate::error::{ReplayError, ReplayResult};

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTemplate {
    request_line: Vec<u8>,
    headers: Vec<Vec<u8>>,
    body: Vec<u8>,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn header_name(line: &[u8]) -> Option<&[u8]> {
    let colon = line.iter().position(|&b| b == b':')?;
    Some(line[..colon].trim_ascii())
}

impl RequestTemplate {
    /// Splits a template at its first blank line.
    pub fn parse(raw: &[u8]) -> ReplayResult<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ReplayError::MalformedTemplate("empty template".to_string()));
        }

        let crlf = find(raw, b"\r\n\r\n").map(|pos| (pos, 4));
        let lf = find(raw, b"\n\n").map(|pos| (pos, 2));
        let (head_end, sep_len) = match (crlf, lf) {
            (Some(a), Some(b)) => {
                if a.0 <= b.0 {
                    a
                } else {
                    b
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => {
                return Err(ReplayError::MalformedTemplate(
                    "missing blank line after headers".to_string(),
                ))
            }
        };

        let head = &raw[..head_end];
        let body = raw[head_end + sep_len..].to_vec();

        let mut lines = head.split(|&b| b == b'\n').map(strip_cr);
        let request_line = lines.next().unwrap_or_default().to_vec();
        let tokens = request_line
            .split(|b| b.is_ascii_whitespace())
            .filter(|t| !t.is_empty())
            .count();
        if tokens < 2 {
            return Err(ReplayError::MalformedTemplate(format!(
                "invalid request line: {}",
                String::from_utf8_lossy(&request_line)
            )));
        }

        let headers = lines.map(<[u8]>::to_vec).collect();

        Ok(Self {
            request_line,
            headers,
            body,
        })
    }

    pub fn method(&self) -> &[u8] {
        self.request_line
            .split(|b| b.is_ascii_whitespace())
            .find(|t| !t.is_empty())
            .unwrap_or_default()
    }

    pub fn is_head(&self) -> bool {
        self.method().eq_ignore_ascii_case(b"HEAD")
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.iter().find_map(|line| {
            let found = header_name(line)?;
            if found.eq_ignore_ascii_case(name.as_bytes()) {
                let colon = line.iter().position(|&b| b == b':')?;
                Some(line[colon + 1..].trim_ascii())
            } else {
                None
            }
        })
    }

    pub fn header_count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|line| header_name(line).is_some_and(|n| n.eq_ignore_ascii_case(name.as_bytes())))
            .count()
    }

    /// Replaces the first `name` header in place and drops later duplicates,
    /// or appends the header when the template has none.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let line = format!("{}: {}", name, value).into_bytes();
        let mut replaced = false;
        self.headers.retain_mut(|existing| {
            let matches = header_name(existing)
                .is_some_and(|n| n.eq_ignore_ascii_case(name.as_bytes()));
            if !matches {
                return true;
            }
            if replaced {
                return false;
            }
            *existing = line.clone();
            replaced = true;
            true
        });
        if !replaced {
            self.headers.push(line);
        }
    }

    pub fn set_host(&mut self, host: &str) {
        self.set_header("Host", host);
    }

    pub fn calculate_content_length(&mut self) {
        let length = self.body.len().to_string();
        self.set_header("Content-Length", &length);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let head_len: usize = self.headers.iter().map(|h| h.len() + 2).sum();
        let mut wire =
            Vec::with_capacity(self.request_line.len() + head_len + 4 + self.body.len());
        wire.extend_from_slice(&self.request_line);
        wire.extend_from_slice(CRLF);
        for header in &self.headers {
            wire.extend_from_slice(header);
            wire.extend_from_slice(CRLF);
        }
        wire.extend_from_slice(CRLF);
        wire.extend_from_slice(&self.body);
        wire
    }
}

/// Applies the per-run header policy to templates.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    host: String,
    connection_close: bool,
}

impl RequestBuilder {
    pub fn new(host: &str, connection_close: bool) -> Self {
        Self {
            host: host.to_string(),
            connection_close,
        }
    }

    pub fn prepare(&self, raw: &[u8]) -> ReplayResult<RequestTemplate> {
        let mut request = RequestTemplate::parse(raw)?;
        request.set_host(&self.host);
        if self.connection_close {
            request.set_header("Connection", "close");
        }
        request.calculate_content_length();
        Ok(request)
    }

    pub fn build(&self, raw: &[u8]) -> ReplayResult<Vec<u8>> {
        Ok(self.prepare(raw)?.to_bytes())
    }
}
