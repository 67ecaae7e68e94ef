// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wafprobe::error::{ReplayError, ReplayResult};
use wafprobe::pipeline::ProgressSink;
use wafprobe::testcases::TemplateLoader;

/// Substrings (lowercase) the mock WAF blocks on.
pub const ATTACK_MARKERS: &[&str] = &[
    "/etc/passwd",
    "${",
    "' and ",
    "union%20all%20select",
    "169.254.169.254",
    "%3cscript",
    "onload=",
];

pub fn waf_rules(request: &str) -> u16 {
    let request = request.to_ascii_lowercase();
    if ATTACK_MARKERS.iter().any(|m| request.contains(m)) {
        403
    } else {
        200
    }
}

type Rules = dyn Fn(&str) -> u16 + Send + Sync;

/// Minimal HTTP/1.1 target on a raw listener: one request per connection,
/// answers with the status chosen by its rules.
pub struct MockTarget {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockTarget {
    pub async fn start() -> Self {
        Self::with_rules(waf_rules, Duration::ZERO).await
    }

    pub async fn with_delay(delay: Duration) -> Self {
        Self::with_rules(waf_rules, delay).await
    }

    pub async fn with_rules<F>(rules: F, delay: Duration) -> Self
    where
        F: Fn(&str) -> u16 + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let rules: Arc<Rules> = Arc::new(rules);

        let seen = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let rules = Arc::clone(&rules);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let _ = serve(stream, rules, delay, seen).await;
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Drop for MockTarget {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    rules: Arc<Rules>,
    delay: Duration,
    seen: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let request = read_request(&mut stream).await?;
    let status = (*rules)(&request);
    seen.lock().unwrap().push(request);

    tokio::time::sleep(delay).await;
    let (reason, body) = if status == 403 {
        ("Forbidden", "blocked")
    } else {
        ("OK", "hello")
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Splits a recorded request into (head, body) at the first blank line.
pub fn split_request(request: &str) -> (&str, &str) {
    request.split_once("\r\n\r\n").unwrap_or((request, ""))
}

pub fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// Templates held in memory, listed in insertion order.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    cases: Vec<(String, Vec<u8>)>,
}

impl MemoryLoader {
    pub fn add(mut self, identifier: &str, template: &str) -> Self {
        self.cases
            .push((identifier.to_string(), template.as_bytes().to_vec()));
        self
    }
}

impl TemplateLoader for MemoryLoader {
    fn list(&self) -> ReplayResult<Vec<String>> {
        Ok(self.cases.iter().map(|(id, _)| id.clone()).collect())
    }

    fn read(&self, identifier: &str) -> ReplayResult<Vec<u8>> {
        self.cases
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ReplayError::NotFound(identifier.to_string()))
    }
}

/// `malicious` union-select probes followed by `benign` plain page loads.
pub fn mixed_corpus(malicious: usize, benign: usize) -> MemoryLoader {
    let mut loader = MemoryLoader::default();
    for i in 0..malicious {
        loader = loader.add(
            &format!("sqli/{:02}.http", i),
            &format!(
                "GET /item?id={}%20UNION%20ALL%20SELECT%20password%20FROM%20users HTTP/1.1\r\nHost: shop.example\r\n\r\n",
                i
            ),
        );
    }
    for i in 0..benign {
        loader = loader.add(
            &format!("benign/{:02}.white", i),
            &format!(
                "GET /page/{} HTTP/1.1\r\nHost: shop.example\r\nAccept: text/html\r\n\r\n",
                i
            ),
        );
    }
    loader
}

/// Counts dispatched jobs.
#[derive(Debug, Default)]
pub struct CountingProgress {
    dispatched: AtomicU64,
}

impl CountingProgress {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }
}

impl ProgressSink for CountingProgress {
    fn advance(&self, n: u64) {
        self.dispatched.fetch_add(n, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waf_rules() {
        assert_eq!(waf_rules("GET /?q=%3Cscript%3E HTTP/1.1"), 403);
        assert_eq!(waf_rules("GET /search?q=union+station HTTP/1.1"), 200);
    }

    #[test]
    fn test_header_value() {
        let head = "GET / HTTP/1.1\r\nHost: a\r\nContent-Length: 4";
        assert_eq!(header_value(head, "content-length"), Some("4"));
        assert_eq!(header_value(head, "connection"), None);
    }
}
