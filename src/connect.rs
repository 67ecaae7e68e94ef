// File: connect.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{ReplayError, ReplayResult};
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{self, Certificate, ClientConfig, ServerName};
use tokio_rustls::TlsConnector;

static HAS_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\[[^\]]*\]|[^:\[\]]*):[0-9]+$").unwrap());

/// Appends the protocol default port when `addr` carries none.
pub fn normalize_addr(addr: &str, use_tls: bool) -> String {
    if HAS_PORT.is_match(addr) {
        return addr.to_string();
    }
    let port = if use_tls { 443 } else { 80 };
    if addr.contains(':') && !addr.starts_with('[') {
        format!("[{}]:{}", addr, port)
    } else {
        format!("{}:{}", addr, port)
    }
}

fn host_part(addr: &str) -> &str {
    let host = match addr.rfind(':') {
        Some(idx) if HAS_PORT.is_match(addr) => &addr[..idx],
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Runs `dial` up to `max_attempts` times, retrying immediately on error.
pub async fn dial_with_retry<T, F, Fut>(addr: &str, max_attempts: u32, mut dial: F) -> ReplayResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut last_error = String::from("no attempt made");
    for attempt in 1..=max_attempts {
        match dial(attempt).await {
            Ok(conn) => {
                trace!("connected to {} on attempt {}", addr, attempt);
                return Ok(conn);
            }
            Err(e) => {
                debug!("connect to {} attempt {}/{} failed: {}", addr, attempt, max_attempts, e);
                last_error = e.to_string();
            }
        }
    }
    Err(ReplayError::DialFailure {
        addr: addr.to_string(),
        attempts: max_attempts,
        reason: last_error,
    })
}

struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn insecure_tls_connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Plain or TLS byte stream to the target.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A stream with the deadlines of one request/response exchange.
///
/// Writes must finish before the write deadline, reads before the read
/// deadline, and neither may outlive the overall idle deadline.
pub struct Connection<S = Transport> {
    stream: S,
    write_deadline: Instant,
    read_deadline: Instant,
    idle_deadline: Instant,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, timeout_ms: u64) -> Self {
        let now = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        Self {
            stream,
            write_deadline: now + timeout,
            read_deadline: now + timeout * 2,
            idle_deadline: now + timeout * 2,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> ReplayResult<()> {
        let deadline = self.write_deadline.min(self.idle_deadline);
        let write = async {
            self.stream.write_all(buf).await?;
            self.stream.flush().await
        };
        match timeout_at(deadline, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ReplayError::WriteFailure(format!(
                "{} ({} bytes)",
                e,
                buf.len()
            ))),
            Err(_) => Err(ReplayError::WriteFailure("write deadline exceeded".to_string())),
        }
    }

    /// Reads at most `buf.len()` bytes; `Ok(0)` means the peer closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> ReplayResult<usize> {
        let deadline = self.read_deadline.min(self.idle_deadline);
        match timeout_at(deadline, self.stream.read(buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Err(ReplayError::ReadTimeout),
            Ok(Err(e)) => Err(ReplayError::ConnectionReset(e.to_string())),
            Err(_) => Err(ReplayError::ReadTimeout),
        }
    }

    /// Shuts the stream down, giving up at the idle deadline.
    pub async fn close(mut self) {
        match timeout_at(self.idle_deadline, self.stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!("shutdown after exchange failed: {}", e),
            Err(_) => trace!("shutdown after exchange hit the idle deadline"),
        }
    }
}

/// Opens one connection per job to a fixed target.
#[derive(Clone)]
pub struct ConnectionFactory {
    addr: String,
    timeout_ms: u64,
    attempts: u32,
    tls: Option<TlsConnector>,
}

impl ConnectionFactory {
    pub fn new(addr: &str, use_tls: bool, timeout_ms: u64, attempts: u32) -> Self {
        Self {
            addr: normalize_addr(addr, use_tls),
            timeout_ms,
            attempts,
            tls: use_tls.then(insecure_tls_connector),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn connect(&self) -> ReplayResult<Connection> {
        let transport = dial_with_retry(&self.addr, self.attempts, |_| self.dial_once()).await?;
        Ok(Connection::new(transport, self.timeout_ms))
    }

    async fn dial_once(&self) -> io::Result<Transport> {
        let budget = Duration::from_millis(self.timeout_ms);
        let dial = async {
            let tcp = TcpStream::connect(&self.addr).await?;
            tcp.set_nodelay(true)?;
            match &self.tls {
                None => Ok::<_, io::Error>(Transport::Plain(tcp)),
                Some(connector) => {
                    let domain = server_name(host_part(&self.addr))?;
                    let tls = connector.connect(domain, tcp).await?;
                    Ok(Transport::Tls(Box::new(tls)))
                }
            }
        };
        timeout(budget, dial)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
    }
}

fn server_name(host: &str) -> io::Result<ServerName> {
    ServerName::try_from(host)
        .or_else(|_| ServerName::try_from("localhost"))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[rstest]
    #[case("example.com", false, "example.com:80")]
    #[case("example.com", true, "example.com:443")]
    #[case("example.com:8080", false, "example.com:8080")]
    #[case("10.0.0.1:9443", true, "10.0.0.1:9443")]
    #[case("[::1]", false, "[::1]:80")]
    #[case("[::1]:8443", true, "[::1]:8443")]
    #[case("::1", true, "[::1]:443")]
    fn test_normalize_addr(#[case] addr: &str, #[case] tls: bool, #[case] expected: &str) {
        assert_eq!(normalize_addr(addr, tls), expected);
    }

    #[rstest]
    #[case("example.com:443", "example.com")]
    #[case("[::1]:443", "::1")]
    #[case("10.1.1.1:80", "10.1.1.1")]
    fn test_host_part(#[case] addr: &str, #[case] expected: &str) {
        assert_eq!(host_part(addr), expected);
    }

    #[tokio::test]
    async fn test_dial_succeeds_on_fourth_attempt() {
        let calls = AtomicU32::new(0);
        let result = dial_with_retry("target:80", 4, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 4 {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_dial_fails_after_four_attempts() {
        let calls = AtomicU32::new(0);
        let result: ReplayResult<()> = dial_with_retry("target:80", 4, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(ReplayError::DialFailure { addr, attempts, reason }) => {
                assert_eq!(addr, "target:80");
                assert_eq!(attempts, 4);
                assert!(reason.contains("refused"));
            }
            other => panic!("expected dial failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dial_stops_after_first_success() {
        let calls = AtomicU32::new(0);
        let result = dial_with_retry("target:80", 4, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, io::Error>(attempt) }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_refused_port_is_dial_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let factory = ConnectionFactory::new(&addr, false, 200, 4);
        let result = factory.connect().await;
        assert!(matches!(result, Err(ReplayError::DialFailure { attempts: 4, .. })));
    }

    #[tokio::test]
    async fn test_read_times_out_at_deadline() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = Connection::new(client, 20);
        let mut buf = [0u8; 16];

        let started = std::time::Instant::now();
        assert_eq!(conn.read(&mut buf).await, Err(ReplayError::ReadTimeout));
        assert!(started.elapsed() >= Duration::from_millis(35));
    }

    struct StalledShutdown;

    impl AsyncRead for StalledShutdown {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for StalledShutdown {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_close_gives_up_at_idle_deadline() {
        let conn = Connection::new(StalledShutdown, 20);
        let closed = timeout(Duration::from_secs(1), conn.close()).await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn test_tls_exchange_reads_status() {
        use crate::response::ResponseReader;
        use tokio_rustls::TlsAcceptor;

        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let server_config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(
                vec![Certificate(generated.cert.der().to_vec())],
                rustls::PrivateKey(generated.key_pair.serialize_der()),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(tcp).await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = tls.read(&mut buf).await.unwrap();
            tls.write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            tls.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let factory = ConnectionFactory::new(&addr, true, 1000, 4);
        assert_eq!(factory.addr(), addr);
        let mut conn = factory.connect().await.unwrap();
        conn.write_all(b"GET /admin HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let status = ResponseReader::new(false).read_status(&mut conn).await.unwrap();
        conn.close().await;

        assert_eq!(status, 403);
        let received = server.await.unwrap();
        assert!(received.starts_with("GET /admin HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = Connection::new(client, 500);
        conn.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let mut buf = vec![0u8; 18];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET / HTTP/1.1\r\n\r\n");
    }
}
