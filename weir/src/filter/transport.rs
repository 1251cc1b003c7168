/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::{Duration, Instant};

use http::Method;
use log::{trace, warn};
use thiserror::Error;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;

use weir_http::client::{HttpResponseParseError, UpstreamResponse};
use weir_http::{HttpBodyReader, HttpBodyType};
use weir_io::DeadlineStream;

use crate::body::RequestBody;

const DEFAULT_DNS_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_MAX_IDLE_CONNS: usize = 15;
const DEFAULT_RSP_HEADER_MAX_SIZE: usize = 64 * 1024;
const DEFAULT_BODY_LINE_MAX_LEN: usize = 8192;
const COPY_BUF_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{0}")]
    Resolve(String),
    #[error("dial failed: {0}")]
    DialFailed(io::Error),
    #[error("write failed: {0}")]
    WriteFailed(io::Error),
    #[error("client body failed: {0}")]
    ClientBodyFailed(io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] HttpResponseParseError),
}

impl UpstreamError {
    /// Timeouts map to 504, everything else to 502.
    pub fn is_timeout(&self) -> bool {
        match self {
            UpstreamError::DialFailed(e) | UpstreamError::WriteFailed(e) => {
                e.kind() == io::ErrorKind::TimedOut
            }
            UpstreamError::InvalidResponse(HttpResponseParseError::IoFailed(e)) => {
                e.kind() == io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }

    /// Failures that may just mean an idle cached connection went stale.
    fn retryable(&self) -> bool {
        match self {
            UpstreamError::WriteFailed(_) => true,
            UpstreamError::InvalidResponse(HttpResponseParseError::RemoteClosed) => true,
            UpstreamError::InvalidResponse(HttpResponseParseError::IoFailed(e)) => {
                e.kind() != io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }
}

trait UpstreamStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> UpstreamStream for T {}

type BoxStream = Box<dyn UpstreamStream>;

pub(crate) struct UpstreamConn {
    r: BufReader<ReadHalf<BoxStream>>,
    w: WriteHalf<BoxStream>,
}

impl std::fmt::Debug for UpstreamConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConn").finish_non_exhaustive()
    }
}

/// Request body handed to a round trip, with the framing to apply toward
/// the upstream.
pub(crate) enum OutboundBody<'a, 'b> {
    None,
    Identity(&'a mut RequestBody<'b>),
    Chunked(&'a mut RequestBody<'b>),
}

/// Outbound side of one reverse-proxy target: dials TCPv4 with a cached
/// DNS resolution and keeps a bounded set of idle connections for reuse.
/// Shared across concurrent proxied requests.
pub struct UpstreamTransport {
    host: String,
    port: u16,
    dns_cache_ttl: Duration,
    timeout: Option<Duration>,
    max_idle_conns: usize,
    rsp_header_max_size: usize,
    body_line_max_len: usize,
    resolved: Mutex<Option<(Ipv4Addr, Instant)>>,
    idle: Mutex<VecDeque<UpstreamConn>>,
}

impl UpstreamTransport {
    pub fn new(host: &str, port: u16, timeout: Option<Duration>) -> Self {
        UpstreamTransport {
            host: host.to_string(),
            port,
            dns_cache_ttl: DEFAULT_DNS_CACHE_TTL,
            timeout,
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            rsp_header_max_size: DEFAULT_RSP_HEADER_MAX_SIZE,
            body_line_max_len: DEFAULT_BODY_LINE_MAX_LEN,
            resolved: Mutex::new(None),
            idle: Mutex::new(VecDeque::new()),
        }
    }

    /// TTL for the cached address; zero disables caching.
    pub fn set_dns_cache_ttl(&mut self, ttl: Duration) {
        self.dns_cache_ttl = ttl;
    }

    pub fn set_max_idle_conns(&mut self, max: usize) {
        self.max_idle_conns = max;
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    async fn lookup_ip(&self) -> Result<Ipv4Addr, UpstreamError> {
        if !self.dns_cache_ttl.is_zero() {
            let cached = match self.resolved.lock() {
                Ok(v) => *v,
                Err(p) => *p.into_inner(),
            };
            if let Some((ip, at)) = cached {
                if at + self.dns_cache_ttl > Instant::now() {
                    return Ok(ip);
                }
            }
        }

        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                UpstreamError::Resolve(format!("Can't get IP addr for {}: {e}", self.host))
            })?;
        let mut ip = None;
        for addr in addrs {
            if let SocketAddr::V4(v4) = addr {
                ip = Some(*v4.ip());
                break;
            }
        }
        let Some(ip) = ip else {
            return Err(UpstreamError::Resolve(format!(
                "Can't get IP addr for {}",
                self.host
            )));
        };

        let mut cached = match self.resolved.lock() {
            Ok(v) => v,
            Err(p) => p.into_inner(),
        };
        *cached = Some((ip, Instant::now()));
        Ok(ip)
    }

    async fn dial(&self) -> Result<UpstreamConn, UpstreamError> {
        let ip = self.lookup_ip().await?;
        let addr = SocketAddrV4::new(ip, self.port);
        trace!("dialing connection to {addr}");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(UpstreamError::DialFailed)?;
        let _ = stream.set_nodelay(true);

        let stream: BoxStream = match self.timeout {
            Some(timeout) => Box::new(DeadlineStream::new(stream, timeout)),
            None => Box::new(stream),
        };
        let (r, w) = tokio::io::split(stream);
        Ok(UpstreamConn {
            r: BufReader::with_capacity(COPY_BUF_SIZE, r),
            w,
        })
    }

    fn checkout(&self) -> Option<UpstreamConn> {
        let mut idle = match self.idle.lock() {
            Ok(v) => v,
            Err(p) => p.into_inner(),
        };
        idle.pop_front()
    }

    pub(crate) fn checkin(&self, conn: UpstreamConn) {
        let mut idle = match self.idle.lock() {
            Ok(v) => v,
            Err(p) => p.into_inner(),
        };
        if idle.len() < self.max_idle_conns {
            idle.push_back(conn);
        }
    }

    /// Send one request and read the response head. A stale cached
    /// connection that fails before the request body has been touched is
    /// retried once on a fresh dial.
    pub(crate) async fn round_trip(
        self: Arc<Self>,
        head: &[u8],
        method: &Method,
        mut body: OutboundBody<'_, '_>,
    ) -> Result<(UpstreamResponse, Option<UpstreamBody>), UpstreamError> {
        let mut force_fresh = false;
        loop {
            let (mut conn, reused) = if force_fresh {
                (self.dial().await?, false)
            } else {
                match self.checkout() {
                    Some(conn) => (conn, true),
                    None => (self.dial().await?, false),
                }
            };

            let mut body_consumed = false;
            match self
                .exchange(&mut conn, head, method, &mut body, &mut body_consumed)
                .await
            {
                Ok(rsp) => return Ok(Self::finish_round_trip(&self, conn, rsp, method)),
                Err(e) => {
                    if reused && !body_consumed && e.retryable() {
                        trace!("idle connection to {} went stale, redialing", self.host);
                        force_fresh = true;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn exchange(
        &self,
        conn: &mut UpstreamConn,
        head: &[u8],
        method: &Method,
        body: &mut OutboundBody<'_, '_>,
        body_consumed: &mut bool,
    ) -> Result<UpstreamResponse, UpstreamError> {
        conn.w
            .write_all(head)
            .await
            .map_err(UpstreamError::WriteFailed)?;

        match body {
            OutboundBody::None => {}
            OutboundBody::Identity(reader) => {
                let mut buf = vec![0u8; COPY_BUF_SIZE];
                loop {
                    let nr = reader
                        .read(&mut buf)
                        .await
                        .map_err(UpstreamError::ClientBodyFailed)?;
                    if nr == 0 {
                        break;
                    }
                    *body_consumed = true;
                    conn.w
                        .write_all(&buf[..nr])
                        .await
                        .map_err(UpstreamError::WriteFailed)?;
                }
            }
            OutboundBody::Chunked(reader) => {
                let mut buf = vec![0u8; COPY_BUF_SIZE];
                loop {
                    let nr = reader
                        .read(&mut buf)
                        .await
                        .map_err(UpstreamError::ClientBodyFailed)?;
                    if nr == 0 {
                        break;
                    }
                    *body_consumed = true;
                    let frame = format!("{nr:x}\r\n");
                    conn.w
                        .write_all(frame.as_bytes())
                        .await
                        .map_err(UpstreamError::WriteFailed)?;
                    conn.w
                        .write_all(&buf[..nr])
                        .await
                        .map_err(UpstreamError::WriteFailed)?;
                    conn.w
                        .write_all(b"\r\n")
                        .await
                        .map_err(UpstreamError::WriteFailed)?;
                }
                conn.w
                    .write_all(b"0\r\n\r\n")
                    .await
                    .map_err(UpstreamError::WriteFailed)?;
            }
        }
        conn.w.flush().await.map_err(UpstreamError::WriteFailed)?;

        let rsp =
            UpstreamResponse::parse(&mut conn.r, method, true, self.rsp_header_max_size).await?;
        Ok(rsp)
    }

    fn finish_round_trip(
        transport: &Arc<Self>,
        conn: UpstreamConn,
        rsp: UpstreamResponse,
        method: &Method,
    ) -> (UpstreamResponse, Option<UpstreamBody>) {
        match rsp.body_type(method) {
            None => {
                if rsp.keep_alive() {
                    transport.checkin(conn);
                }
                (rsp, None)
            }
            Some(body_type) => {
                let reusable = rsp.keep_alive() && body_type != HttpBodyType::ReadUntilEnd;
                let body = UpstreamBody {
                    inner: Some(BodyInner {
                        reader: HttpBodyReader::new(conn.r, body_type, transport.body_line_max_len),
                        w: conn.w,
                    }),
                    transport: Arc::clone(transport),
                    reusable,
                };
                (rsp, Some(body))
            }
        }
    }
}

struct BodyInner {
    reader: HttpBodyReader<BufReader<ReadHalf<BoxStream>>>,
    w: WriteHalf<BoxStream>,
}

/// Decoded response body streaming off an upstream connection. Once the
/// body is fully consumed the connection goes back to the transport's idle
/// set; dropping the body early closes the connection instead.
pub struct UpstreamBody {
    inner: Option<BodyInner>,
    transport: Arc<UpstreamTransport>,
    reusable: bool,
}

impl AsyncRead for UpstreamBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let Some(inner) = &mut self.inner else {
            return Poll::Ready(Ok(()));
        };
        ready!(Pin::new(&mut inner.reader).poll_read(cx, buf))?;
        if inner.reader.finished() && self.reusable {
            if let Some(inner) = self.inner.take() {
                self.transport.checkin(UpstreamConn {
                    r: inner.reader.into_inner(),
                    w: inner.w,
                });
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Split a `host[:port]` string, falling back to `default_port` when the
/// port is missing or unparsable.
pub fn split_host_port(host_port: &str, default_port: u16) -> (String, u16) {
    match host_port.split_once(':') {
        Some((host, port)) => {
            let port = match port.parse() {
                Ok(p) => p,
                Err(e) => {
                    warn!("error converting port to int for {host}: {e}");
                    default_port
                }
            };
            (host.to_string(), port)
        }
        None => (host_port.to_string(), default_port),
    }
}
