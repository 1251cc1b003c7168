/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{Context, anyhow};
use http::StatusCode;
use log::{debug, error, trace, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;
use tokio_util::task::TaskTracker;

use weir_http::server::RequestHead;
use weir_io::{ReadBufferPool, WriteBufferPool};

use crate::config::ServerConfig;
use crate::pipeline::Pipeline;
use crate::request::{Request, RequestRecord};
use crate::response::Response;

mod sockopt;
use sockopt::SockOps;

mod connection;

/// Essentials of a written response, handed to the completion callback.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSummary {
    pub status: StatusCode,
    pub content_length: i64,
    pub close: bool,
}

/// Invoked asynchronously after each response has been written.
pub type CompletionCallback = Arc<dyn Fn(RequestRecord, ResponseSummary) + Send + Sync>;

/// Invoked when a filter panics while handling a request. Receives the
/// peer address (absent in generic-handler mode) and the panic value; the
/// connection is closed afterwards.
pub type PanicHandler = Arc<dyn Fn(Option<SocketAddr>, Box<dyn Any + Send>) + Send + Sync>;

#[derive(Default)]
pub struct ServerStats {
    conn_total: AtomicU64,
    conn_alive: AtomicI64,
    req_total: AtomicU64,
}

impl ServerStats {
    pub(crate) fn add_conn(&self) {
        self.conn_total.fetch_add(1, Ordering::Relaxed);
        self.conn_alive.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn del_conn(&self) {
        self.conn_alive.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn add_req(&self) {
        self.req_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conn_total(&self) -> u64 {
        self.conn_total.load(Ordering::Relaxed)
    }

    pub fn conn_alive(&self) -> i64 {
        self.conn_alive.load(Ordering::Relaxed)
    }

    pub fn req_total(&self) -> u64 {
        self.req_total.load(Ordering::Relaxed)
    }
}

pub(crate) struct ConnectionCtx {
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) config: ServerConfig,
    pub(crate) read_pool: Arc<ReadBufferPool>,
    pub(crate) write_pool: Arc<WriteBufferPool>,
    pub(crate) stop_rx: watch::Receiver<bool>,
    pub(crate) completion_callback: Option<CompletionCallback>,
    pub(crate) panic_handler: Option<PanicHandler>,
    pub(crate) stats: Arc<ServerStats>,
}

/// An HTTP/1.1 server serving one [`Pipeline`].
pub struct Server {
    bind_port: u16,
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    completion_callback: Option<CompletionCallback>,
    panic_handler: Option<PanicHandler>,
    stop_tx: watch::Sender<bool>,
    ready_tx: watch::Sender<bool>,
    port: AtomicU16,
    listener: Mutex<Option<std::net::TcpListener>>,
    read_pool: Arc<ReadBufferPool>,
    write_pool: Arc<WriteBufferPool>,
    stats: Arc<ServerStats>,
}

impl Server {
    pub fn new(port: u16, pipeline: Pipeline) -> Self {
        Server::with_config(port, pipeline, ServerConfig::default())
    }

    pub fn with_config(port: u16, pipeline: Pipeline, config: ServerConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (ready_tx, _) = watch::channel(false);
        let read_pool = Arc::new(ReadBufferPool::new(
            config.buffer_pool_size,
            config.read_buffer_size,
        ));
        let write_pool = Arc::new(WriteBufferPool::new(
            config.buffer_pool_size,
            config.write_buffer_size,
        ));
        Server {
            bind_port: port,
            config,
            pipeline: Arc::new(pipeline),
            completion_callback: None,
            panic_handler: None,
            stop_tx,
            ready_tx,
            port: AtomicU16::new(0),
            listener: Mutex::new(None),
            read_pool,
            write_pool,
            stats: Arc::new(ServerStats::default()),
        }
    }

    pub fn set_completion_callback(&mut self, callback: CompletionCallback) {
        self.completion_callback = Some(callback);
    }

    pub fn set_panic_handler(&mut self, handler: PanicHandler) {
        self.panic_handler = Some(handler);
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// The bound port, 0 until the server is listening.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Acquire)
    }

    /// Resolves once the accept loop is running. Intended for tests and
    /// embedders that race requests against startup.
    pub async fn accept_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        let _ = rx.wait_for(|v| *v).await;
    }

    /// Stop accepting new connections. Active connections get a short
    /// grace period to finish their in-flight request and are then closed.
    pub fn stop_accepting(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Adopt a pre-opened listening socket for zero-downtime handoff. The
    /// descriptor must refer to a TCP listener.
    #[cfg(unix)]
    pub fn listener_from_fd(&self, fd: std::os::fd::RawFd) -> anyhow::Result<()> {
        use std::os::fd::FromRawFd;

        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        match sock.r#type() {
            Ok(t) if t == socket2::Type::STREAM => {}
            _ => return Err(anyhow!("inherited listener isn't TCP")),
        }
        let listener: std::net::TcpListener = sock.into();
        let mut slot = match self.listener.lock() {
            Ok(slot) => slot,
            Err(p) => p.into_inner(),
        };
        *slot = Some(listener);
        Ok(())
    }

    /// Listen on the configured port (or the adopted listener) and serve
    /// until [`Server::stop_accepting`] is called.
    pub async fn listen_and_serve(&self) -> anyhow::Result<()> {
        let listener = self.take_or_bind_listener().await?;
        self.serve(listener, None).await
    }

    /// Like [`Server::listen_and_serve`] with a TLS listener.
    pub async fn listen_and_serve_tls(
        &self,
        cert_file: &str,
        key_file: &str,
    ) -> anyhow::Result<()> {
        let tls_config = load_tls_config(cert_file, key_file)?;
        let listener = self.take_or_bind_listener().await?;
        self.serve(listener, Some(TlsAcceptor::from(tls_config)))
            .await
    }

    /// Execute the pipeline for a request parsed elsewhere, without a
    /// connection. This is how the server behaves as a plain HTTP handler
    /// when hosted inside another server.
    pub async fn handle(&self, head: RequestHead) -> Response {
        let mut request = Request::new(head, None, None, SystemTime::now());
        self.stats.add_req();
        let res = match self.pipeline.execute(&mut request).await {
            Some(res) => res,
            None => Response::from_string(404, None, "Not Found"),
        };
        if let Some(cb) = &self.completion_callback {
            let cb = Arc::clone(cb);
            let (record, _) = request.finish();
            let summary = ResponseSummary {
                status: res.status,
                content_length: res.content_length,
                close: res.close,
            };
            tokio::spawn(async move { cb(record, summary) });
        }
        res
    }

    async fn take_or_bind_listener(&self) -> anyhow::Result<TcpListener> {
        let inherited = {
            let mut slot = match self.listener.lock() {
                Ok(slot) => slot,
                Err(p) => p.into_inner(),
            };
            slot.take()
        };
        match inherited {
            Some(listener) => {
                listener
                    .set_nonblocking(true)
                    .context("failed to prepare inherited listener")?;
                TcpListener::from_std(listener).context("failed to adopt inherited listener")
            }
            None => TcpListener::bind(("0.0.0.0", self.bind_port))
                .await
                .with_context(|| format!("failed to listen on port {}", self.bind_port)),
        }
    }

    async fn serve(&self, listener: TcpListener, tls: Option<TlsAcceptor>) -> anyhow::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            self.port.store(addr.port(), Ordering::Release);
        }
        let ctx = Arc::new(ConnectionCtx {
            pipeline: Arc::clone(&self.pipeline),
            config: self.config.clone(),
            read_pool: Arc::clone(&self.read_pool),
            write_pool: Arc::clone(&self.write_pool),
            stop_rx: self.stop_tx.subscribe(),
            completion_callback: self.completion_callback.clone(),
            panic_handler: self.panic_handler.clone(),
            stats: Arc::clone(&self.stats),
        });
        let tracker = TaskTracker::new();
        let mut stop_rx = self.stop_tx.subscribe();
        let _ = self.ready_tx.send(true);

        loop {
            tokio::select! {
                biased;

                _ = stop_rx.wait_for(|v| *v) => break,
                r = listener.accept() => {
                    match r {
                        Ok((stream, peer)) => {
                            ctx.stats.add_conn();
                            let ctx = Arc::clone(&ctx);
                            let tls = tls.clone();
                            tracker.spawn(async move {
                                let sock = SockOps::from_stream(&stream);
                                // batching is toggled per response, start in
                                // low latency mode like the Go runtime does
                                sock.set_nodelay(true);
                                match tls {
                                    Some(acceptor) => match acceptor.accept(stream).await {
                                        Ok(stream) => {
                                            connection::serve_connection(ctx, stream, peer, SockOps::none()).await
                                        }
                                        Err(e) => {
                                            debug!("tls handshake with {peer} failed: {e}");
                                            ctx.stats.del_conn();
                                        }
                                    },
                                    None => connection::serve_connection(ctx, stream, peer, sock).await,
                                }
                            });
                        }
                        Err(e) => handle_accept_error(e),
                    }
                }
            }
        }

        trace!("stopped accepting, waiting for handlers");
        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}

fn handle_accept_error(e: io::Error) {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => {
            warn!("SERVER accept error: {e}");
        }
        _ => {
            error!("SERVER accept error: {e}");
            std::process::exit(1);
        }
    }
}

fn load_tls_config(cert_file: &str, key_file: &str) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let mut cert_reader = io::BufReader::new(
        std::fs::File::open(cert_file)
            .with_context(|| format!("failed to open cert file {cert_file}"))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to load certificates from {cert_file}"))?;

    let mut key_reader = io::BufReader::new(
        std::fs::File::open(key_file)
            .with_context(|| format!("failed to open key file {key_file}"))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("failed to load private key from {key_file}"))?
        .ok_or_else(|| anyhow!("no private key found in {key_file}"))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid certificate / key pair")?;
    Ok(Arc::new(config))
}
