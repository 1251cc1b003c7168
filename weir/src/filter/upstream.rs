/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use http::{Method, header};
use log::{debug, error};
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;

use weir_http::HttpBodyType;

use super::transport::{OutboundBody, UpstreamTransport};
use crate::pipeline::RequestFilter;
use crate::request::{Request, StageStatus};
use crate::response::{Response, ResponseBody};

struct ThrottleState {
    max: i64,
    in_flight: i64,
    queue: i64,
}

/// Reverse-proxy filter: forwards the request to one upstream through its
/// transport and reconstructs a response with sane framing.
pub struct Upstream {
    /// Used in logging and stage names when non-empty.
    name: String,
    transport: Arc<UpstreamTransport>,
    /// Path fetched by the pool pinger to check upness.
    ping_path: Option<String>,
    throttle: Mutex<ThrottleState>,
    throttle_wakeup: Notify,
}

impl Upstream {
    pub fn new(transport: Arc<UpstreamTransport>) -> Self {
        Upstream {
            name: String::new(),
            transport,
            ping_path: None,
            throttle: Mutex::new(ThrottleState {
                max: 0,
                in_flight: 0,
                queue: 0,
            }),
            throttle_wakeup: Notify::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_ping_path(mut self, path: &str) -> Self {
        self.ping_path = Some(path.to_string());
        self
    }

    pub fn transport(&self) -> &Arc<UpstreamTransport> {
        &self.transport
    }

    pub(crate) fn has_ping_path(&self) -> bool {
        self.ping_path.is_some()
    }

    /// Cap on concurrently proxied requests; 0 means unlimited. Safe to
    /// re-tune while requests are waiting.
    pub fn set_max_concurrent(&self, max: i64) {
        let mut st = self.lock_throttle();
        st.max = max;
        drop(st);
        self.throttle_wakeup.notify_waiters();
        self.throttle_wakeup.notify_one();
    }

    pub fn max_concurrent(&self) -> i64 {
        self.lock_throttle().max
    }

    /// Requests currently waiting on the concurrency throttle.
    pub fn queue_length(&self) -> i64 {
        self.lock_throttle().queue
    }

    fn lock_throttle(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        match self.throttle.lock() {
            Ok(st) => st,
            Err(p) => p.into_inner(),
        }
    }

    async fn throttle_acquire(&self) -> ThrottlePermit<'_> {
        {
            let mut st = self.lock_throttle();
            st.queue += 1;
        }
        loop {
            let notified = {
                let mut st = self.lock_throttle();
                if st.max <= 0 || st.in_flight < st.max {
                    st.queue -= 1;
                    st.in_flight += 1;
                    return ThrottlePermit(self);
                }
                self.throttle_wakeup.notified()
            };
            notified.await;
        }
    }

    fn throttle_release(&self) {
        let mut st = self.lock_throttle();
        st.in_flight -= 1;
        drop(st);
        self.throttle_wakeup.notify_one();
    }

    /// Fetch the configured ping path. Returns None when no ping path is
    /// set, otherwise whether the upstream answered 200.
    pub(crate) async fn ping(&self) -> Option<bool> {
        let path = self.ping_path.as_deref()?;
        let head = format!(
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: Keep-Alive\r\n\r\n"
        );
        match Arc::clone(&self.transport)
            .round_trip(head.as_bytes(), &Method::GET, OutboundBody::None)
            .await
        {
            Ok((rsp, body)) => {
                if let Some(mut body) = body {
                    // consume the body so the connection can be reused
                    let mut sink = tokio::io::sink();
                    let _ = tokio::io::copy(&mut body, &mut sink).await;
                }
                if rsp.code == 200 {
                    Some(true)
                } else {
                    error!(
                        "[{}] failed ping to {}:{}: {}",
                        self.name,
                        self.transport.host(),
                        self.transport.port(),
                        rsp.code
                    );
                    Some(false)
                }
            }
            Err(e) => {
                error!(
                    "[{}] failed ping to {}:{}: {e}",
                    self.name,
                    self.transport.host(),
                    self.transport.port()
                );
                Some(false)
            }
        }
    }
}

struct ThrottlePermit<'a>(&'a Upstream);

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        self.0.throttle_release();
    }
}

#[async_trait]
impl RequestFilter for Upstream {
    async fn filter_request(&self, req: &mut Request<'_>) -> Option<Response> {
        if !self.name.is_empty() {
            if let Some(stage) = req.current_stage() {
                stage.name = format!("{}[{}]", stage.name, self.name);
            }
        }

        // take a concurrency slot, held until the round trip is done
        let permit = self.throttle_acquire().await;

        let head_bytes = req.head.serialize_for_origin();
        let body_type = req.head.body_type();
        let method = req.head.method.clone();
        let id = req.id;
        let before = Instant::now();

        let result = {
            let outbound = match (body_type, req.body()) {
                (Some(HttpBodyType::Chunked), Some(body)) => OutboundBody::Chunked(body),
                (Some(_), Some(body)) => OutboundBody::Identity(body),
                _ => OutboundBody::None,
            };
            Arc::clone(&self.transport)
                .round_trip(&head_bytes, &method, outbound)
                .await
        };
        drop(permit);

        let res = match result {
            Ok((upstr, upstr_body)) => {
                // rebuild the response on our side of the hop, with the
                // framing settled here rather than trusted from upstream
                let mut res = Response::simple(upstr.code, None, 0, ResponseBody::Empty);
                match (upstr.body_type(&method), upstr_body) {
                    (Some(HttpBodyType::ContentLength(len)), Some(body)) => {
                        res.content_length = len as i64;
                        res.body = ResponseBody::from_stream(body);
                    }
                    (Some(HttpBodyType::Chunked), Some(body)) => {
                        res.content_length = -1;
                        res.body = ResponseBody::from_stream(body);
                    }
                    (Some(HttpBodyType::ReadUntilEnd), Some(mut body)) => {
                        // any bytes? the upstream never declared a length
                        let mut probe = [0u8; 1];
                        match body.read(&mut probe).await {
                            Ok(1) => {
                                res.content_length = -1;
                                let rejoined =
                                    std::io::Cursor::new(vec![probe[0]]).chain(body);
                                res.body = ResponseBody::from_stream(rejoined);
                            }
                            _ => {
                                res.content_length = 0;
                            }
                        }
                    }
                    _ => {
                        res.content_length = 0;
                    }
                }
                for (name, value) in upstr.headers.iter() {
                    if name == header::CONTENT_LENGTH {
                        continue;
                    }
                    res.headers.append(name.clone(), value.clone());
                }
                debug!(
                    "{id} {} [{method}] [{}] s={} time={:.4}",
                    self.name,
                    self.transport.host(),
                    res.status.as_u16(),
                    before.elapsed().as_secs_f64()
                );
                res
            }
            Err(e) => {
                let res = if e.is_timeout() {
                    error!("{id} [{}] upstream timeout error: {e}", self.name);
                    Response::from_string(504, None, "Gateway Timeout\n")
                } else {
                    error!("{id} [{}] upstream error: {e}", self.name);
                    Response::from_string(502, None, "Bad Gateway\n")
                };
                if let Some(stage) = req.current_stage() {
                    stage.status = StageStatus::Failure;
                }
                res
            }
        };
        Some(res)
    }
}
