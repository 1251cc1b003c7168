/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::io::Write;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::BufMut;
use futures_util::FutureExt;
use http::{HeaderValue, Method, Version, header};
use log::{debug, error};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use weir_http::server::{HttpRequestParseError, RequestHead};
use weir_http::{HttpBodyReader, copy_chunked};
use weir_io::ReadBufEntry;

use super::sockopt::SockOps;
use super::{ConnectionCtx, ResponseSummary};
use crate::body::{RequestBody, SharedWriter};
use crate::request::{PipelineStageKind, PipelineStageStat, Request};
use crate::response::{Response, ResponseBody, TransferHint};

/// Drive one client connection from accept to close, extracting successive
/// requests and writing responses in order.
pub(crate) async fn serve_connection<S>(
    ctx: Arc<ConnectionCtx>,
    stream: S,
    peer: SocketAddr,
    sock: SockOps,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    eprintln!("DEBUG: serve_connection entered for {peer}");
    let (rd, wr) = tokio::io::split(stream);
    let mut clt_r = ctx.read_pool.take(Box::new(rd));
    let clt_w: SharedWriter = Arc::new(Mutex::new(ctx.write_pool.take(Box::new(wr))));

    let run = run_requests(&ctx, &mut clt_r, &clt_w, peer, sock);
    if let Err(panic) = AssertUnwindSafe(run).catch_unwind().await {
        match &ctx.panic_handler {
            Some(handler) => handler(Some(peer), panic),
            None => error!("{peer} panic while serving connection"),
        }
    }

    ctx.read_pool.give(clt_r);
    if let Ok(writer) = Arc::try_unwrap(clt_w) {
        ctx.write_pool.give(writer.into_inner()).await;
    }
    ctx.stats.del_conn();
}

async fn run_requests(
    ctx: &ConnectionCtx,
    clt_r: &mut ReadBufEntry,
    clt_w: &SharedWriter,
    peer: SocketAddr,
    sock: SockOps,
) {
    let mut stop_rx = ctx.stop_rx.clone();
    let mut force_close = false;

    loop {
        let parsed = {
            let parse = parse_next(clt_r, ctx.config.max_header_size);
            tokio::pin!(parse);

            if force_close || *stop_rx.borrow() {
                eprintln!("DEBUG: taking if-branch, force_close={force_close}");
                force_close = true;
                match tokio::time::timeout(ctx.config.shutdown_grace, &mut parse).await {
                    Ok(r) => r,
                    Err(_) => { eprintln!("DEBUG: if-branch timed out"); break },
                }
            } else {
                eprintln!("DEBUG: entering select");
                tokio::select! {
                    biased;

                    r = &mut parse => { eprintln!("DEBUG: parse resolved first"); r },
                    _ = stop_rx.changed() => {
                        eprintln!("DEBUG: stop_rx.changed() resolved");
                        force_close = true;
                        match tokio::time::timeout(ctx.config.shutdown_grace, &mut parse).await {
                            Ok(r) => r,
                            Err(_) => { eprintln!("DEBUG: select-branch timed out"); break },
                        }
                    }
                }
            }
        };

        let (head, received, arrival) = match parsed {
            Ok(v) => v,
            Err(e) => {
                if !e.is_quiet_close() {
                    error!("{peer} ERROR reading request: {e}");
                }
                break;
            }
        };

        let mut keep_alive = head.keep_alive();
        let version = head.version;
        let method = head.method.clone();
        let expect = head.expect_continue() && version == Version::HTTP_11;
        let body_line_max = ctx.config.body_line_max_len;

        let body = match head.body_type() {
            Some(body_type) => Some(RequestBody::new(
                HttpBodyReader::new(&mut *clt_r, body_type, body_line_max),
                Some(Arc::clone(clt_w)),
                expect,
            )),
            None => None,
        };

        let mut request = Request::new(head, body, Some(peer), received);
        let mut init = PipelineStageStat::with_start(
            "server.Init",
            PipelineStageKind::Overhead,
            arrival,
        );
        init.finish();
        request.append_stage(init);

        ctx.stats.add_req();
        let mut res = match ctx.pipeline.execute(&mut request).await {
            Some(res) => res,
            None => Response::from_string(404, None, "Not Found"),
        };

        // shutting down?
        if *stop_rx.borrow() {
            force_close = true;
        }
        if force_close {
            keep_alive = false;
            res.close = true;
        }

        let (mut record, leftover) = request.finish();
        if let Some(mut body) = leftover {
            if body.continue_unopened() {
                // the client is still waiting for our go-ahead and has not
                // sent the body, the connection cannot be reused
                keep_alive = false;
                res.close = true;
            } else if !body.finished() {
                match body.drain(ctx.config.max_drain_size).await {
                    Ok(true) => {}
                    _ => {
                        keep_alive = false;
                        res.close = true;
                    }
                }
            }
        }

        correct_framing(&mut res, &method, version, keep_alive).await;

        let write_start = Instant::now();
        let write_result = write_response(clt_w, &mut res, &method, sock, ctx).await;
        let mut write_stage = PipelineStageStat::with_start(
            "server.ResponseWrite",
            PipelineStageKind::Overhead,
            write_start,
        );
        write_stage.finish();
        record.stages.push(write_stage);

        if let Some(cb) = &ctx.completion_callback {
            let cb = Arc::clone(cb);
            let summary = ResponseSummary {
                status: res.status,
                content_length: res.content_length,
                close: res.close,
            };
            // runs off the connection task, the next request need not wait
            tokio::spawn(async move { cb(record, summary) });
        }

        if let Err(e) = write_result {
            error!("{peer} ERROR writing response: {e}");
            break;
        }
        if res.close || !keep_alive {
            break;
        }
    }
}

/// Wait for the next request: peek at least one byte to timestamp its
/// arrival, then parse the full head.
async fn parse_next(
    clt_r: &mut ReadBufEntry,
    max_header_size: usize,
) -> Result<(RequestHead, SystemTime, Instant), HttpRequestParseError> {
    let buf = clt_r.fill_buf().await?;
    if buf.is_empty() {
        return Err(HttpRequestParseError::ClientClosed);
    }
    let arrival = Instant::now();
    let received = SystemTime::now();
    let head = RequestHead::parse(clt_r, max_header_size).await?;
    Ok((head, received, arrival))
}

/// Server-side framing correction.
///
/// Standard HTTP framers omit `Content-Length: 0` on empty bodies, which
/// leaves some clients waiting indefinitely for a framing terminator on
/// keep-alive connections. Force either an explicit length or chunked
/// termination instead.
async fn correct_framing(res: &mut Response, method: &Method, version: Version, keep_alive: bool) {
    if matches!(res.body, ResponseBody::Empty) {
        if method != Method::HEAD {
            res.content_length = 0;
        }
        res.transfer = Some(TransferHint::Identity);
    } else if res.content_length == 0 && res.transfer.is_none() && !res.status_forbids_body() {
        // is the body actually empty or was the length just never set?
        match res.probe_body_nonempty().await {
            Ok(true) => res.content_length = -1,
            Ok(false) => res.transfer = Some(TransferHint::Identity),
            Err(e) => {
                debug!("response body probe failed: {e}");
                res.body = ResponseBody::Empty;
                res.transfer = Some(TransferHint::Identity);
            }
        }
    }

    if res.content_length < 0 && method != Method::HEAD {
        res.transfer = Some(TransferHint::Chunked);
    }

    // for HTTP/1.0, close is the default, keep-alive must be explicit
    if keep_alive && version == Version::HTTP_10 {
        res.headers
            .insert(header::CONNECTION, HeaderValue::from_static("Keep-Alive"));
    }
}

fn serialize_response_head(res: &Response) -> Vec<u8> {
    let mut buf = Vec::<u8>::with_capacity(256);
    let reason = res.status.canonical_reason().unwrap_or("");
    let _ = write!(buf, "HTTP/1.1 {} {reason}\r\n", res.status.as_u16());

    for (name, value) in res.headers.iter() {
        if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
            continue;
        }
        if res.close && name == header::CONNECTION {
            continue;
        }
        buf.put_slice(name.as_ref());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    if res.close {
        buf.put_slice(b"Connection: close\r\n");
    }
    match res.transfer {
        Some(TransferHint::Chunked) => buf.put_slice(b"Transfer-Encoding: chunked\r\n"),
        _ => {
            if res.content_length >= 0 {
                let _ = write!(buf, "Content-Length: {}\r\n", res.content_length);
            }
        }
    }
    buf.put_slice(b"\r\n");
    buf
}

async fn write_response(
    clt_w: &SharedWriter,
    res: &mut Response,
    method: &Method,
    sock: SockOps,
    ctx: &ConnectionCtx,
) -> io::Result<()> {
    let mut w = clt_w.lock().await;

    // write with delay enabled so head and payload batch into fewer
    // segments, then restore low latency mode
    let corked = sock.set_nodelay(false);

    let head = serialize_response_head(res);
    w.write_all(&head).await?;

    if method != Method::HEAD {
        match res.transfer {
            Some(TransferHint::Chunked) => {
                copy_chunked(&mut res.body, &mut *w, ctx.config.copy_buffer_size).await?;
            }
            _ => {
                if res.content_length != 0 {
                    tokio::io::copy(&mut res.body, &mut *w).await?;
                }
            }
        }
    }
    w.flush().await?;

    if corked {
        sock.set_nodelay(true);
    }
    Ok(())
}
