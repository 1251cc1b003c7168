/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub type BoxAsyncRead = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxAsyncWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Passthrough reader whose underlying source can be swapped out, so a
/// buffered reader built on top of it can be retargeted to another
/// connection without reallocating its buffer.
pub struct SwapReader {
    source: Option<BoxAsyncRead>,
}

impl SwapReader {
    pub fn new(source: BoxAsyncRead) -> Self {
        SwapReader {
            source: Some(source),
        }
    }

    pub fn empty() -> Self {
        SwapReader { source: None }
    }

    pub fn set_source(&mut self, source: BoxAsyncRead) {
        self.source = Some(source);
    }

    pub fn take_source(&mut self) -> Option<BoxAsyncRead> {
        self.source.take()
    }
}

impl AsyncRead for SwapReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.source {
            Some(r) => Pin::new(r).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Passthrough writer counterpart of [`SwapReader`].
pub struct SwapWriter {
    sink: Option<BoxAsyncWrite>,
}

impl SwapWriter {
    pub fn new(sink: BoxAsyncWrite) -> Self {
        SwapWriter { sink: Some(sink) }
    }

    pub fn empty() -> Self {
        SwapWriter { sink: None }
    }

    pub fn set_sink(&mut self, sink: BoxAsyncWrite) {
        self.sink = Some(sink);
    }

    pub fn take_sink(&mut self) -> Option<BoxAsyncWrite> {
        self.sink.take()
    }
}

impl AsyncWrite for SwapWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.sink {
            Some(w) => Pin::new(w).poll_write(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no sink attached",
            ))),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.sink {
            Some(w) => Pin::new(w).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.sink {
            Some(w) => Pin::new(w).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
