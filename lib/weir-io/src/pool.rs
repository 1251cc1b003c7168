/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use tokio::io::{
    AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadBuf,
};

use super::swap::{BoxAsyncRead, BoxAsyncWrite, SwapReader, SwapWriter};

/// Buffered reader bound to a swappable source. Pooled between connections;
/// the buffer contents must be drained before a reuse.
pub struct ReadBufEntry {
    inner: BufReader<SwapReader>,
}

impl ReadBufEntry {
    fn new(capacity: usize, source: BoxAsyncRead) -> Self {
        ReadBufEntry {
            inner: BufReader::with_capacity(capacity, SwapReader::new(source)),
        }
    }

    /// Bytes sitting in the buffer that have been read off the source but
    /// not yet consumed.
    pub fn buffered(&self) -> usize {
        self.inner.buffer().len()
    }

    fn drain(&mut self) {
        let n = self.inner.buffer().len();
        if n > 0 {
            Pin::new(&mut self.inner).consume(n);
        }
    }

    fn rebind(&mut self, source: BoxAsyncRead) {
        self.drain();
        self.inner.get_mut().set_source(source);
    }

    fn detach(&mut self) {
        self.inner.get_mut().take_source();
    }
}

impl AsyncRead for ReadBufEntry {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncBufRead for ReadBufEntry {
    fn poll_fill_buf(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(mut self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.inner).consume(amt)
    }
}

/// Buffered writer counterpart of [`ReadBufEntry`]. Must be flushed before
/// being returned to its pool.
pub struct WriteBufEntry {
    inner: BufWriter<SwapWriter>,
}

impl WriteBufEntry {
    fn new(capacity: usize, sink: BoxAsyncWrite) -> Self {
        WriteBufEntry {
            inner: BufWriter::with_capacity(capacity, SwapWriter::new(sink)),
        }
    }

    pub fn buffered(&self) -> usize {
        self.inner.buffer().len()
    }

    fn rebind(&mut self, sink: BoxAsyncWrite) {
        self.inner.get_mut().set_sink(sink);
    }

    fn detach(&mut self) {
        self.inner.get_mut().take_sink();
    }
}

impl AsyncWrite for WriteBufEntry {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// A leaky bucket pool of [`ReadBufEntry`]: takes fall back to a fresh
/// allocation when the pool is empty, gives are discarded when it is full.
/// Keeps buffer allocations flat under heavy connection churn.
pub struct ReadBufferPool {
    buf_size: usize,
    capacity: usize,
    pool: Mutex<VecDeque<ReadBufEntry>>,
}

impl ReadBufferPool {
    pub fn new(pool_size: usize, buffer_size: usize) -> Self {
        ReadBufferPool {
            buf_size: buffer_size,
            capacity: pool_size,
            pool: Mutex::new(VecDeque::with_capacity(pool_size)),
        }
    }

    /// Check out an entry bound to `source`. A reused entry has any bytes
    /// belonging to the previous connection drained first.
    pub fn take(&self, source: BoxAsyncRead) -> ReadBufEntry {
        let reused = match self.pool.lock() {
            Ok(mut pool) => pool.pop_front(),
            Err(p) => p.into_inner().pop_front(),
        };
        match reused {
            Some(mut entry) => {
                entry.rebind(source);
                entry
            }
            None => ReadBufEntry::new(self.buf_size, source),
        }
    }

    pub fn give(&self, mut entry: ReadBufEntry) {
        entry.detach();
        let mut pool = match self.pool.lock() {
            Ok(pool) => pool,
            Err(p) => p.into_inner(),
        };
        if pool.len() < self.capacity {
            pool.push_back(entry);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pool.lock().unwrap().len()
    }
}

/// A leaky bucket pool of [`WriteBufEntry`].
pub struct WriteBufferPool {
    buf_size: usize,
    capacity: usize,
    pool: Mutex<VecDeque<WriteBufEntry>>,
}

impl WriteBufferPool {
    pub fn new(pool_size: usize, buffer_size: usize) -> Self {
        WriteBufferPool {
            buf_size: buffer_size,
            capacity: pool_size,
            pool: Mutex::new(VecDeque::with_capacity(pool_size)),
        }
    }

    pub fn take(&self, sink: BoxAsyncWrite) -> WriteBufEntry {
        let reused = match self.pool.lock() {
            Ok(mut pool) => pool.pop_front(),
            Err(p) => p.into_inner().pop_front(),
        };
        match reused {
            Some(mut entry) => {
                entry.rebind(sink);
                entry
            }
            None => WriteBufEntry::new(self.buf_size, sink),
        }
    }

    /// Flush and return an entry. Entries that fail to flush, or still hold
    /// buffered data afterwards, are discarded instead of pooled.
    pub async fn give(&self, mut entry: WriteBufEntry) {
        if entry.flush().await.is_err() {
            return;
        }
        if entry.buffered() > 0 {
            return;
        }
        entry.detach();
        let mut pool = match self.pool.lock() {
            Ok(pool) => pool,
            Err(p) => p.into_inner(),
        };
        if pool.len() < self.capacity {
            pool.push_back(entry);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pool.lock().unwrap().len()
    }
}
