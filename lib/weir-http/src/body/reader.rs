/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};

use super::HttpBodyType;
use crate::HttpChunkedLine;

enum DecodeState {
    FixedData { remaining: u64 },
    UntilEnd,
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkDataEnd { seen_cr: bool },
    Trailer { line_len: usize, blank: bool },
    Finished,
}

/// Decoding reader for a message body. Yields the payload bytes with the
/// wire framing (content-length bound, chunk envelopes, trailer section)
/// stripped. Chunked trailers are consumed and discarded.
pub struct HttpBodyReader<R> {
    stream: R,
    state: DecodeState,
    body_line_max_len: usize,
    chunk_size_line: Vec<u8>,
}

impl<R> HttpBodyReader<R>
where
    R: AsyncBufRead + Unpin,
{
    const DEFAULT_LINE_SIZE: usize = 64;

    pub fn new(stream: R, body_type: HttpBodyType, body_line_max_len: usize) -> Self {
        let state = match body_type {
            HttpBodyType::ContentLength(0) => DecodeState::Finished,
            HttpBodyType::ContentLength(size) => DecodeState::FixedData { remaining: size },
            HttpBodyType::Chunked => DecodeState::ChunkSize,
            HttpBodyType::ReadUntilEnd => DecodeState::UntilEnd,
        };
        HttpBodyReader {
            stream,
            state,
            body_line_max_len,
            chunk_size_line: Vec::with_capacity(Self::DEFAULT_LINE_SIZE),
        }
    }

    /// The whole body, including any chunked trailer, has been consumed.
    pub fn finished(&self) -> bool {
        matches!(self.state, DecodeState::Finished)
    }

    pub fn into_inner(self) -> R {
        self.stream
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.stream
    }

    fn poll_fixed(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
        remaining: u64,
        chunked: bool,
    ) -> Poll<io::Result<()>> {
        let max = buf.remaining().min(remaining.min(usize::MAX as u64) as usize);
        let mut limited_buf = ReadBuf::new(buf.initialize_unfilled_to(max));
        ready!(Pin::new(&mut self.stream).poll_read(cx, &mut limited_buf))?;
        let nr = limited_buf.filled().len();
        if nr == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed while reading body data",
            )));
        }
        buf.advance(nr);

        let left = remaining - nr as u64;
        if left == 0 {
            self.state = if chunked {
                DecodeState::ChunkDataEnd { seen_cr: false }
            } else {
                DecodeState::Finished
            };
        } else if chunked {
            self.state = DecodeState::ChunkData { remaining: left };
        } else {
            self.state = DecodeState::FixedData { remaining: left };
        }
        Poll::Ready(Ok(()))
    }

    fn poll_chunk_size(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            let mut reader = Pin::new(&mut self.stream);
            let cache = ready!(reader.as_mut().poll_fill_buf(cx))?;
            if cache.is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed while reading chunk size line",
                )));
            }

            if let Some(offset) = memchr::memchr(b'\n', cache) {
                self.chunk_size_line.extend_from_slice(&cache[..=offset]);
                reader.consume(offset + 1);
                if self.chunk_size_line.len() > self.body_line_max_len {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "chunk size line too long",
                    )));
                }
                let chunk_size = HttpChunkedLine::parse(self.chunk_size_line.as_slice())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
                    .chunk_size;
                self.chunk_size_line.clear();
                self.state = if chunk_size == 0 {
                    DecodeState::Trailer {
                        line_len: 0,
                        blank: true,
                    }
                } else {
                    DecodeState::ChunkData {
                        remaining: chunk_size,
                    }
                };
                return Poll::Ready(Ok(()));
            }

            let nr = cache.len();
            self.chunk_size_line.extend_from_slice(cache);
            reader.consume(nr);
            if self.chunk_size_line.len() > self.body_line_max_len {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "chunk size line too long",
                )));
            }
        }
    }

    fn poll_chunk_data_end(
        &mut self,
        cx: &mut Context<'_>,
        mut seen_cr: bool,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut reader = Pin::new(&mut self.stream);
            let cache = ready!(reader.as_mut().poll_fill_buf(cx))?;
            let Some(next) = cache.first().copied() else {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed while reading chunk data ending",
                )));
            };
            reader.consume(1);
            match (seen_cr, next) {
                (false, b'\r') => seen_cr = true,
                (_, b'\n') => {
                    self.state = DecodeState::ChunkSize;
                    return Poll::Ready(Ok(()));
                }
                _ => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "invalid chunk data ending",
                    )));
                }
            }
            self.state = DecodeState::ChunkDataEnd { seen_cr };
        }
    }

    fn poll_trailer(
        &mut self,
        cx: &mut Context<'_>,
        mut line_len: usize,
        mut blank: bool,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut reader = Pin::new(&mut self.stream);
            let cache = ready!(reader.as_mut().poll_fill_buf(cx))?;
            if cache.is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed while reading trailer",
                )));
            }

            match memchr::memchr(b'\n', cache) {
                Some(offset) => {
                    // a line holding nothing but CR ends the trailer section
                    blank = blank && cache[..offset].iter().all(|b| *b == b'\r');
                    let empty_line = blank && line_len + offset <= 1;
                    reader.consume(offset + 1);
                    if empty_line {
                        self.state = DecodeState::Finished;
                        return Poll::Ready(Ok(()));
                    }
                    line_len = 0;
                    blank = true;
                }
                None => {
                    let nr = cache.len();
                    blank = blank && cache.iter().all(|b| *b == b'\r');
                    line_len += nr;
                    reader.consume(nr);
                    if line_len > self.body_line_max_len {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "trailer line too long",
                        )));
                    }
                }
            }
            self.state = DecodeState::Trailer { line_len, blank };
        }
    }
}

impl<R> AsyncRead for HttpBodyReader<R>
where
    R: AsyncBufRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match this.state {
                DecodeState::Finished => return Poll::Ready(Ok(())),
                DecodeState::FixedData { remaining } => {
                    return this.poll_fixed(cx, buf, remaining, false);
                }
                DecodeState::UntilEnd => {
                    let old_filled = buf.filled().len();
                    ready!(Pin::new(&mut this.stream).poll_read(cx, buf))?;
                    if buf.filled().len() == old_filled {
                        this.state = DecodeState::Finished;
                    }
                    return Poll::Ready(Ok(()));
                }
                DecodeState::ChunkSize => {
                    ready!(this.poll_chunk_size(cx))?;
                }
                DecodeState::ChunkData { remaining } => {
                    return this.poll_fixed(cx, buf, remaining, true);
                }
                DecodeState::ChunkDataEnd { seen_cr } => {
                    ready!(this.poll_chunk_data_end(cx, seen_cr))?;
                }
                DecodeState::Trailer { line_len, blank } => {
                    ready!(this.poll_trailer(cx, line_len, blank))?;
                }
            }
        }
    }
}
