/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Outcome of one bounded line read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRead {
    /// A full line, newline included, was appended to the output buffer.
    /// Carries the number of bytes taken.
    Complete(usize),
    /// The byte budget ran out before a newline showed up. The stream is
    /// left positioned after the budgeted bytes.
    Overflow,
    /// The stream ended before a newline showed up. Carries the number of
    /// bytes that were still appended, possibly zero.
    Eof(usize),
}

/// Append bytes from `stream` to `out` up to and including the next `\n`,
/// taking at most `max_len` bytes. Never consumes past the newline, so
/// anything that follows stays on the stream for the next read.
pub async fn read_line_limited<R>(
    stream: &mut R,
    max_len: usize,
    out: &mut Vec<u8>,
) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    enum Step {
        Done,
        Starved,
        Full,
        More,
    }

    let mut taken = 0usize;
    loop {
        let room = max_len - taken;
        let (consumed, step) = {
            let chunk = stream.fill_buf().await?;
            if chunk.is_empty() {
                (0, Step::Starved)
            } else {
                match memchr::memchr(b'\n', chunk) {
                    Some(pos) if pos < room => {
                        out.extend_from_slice(&chunk[..=pos]);
                        (pos + 1, Step::Done)
                    }
                    _ => {
                        let within = chunk.len().min(room);
                        out.extend_from_slice(&chunk[..within]);
                        (within, if within == room { Step::Full } else { Step::More })
                    }
                }
            }
        };
        Pin::new(&mut *stream).consume(consumed);
        taken += consumed;
        match step {
            Step::Done => return Ok(LineRead::Complete(taken)),
            Step::Starved => return Ok(LineRead::Eof(taken)),
            Step::Full => return Ok(LineRead::Overflow),
            Step::More => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{BufReader, Result};
    use tokio_util::io::StreamReader;

    fn stream_over(content: &'static [u8]) -> impl AsyncBufRead + Unpin {
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        BufReader::new(StreamReader::new(stream))
    }

    #[tokio::test]
    async fn one_line_at_a_time() {
        let mut stream = stream_over(b"first line\nsecond");
        let mut out = Vec::new();

        let read = read_line_limited(&mut stream, 128, &mut out).await.unwrap();
        assert_eq!(read, LineRead::Complete(11));
        assert_eq!(out.as_slice(), b"first line\n");

        out.clear();
        let read = read_line_limited(&mut stream, 128, &mut out).await.unwrap();
        assert_eq!(read, LineRead::Eof(6));
        assert_eq!(out.as_slice(), b"second");
    }

    #[tokio::test]
    async fn budget_cuts_the_line() {
        let mut stream = stream_over(b"a very long line without end in sight\n");
        let mut out = Vec::new();

        let read = read_line_limited(&mut stream, 8, &mut out).await.unwrap();
        assert_eq!(read, LineRead::Overflow);
        assert_eq!(out.len(), 8);
    }

    #[tokio::test]
    async fn line_fitting_exactly_completes() {
        let mut stream = stream_over(b"abc\nrest");
        let mut out = Vec::new();

        let read = read_line_limited(&mut stream, 4, &mut out).await.unwrap();
        assert_eq!(read, LineRead::Complete(4));
        assert_eq!(out.as_slice(), b"abc\n");
    }

    #[tokio::test]
    async fn empty_stream_is_eof() {
        let mut stream = stream_over(b"");
        let mut out = Vec::new();

        let read = read_line_limited(&mut stream, 128, &mut out).await.unwrap();
        assert_eq!(read, LineRead::Eof(0));
    }
}
