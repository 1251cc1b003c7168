/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;

use tokio::io::AsyncBufRead;

use weir_io::{LineRead, read_line_limited};

use crate::parse::trim_line_ending;

/// How the body of a parsed message head is delimited. Both sides of the
/// proxy share this model: a request can only be `Unframed` in the sense
/// of carrying no body at all, while an unframed response body runs to
/// the end of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageFraming {
    Unframed,
    Length(u64),
    Chunked,
}

/// Why a head could not be read in full.
#[derive(Debug)]
pub(crate) enum HeadReadError {
    /// The peer went away before the head was complete.
    Closed,
    /// The head exceeded the size budget.
    TooLarge,
    Io(io::Error),
}

/// Reads the start line and field lines of one message head, enforcing a
/// single size budget across all of them.
pub(crate) struct HeadReader<'a, R> {
    stream: &'a mut R,
    budget: usize,
    taken: usize,
    line: Vec<u8>,
}

impl<'a, R> HeadReader<'a, R>
where
    R: AsyncBufRead + Unpin,
{
    pub(crate) fn new(stream: &'a mut R, budget: usize) -> Self {
        HeadReader {
            stream,
            budget,
            taken: 0,
            line: Vec::with_capacity(128),
        }
    }

    /// Total bytes consumed off the stream so far.
    pub(crate) fn taken(&self) -> usize {
        self.taken
    }

    /// The request or status line.
    pub(crate) async fn start_line(&mut self) -> Result<&[u8], HeadReadError> {
        self.next_line().await
    }

    /// The next field line, or None once the blank end-of-head line has
    /// been consumed.
    pub(crate) async fn field_line(&mut self) -> Result<Option<&[u8]>, HeadReadError> {
        let line = self.next_line().await?;
        if trim_line_ending(line).is_empty() {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    async fn next_line(&mut self) -> Result<&[u8], HeadReadError> {
        let room = self.budget - self.taken;
        if room == 0 {
            return Err(HeadReadError::TooLarge);
        }
        self.line.clear();
        match read_line_limited(&mut *self.stream, room, &mut self.line)
            .await
            .map_err(HeadReadError::Io)?
        {
            LineRead::Complete(n) => {
                self.taken += n;
                Ok(self.line.as_slice())
            }
            LineRead::Overflow => Err(HeadReadError::TooLarge),
            LineRead::Eof(_) => Err(HeadReadError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn walks_a_head() {
        let raw: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\nbody";
        let mut stream = BufReader::new(raw);
        let mut head = HeadReader::new(&mut stream, 4096);

        assert_eq!(head.start_line().await.ok().unwrap(), b"GET / HTTP/1.1\r\n");
        assert_eq!(head.field_line().await.ok().unwrap(), Some(&b"Host: x\r\n"[..]));
        assert_eq!(
            head.field_line().await.ok().unwrap(),
            Some(&b"Accept: */*\r\n"[..])
        );
        assert_eq!(head.field_line().await.ok().unwrap(), None);
        assert_eq!(head.taken(), raw.len() - 4);
    }

    #[tokio::test]
    async fn budget_spans_all_lines() {
        let raw: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut stream = BufReader::new(raw);
        let mut head = HeadReader::new(&mut stream, 20);

        assert!(head.start_line().await.is_ok());
        assert!(matches!(
            head.field_line().await,
            Err(HeadReadError::TooLarge)
        ));
    }

    #[tokio::test]
    async fn truncated_head_is_closed() {
        let raw: &[u8] = b"GET / HTTP/1.1\r\nHost:";
        let mut stream = BufReader::new(raw);
        let mut head = HeadReader::new(&mut stream, 4096);

        assert!(head.start_line().await.is_ok());
        assert!(matches!(
            head.field_line().await,
            Err(HeadReadError::Closed)
        ));
    }
}
