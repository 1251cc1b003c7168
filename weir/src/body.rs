/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use weir_http::HttpBodyReader;
use weir_io::{ReadBufEntry, WriteBufEntry};

pub(crate) type SharedWriter = Arc<Mutex<WriteBufEntry>>;

const CONTINUE_PREFACE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

enum ContinueState {
    NotNeeded,
    Unopened,
    Opened,
}

/// Decoded body of one inbound request, borrowed from the connection's
/// pooled reader for the lifetime of the request. When the request declared
/// `Expect: 100-continue`, the first read writes the `100 Continue`
/// preamble back to the client, exactly once.
pub struct RequestBody<'a> {
    reader: HttpBodyReader<&'a mut ReadBufEntry>,
    writer: Option<SharedWriter>,
    state: ContinueState,
}

impl<'a> RequestBody<'a> {
    pub(crate) fn new(
        reader: HttpBodyReader<&'a mut ReadBufEntry>,
        writer: Option<SharedWriter>,
        expect_continue: bool,
    ) -> Self {
        let state = if expect_continue && writer.is_some() {
            ContinueState::Unopened
        } else {
            ContinueState::NotNeeded
        };
        RequestBody {
            reader,
            writer,
            state,
        }
    }

    /// All body bytes, including any chunked trailer, have been consumed.
    pub fn finished(&self) -> bool {
        self.reader.finished()
    }

    pub(crate) fn continue_unopened(&self) -> bool {
        matches!(self.state, ContinueState::Unopened)
    }

    async fn open(&mut self) -> io::Result<()> {
        if matches!(self.state, ContinueState::Unopened) {
            if let Some(writer) = &self.writer {
                let mut w = writer.lock().await;
                w.write_all(CONTINUE_PREFACE).await?;
                w.flush().await?;
            }
            self.state = ContinueState::Opened;
        }
        Ok(())
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.open().await?;
        self.reader.read(buf).await
    }

    pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.open().await?;
        self.reader.read_to_end(buf).await
    }

    /// Read and discard what is left of the body so the connection can be
    /// reused. Returns false when more than `limit` bytes would have to be
    /// skipped. Does not trigger the `100 Continue` preamble.
    pub(crate) async fn drain(&mut self, limit: usize) -> io::Result<bool> {
        let mut scratch = [0u8; 4096];
        let mut skipped = 0usize;
        while !self.reader.finished() {
            let nr = self.reader.read(&mut scratch).await?;
            if nr == 0 {
                break;
            }
            skipped += nr;
            if skipped > limit {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
