/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy `body` to `writer` re-framed as chunked transfer encoding,
/// terminated by a last-chunk with an empty trailer. Returns the number of
/// payload bytes transferred.
pub async fn copy_chunked<R, W>(body: &mut R, writer: &mut W, buffer_size: usize) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let nr = body.read(&mut buf).await?;
        if nr == 0 {
            break;
        }
        let head = format!("{nr:x}\r\n");
        writer.write_all(head.as_bytes()).await?;
        writer.write_all(&buf[..nr]).await?;
        writer.write_all(b"\r\n").await?;
        total += nr as u64;
    }
    writer.write_all(b"0\r\n\r\n").await?;
    Ok(total)
}
