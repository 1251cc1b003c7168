/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod reader;
pub use reader::HttpBodyReader;

mod chunked;
pub use chunked::copy_chunked;

/// Framing of an HTTP/1.1 message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpBodyType {
    ContentLength(u64),
    Chunked,
    /// No explicit framing, the body runs until the peer closes.
    ReadUntilEnd,
}
