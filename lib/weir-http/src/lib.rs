/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod parse;
pub use parse::{HttpChunkedLine, HttpHeaderLine, HttpLineParseError, HttpMethodLine, HttpStatusLine};

mod head;

mod body;
pub use body::{copy_chunked, HttpBodyReader, HttpBodyType};

pub mod client;
pub mod header;
pub mod server;
