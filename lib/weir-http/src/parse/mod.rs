/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use http::Version;

mod error;
pub use error::HttpLineParseError;

mod method_line;
pub use method_line::HttpMethodLine;

mod status_line;
pub use status_line::HttpStatusLine;

mod header_line;
pub use header_line::HttpHeaderLine;

mod chunked_line;
pub use chunked_line::HttpChunkedLine;

/// Strip one trailing `\r\n` or `\n` from a protocol line.
pub(crate) fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub(crate) fn parse_http_version(token: &str) -> Result<Version, HttpLineParseError> {
    match token {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        _ => Err(HttpLineParseError::InvalidVersion),
    }
}
