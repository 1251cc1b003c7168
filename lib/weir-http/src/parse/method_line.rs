/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use http::Version;

use super::{HttpLineParseError, parse_http_version, trim_line_ending};

pub struct HttpMethodLine<'a> {
    pub version: Version,
    pub method: &'a str,
    pub uri: &'a str,
}

impl<'a> HttpMethodLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HttpMethodLine<'a>, HttpLineParseError> {
        let line = std::str::from_utf8(trim_line_ending(buf))?;

        let mut parts = line.split_ascii_whitespace();
        let method = parts.next().ok_or(HttpLineParseError::InvalidMethod)?;
        let uri = parts.next().ok_or(HttpLineParseError::NotLongEnough)?;
        let version = parse_http_version(parts.next().ok_or(HttpLineParseError::NotLongEnough)?)?;

        Ok(HttpMethodLine {
            version,
            method,
            uri,
        })
    }
}
