/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use super::{HttpLineParseError, trim_line_ending};

pub struct HttpHeaderLine<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> HttpHeaderLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HttpHeaderLine<'a>, HttpLineParseError> {
        let line = std::str::from_utf8(trim_line_ending(buf))?;

        let (name, value) = line
            .split_once(':')
            .ok_or(HttpLineParseError::NoDelimiterFound(':'))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(HttpLineParseError::InvalidHeaderName);
        }

        Ok(HttpHeaderLine {
            name,
            value: value.trim(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal() {
        let h = HttpHeaderLine::parse(b"Host: example.com\r\n").unwrap();
        assert_eq!(h.name, "Host");
        assert_eq!(h.value, "example.com");
    }

    #[test]
    fn empty_value() {
        let h = HttpHeaderLine::parse(b"X-Empty:\r\n").unwrap();
        assert_eq!(h.name, "X-Empty");
        assert_eq!(h.value, "");
    }

    #[test]
    fn no_colon() {
        assert!(HttpHeaderLine::parse(b"no colon here\r\n").is_err());
    }

    #[test]
    fn empty_name() {
        assert!(HttpHeaderLine::parse(b": value\r\n").is_err());
    }
}
