/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use http::HeaderMap;

/// Serialize all entries of `map` as `name: value\r\n` lines.
pub fn serialize_headers(map: &HeaderMap, buf: &mut Vec<u8>) {
    for (name, value) in map.iter() {
        buf.extend_from_slice(name.as_ref());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    #[test]
    fn serialize() {
        let mut map = HeaderMap::new();
        map.insert(header::HOST, "example.com".parse().unwrap());
        map.append(header::ACCEPT, "*/*".parse().unwrap());
        let mut buf = Vec::new();
        serialize_headers(&map, &mut buf);
        assert_eq!(buf.as_slice(), b"host: example.com\r\naccept: */*\r\n");
    }
}
