use bytes::Bytes;

use crate::http::headers::Headers;
use crate::http::request::{Method, RequestFrame, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidVersion,
    InvalidHeader,
    InvalidContentLength,
    /// Request bodies framed with `Transfer-Encoding` are not accepted.
    UnsupportedTransferEncoding,
    /// Head plus body exceed the configured request size limit.
    TooLarge,
    Incomplete,
}

/// Parses one request from the front of `buf` without a size limit.
pub fn parse_http_request(buf: &[u8]) -> Result<(RequestFrame, usize), ParseError> {
    parse_with_limit(buf, usize::MAX)
}

/// Parses one request from the front of `buf`.
///
/// On success returns the frame and the number of bytes it consumed. Returns
/// `Incomplete` when more input is needed and `TooLarge` as soon as the request
/// is known to exceed `max_size` bytes.
pub fn parse_with_limit(buf: &[u8], max_size: usize) -> Result<(RequestFrame, usize), ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > max_size => return Err(ParseError::TooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let uri = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let version = Version::parse(version).ok_or(ParseError::InvalidVersion)?;

    // Headers
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    if headers.contains("Transfer-Encoding") {
        return Err(ParseError::UnsupportedTransferEncoding);
    }

    // Body
    let content_length = headers
        .get("Content-Length")
        .map(|v| v.trim().parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
        .transpose()?
        .unwrap_or(0);

    let total_consumed = headers_end
        .checked_add(4)
        .and_then(|n| n.checked_add(content_length))
        .ok_or(ParseError::TooLarge)?;

    if total_consumed > max_size {
        return Err(ParseError::TooLarge);
    }

    if body_bytes.len() < content_length {
        return Err(ParseError::Incomplete);
    }

    let body = Bytes::copy_from_slice(&body_bytes[..content_length]);

    let frame = RequestFrame {
        method,
        uri: uri.to_string(),
        version,
        headers,
        body,
    };

    Ok((frame, total_consumed))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}
