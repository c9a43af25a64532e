//! Minimal HTTP/1.1 client used by the end-to-end tests.

#![allow(dead_code)]

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Chunk payloads in arrival order; empty for `Content-Length` bodies.
    pub chunks: Vec<Vec<u8>>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct Client<S> {
    stream: S,
    buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub async fn send(&mut self, raw: &str) {
        self.stream.write_all(raw.as_bytes()).await.unwrap();
    }

    pub async fn get(&mut self, uri: &str) -> RawResponse {
        self.send(&format!("GET {uri} HTTP/1.1\r\nHost: test\r\n\r\n")).await;
        self.expect_response().await
    }

    pub async fn expect_response(&mut self) -> RawResponse {
        tokio::time::timeout(TIMEOUT, self.read_response())
            .await
            .expect("timed out waiting for a response")
            .expect("connection closed before a response arrived")
    }

    /// `true` once the server has closed its side without sending anything
    /// more.
    pub async fn is_closed(&mut self) -> bool {
        if !self.buf.is_empty() {
            return false;
        }
        matches!(
            tokio::time::timeout(TIMEOUT, self.stream.read_buf(&mut self.buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    pub async fn read_response(&mut self) -> Option<RawResponse> {
        let head_end = loop {
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                break pos;
            }
            if !self.fill().await {
                return None;
            }
        };

        let head = String::from_utf8(self.buf[..head_end].to_vec()).unwrap();
        self.buf.advance(head_end + 4);

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap();
        let status = status_line.split(' ').nth(1).unwrap().parse().unwrap();
        let headers: Vec<(String, String)> = lines
            .map(|line| {
                let (k, v) = line.split_once(':').unwrap();
                (k.trim().to_string(), v.trim().to_string())
            })
            .collect();

        let mut response = RawResponse {
            status,
            headers,
            body: Vec::new(),
            chunks: Vec::new(),
        };

        if response.header("Transfer-Encoding") == Some("chunked") {
            loop {
                let line_end = loop {
                    if let Some(pos) = find(&self.buf, b"\r\n") {
                        break pos;
                    }
                    if !self.fill().await {
                        return None;
                    }
                };
                let size_line = std::str::from_utf8(&self.buf[..line_end]).unwrap();
                let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
                self.buf.advance(line_end + 2);

                while self.buf.len() < size + 2 {
                    if !self.fill().await {
                        return None;
                    }
                }
                if size == 0 {
                    self.buf.advance(2);
                    break;
                }
                let chunk = self.buf[..size].to_vec();
                self.buf.advance(size + 2);
                response.body.extend_from_slice(&chunk);
                response.chunks.push(chunk);
            }
        } else {
            let length: usize = response
                .header("Content-Length")
                .map(|v| v.parse().unwrap())
                .unwrap_or(0);
            while self.buf.len() < length {
                if !self.fill().await {
                    return None;
                }
            }
            response.body = self.buf[..length].to_vec();
            self.buf.advance(length);
        }

        Some(response)
    }

    async fn fill(&mut self) -> bool {
        matches!(self.stream.read_buf(&mut self.buf).await, Ok(n) if n > 0)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
