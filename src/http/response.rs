use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::error::ResponseError;
use crate::http::headers::Headers;
use crate::http::request::Version;
use crate::http::writer::{self, FrameSink, Outbound, LAST_CHUNK};

/// Capacity the body buffer is brought back to when a response is recycled.
const BODY_CAPACITY: usize = 4096;

/// HTTP status codes the engine and its handlers produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 202 Accepted
    Accepted,
    /// 204 No Content
    NoContent,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 302 Found
    Found,
    /// 303 See Other
    SeeOther,
    /// 304 Not Modified
    NotModified,
    /// 307 Temporary Redirect
    TemporaryRedirect,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 502 Bad Gateway
    BadGateway,
    /// 503 Service Unavailable
    ServiceUnavailable,
    /// 504 Gateway Timeout
    GatewayTimeout,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use harbor::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::Accepted => 202,
            StatusCode::NoContent => 204,
            StatusCode::MovedPermanently => 301,
            StatusCode::Found => 302,
            StatusCode::SeeOther => 303,
            StatusCode::NotModified => 304,
            StatusCode::TemporaryRedirect => 307,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::BadGateway => 502,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::GatewayTimeout => 504,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use harbor::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::Found => "Found",
            StatusCode::SeeOther => "See Other",
            StatusCode::NotModified => "Not Modified",
            StatusCode::TemporaryRedirect => "Temporary Redirect",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::GatewayTimeout => "Gateway Timeout",
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        let status = match code {
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            202 => StatusCode::Accepted,
            204 => StatusCode::NoContent,
            301 => StatusCode::MovedPermanently,
            302 => StatusCode::Found,
            303 => StatusCode::SeeOther,
            304 => StatusCode::NotModified,
            307 => StatusCode::TemporaryRedirect,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            413 => StatusCode::PayloadTooLarge,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            502 => StatusCode::BadGateway,
            503 => StatusCode::ServiceUnavailable,
            504 => StatusCode::GatewayTimeout,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

/// A cookie sent to the client through `Set-Cookie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<i64>,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            secure: false,
            http_only: false,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Renders the value of a single `Set-Cookie` header.
    pub fn encode(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// Character encodings available to [`Response::write_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Some(Charset::Latin1),
            "us-ascii" | "ascii" => Some(Charset::Ascii),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }

    /// Encodes `text`, replacing characters outside the charset with `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            Charset::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

/// An outbound HTTP response bound to one request.
///
/// The response moves through `idle → started → finished`; the `suspended`
/// flag may be raised any time before it finishes. Nothing is sent while the
/// response is idle. Buffered responses go out as a single message on
/// [`finish`](Response::finish); chunked responses send their head on the first
/// flush and one chunk per write after that.
///
/// Every mutating call on a finished response fails with
/// [`ResponseError::AlreadyFinished`].
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: Headers,
    cookies: Vec<Cookie>,
    charset: Charset,
    body: BytesMut,
    chunked: bool,
    written: u64,
    started: bool,
    finished: bool,
    suspended: bool,
    detached: bool,
    abandoned: bool,
    keep_alive: bool,
    started_at: Instant,
    sink: Option<FrameSink>,
    handoff: Option<oneshot::Receiver<Response>>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            version: Version::Http11,
            headers: Headers::new(),
            cookies: Vec::new(),
            charset: Charset::Utf8,
            body: BytesMut::new(),
            chunked: false,
            written: 0,
            started: false,
            finished: false,
            suspended: false,
            detached: false,
            abandoned: false,
            keep_alive: true,
            started_at: Instant::now(),
            sink: None,
            handoff: None,
        }
    }

    /// A response that is already finished; left behind once a suspended
    /// response has been completed.
    fn spent() -> Self {
        Self {
            finished: true,
            ..Self::new()
        }
    }

    /// Clears every field back to its default for the next request on the slot.
    ///
    /// The body buffer is cleared rather than replaced, so its allocation
    /// survives the reset once the writer has released the previous body.
    pub fn reset(&mut self) {
        self.status = StatusCode::Ok;
        self.version = Version::Http11;
        self.headers.clear();
        self.cookies.clear();
        self.charset = Charset::Utf8;
        self.body.clear();
        self.body.reserve(BODY_CAPACITY);
        self.chunked = false;
        self.written = 0;
        self.started = false;
        self.finished = false;
        self.suspended = false;
        self.detached = false;
        self.abandoned = false;
        self.keep_alive = true;
        self.started_at = Instant::now();
        self.sink = None;
        self.handoff = None;
    }

    /// Attaches the response to a connection's output for one request.
    pub fn bind(&mut self, sink: FrameSink, version: Version, keep_alive: bool) {
        self.sink = Some(sink);
        self.version = version;
        self.keep_alive = keep_alive;
        self.started_at = Instant::now();
    }

    pub(crate) fn unbind(&mut self) {
        self.sink = None;
    }

    fn check_writable(&self) -> Result<(), ResponseError> {
        if self.detached {
            return Err(ResponseError::Detached);
        }
        if self.finished {
            return Err(ResponseError::AlreadyFinished);
        }
        Ok(())
    }

    fn check_head_mutable(&self) -> Result<(), ResponseError> {
        self.check_writable()?;
        if self.started {
            return Err(ResponseError::AlreadyStarted);
        }
        Ok(())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.check_head_mutable()?;
        self.status = status;
        Ok(())
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_protocol_version(&mut self, version: Version) -> Result<(), ResponseError> {
        self.check_head_mutable()?;
        self.version = version;
        Ok(())
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseError> {
        self.check_head_mutable()?;
        self.headers.set(name, value);
        Ok(())
    }

    pub fn add_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseError> {
        self.check_head_mutable()?;
        self.headers.append(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) -> Result<bool, ResponseError> {
        self.check_head_mutable()?;
        Ok(self.headers.remove(name))
    }

    pub fn set_content_type(&mut self, mime_type: &str) -> Result<(), ResponseError> {
        self.set_header("Content-Type", mime_type)
    }

    /// Sets `Content-Length` explicitly. Buffered responses overwrite it with
    /// the real body length when they finish.
    pub fn set_content_length(&mut self, length: usize) -> Result<(), ResponseError> {
        self.set_header("Content-Length", length.to_string())
    }

    pub fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.set_header("Location", location)
    }

    /// Adds a cookie. A cookie with the same name replaces the earlier one.
    pub fn set_cookie(&mut self, cookie: Cookie) -> Result<(), ResponseError> {
        self.check_head_mutable()?;
        self.cookies.retain(|c| c.name != cookie.name);
        self.cookies.push(cookie);
        Ok(())
    }

    pub fn set_cookie_pair(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseError> {
        self.set_cookie(Cookie::new(name, value))
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn character_encoding(&self) -> Charset {
        self.charset
    }

    /// Changes the encoding used by [`write_str`](Response::write_str).
    /// Bytes already written are kept as they are.
    pub fn set_character_encoding(&mut self, name: &str) -> Result<(), ResponseError> {
        self.check_head_mutable()?;
        self.charset = Charset::from_name(name)
            .ok_or_else(|| ResponseError::UnsupportedCharset(name.to_string()))?;
        Ok(())
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Switches between buffered and chunked output. Only legal before the
    /// head has been sent.
    pub fn set_chunked(&mut self, chunked: bool) -> Result<(), ResponseError> {
        self.check_head_mutable()?;
        if chunked == self.chunked {
            return Ok(());
        }
        if chunked {
            self.headers.remove("Content-Length");
            self.headers.set("Transfer-Encoding", "chunked");
        } else {
            self.headers.remove("Transfer-Encoding");
        }
        self.chunked = chunked;
        Ok(())
    }

    /// Appends body bytes. In chunked mode every write is sent as its own chunk.
    pub fn write(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        self.check_writable()?;
        self.body.extend_from_slice(data);
        self.written += data.len() as u64;
        if self.chunked {
            self.flush_chunk()?;
        }
        Ok(())
    }

    /// Writes text through the current character encoding.
    pub fn write_str(&mut self, text: &str) -> Result<(), ResponseError> {
        let encoded = self.charset.encode(text);
        self.write(&encoded)
    }

    /// Sends whatever is pending in chunked mode; buffered responses keep
    /// everything until [`finish`](Response::finish).
    pub fn flush(&mut self) -> Result<(), ResponseError> {
        self.check_writable()?;
        if self.chunked {
            self.flush_chunk()?;
        }
        Ok(())
    }

    /// Discards buffered body bytes that have not been sent yet.
    pub fn clear_buffer(&mut self) -> Result<(), ResponseError> {
        self.check_head_mutable()?;
        self.body.clear();
        self.written = 0;
        Ok(())
    }

    /// Body bytes currently buffered and not yet sent.
    pub fn buffered(&self) -> &[u8] {
        &self.body
    }

    /// Body bytes written by the handler, excluding the head.
    pub fn written_bytes(&self) -> u64 {
        self.written
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Finished after its connection had already closed. An abandoned
    /// response is never reused.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Time since the response was bound to its request.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn is_open(&self) -> bool {
        self.sink.as_ref().is_some_and(FrameSink::is_open)
    }

    fn emit(&self, frame: Outbound) {
        if let Some(sink) = &self.sink {
            // A closed connection is not an error for the handler.
            sink.send(frame);
        }
    }

    /// Sends the status line and headers. Buffered responses include their
    /// body in the same message.
    fn start(&mut self) -> Result<(), ResponseError> {
        self.check_writable()?;
        if self.started {
            return Err(ResponseError::AlreadyStarted);
        }

        if !self.cookies.is_empty() {
            self.headers.remove("Set-Cookie");
            for cookie in &self.cookies {
                self.headers.append("Set-Cookie", cookie.encode());
            }
        }

        if !self.chunked {
            self.headers.set("Content-Length", self.body.len().to_string());
        }

        if self.keep_alive {
            self.headers.set("Connection", "keep-alive");
        } else {
            self.headers.set("Connection", "close");
        }

        self.started = true;

        let head = writer::encode_head(self.version, self.status, &self.headers);
        let body = if self.chunked {
            Bytes::new()
        } else {
            self.body.split().freeze()
        };
        self.emit(Outbound::Message { head, body });

        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<(), ResponseError> {
        if !self.started {
            self.start()?;
        }
        // An empty chunk would terminate the body.
        if self.body.is_empty() {
            return Ok(());
        }
        let chunk = writer::encode_chunk(&self.body);
        self.body.clear();
        self.emit(Outbound::Chunk(chunk));
        Ok(())
    }

    /// Completes the response.
    ///
    /// Buffered responses are sent in one message with `Content-Length` set.
    /// Chunked responses send any pending chunk and the terminal chunk; a
    /// chunked response that never started first sends an empty head. When the
    /// request was not keep-alive the connection is closed after the write.
    ///
    /// Finishing on a connection that is already gone marks the response
    /// finished and abandoned without sending anything.
    pub fn finish(&mut self) -> Result<(), ResponseError> {
        self.check_writable()?;

        if self.is_open() {
            if self.chunked {
                if !self.started {
                    tracing::debug!("finishing chunked response that never started");
                }
                self.flush_chunk()?;
                self.emit(Outbound::Chunk(Bytes::from_static(LAST_CHUNK)));
            } else {
                self.start()?;
            }

            if !self.keep_alive {
                if let Some(sink) = &self.sink {
                    sink.close();
                }
            }
        } else if self.sink.is_some() {
            tracing::debug!(status = self.status.as_u16(), "connection gone before response finished");
            self.abandoned = true;
            self.keep_alive = false;
        }

        self.finished = true;
        self.suspended = false;

        Ok(())
    }

    /// Gives up on the response and closes the connection without completing
    /// the body. A chunked body that already started ends without its
    /// terminal chunk, so the client sees the message as truncated.
    pub fn abort(&mut self) -> Result<(), ResponseError> {
        self.check_writable()?;
        if let Some(sink) = &self.sink {
            sink.close();
        }
        self.finished = true;
        self.abandoned = true;
        self.keep_alive = false;
        Ok(())
    }

    /// Defers completion past the handler call.
    ///
    /// The live response moves into the returned [`Suspended`] capability,
    /// which may be sent to another task and finished from there. The value
    /// left behind is a detached placeholder: further calls on it fail with
    /// [`ResponseError::Detached`].
    pub fn suspend(&mut self) -> Result<Suspended, ResponseError> {
        self.check_writable()?;
        if self.suspended {
            return Err(ResponseError::AlreadySuspended);
        }

        let (done, handoff) = oneshot::channel();

        let mut live = std::mem::replace(self, Response::new());
        live.suspended = true;

        self.suspended = true;
        self.detached = true;
        self.keep_alive = live.keep_alive;
        self.handoff = Some(handoff);

        Ok(Suspended {
            response: live,
            done: Some(done),
        })
    }

    /// Takes the receiver that yields the live response once a suspended
    /// response completes or is dropped.
    pub(crate) fn take_handoff(&mut self) -> Option<oneshot::Receiver<Response>> {
        self.handoff.take()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("charset", &self.charset)
            .field("chunked", &self.chunked)
            .field("written", &self.written)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .field("suspended", &self.suspended)
            .field("detached", &self.detached)
            .field("abandoned", &self.abandoned)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// A response whose completion was deferred by [`Response::suspend`].
///
/// Dereferences to the live [`Response`] for writing. Call
/// [`finish`](Suspended::finish) exactly once, from any task. Dropping it
/// without finishing abandons the exchange and the connection is closed.
pub struct Suspended {
    response: Response,
    done: Option<oneshot::Sender<Response>>,
}

impl Suspended {
    /// Finishes the response and hands it back to its connection.
    ///
    /// A second call fails with [`ResponseError::AlreadyFinished`].
    pub fn finish(&mut self) -> Result<(), ResponseError> {
        self.response.finish()?;
        self.hand_back();
        Ok(())
    }

    /// Whether the connection that owns this response is still open. Work
    /// that outlives a forced shutdown can use this to skip pointless output.
    pub fn is_open(&self) -> bool {
        self.response.is_open()
    }

    fn hand_back(&mut self) {
        if let Some(done) = self.done.take() {
            let response = std::mem::replace(&mut self.response, Response::spent());
            // The connection may already be gone.
            let _ = done.send(response);
        }
    }
}

impl Deref for Suspended {
    type Target = Response;

    fn deref(&self) -> &Response {
        &self.response
    }
}

impl DerefMut for Suspended {
    fn deref_mut(&mut self) -> &mut Response {
        &mut self.response
    }
}

impl Drop for Suspended {
    fn drop(&mut self) {
        self.hand_back();
    }
}

impl fmt::Debug for Suspended {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspended")
            .field("response", &self.response)
            .field("pending", &self.done.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_encoding_includes_attributes() {
        let cookie = Cookie::new("session", "abc")
            .path("/")
            .max_age(60)
            .http_only(true);
        assert_eq!(cookie.encode(), "session=abc; Path=/; Max-Age=60; HttpOnly");
    }

    #[test]
    fn latin1_replaces_unmappable_characters() {
        assert_eq!(Charset::Latin1.encode("é€"), vec![0xE9, b'?']);
        assert_eq!(Charset::Ascii.encode("é"), vec![b'?']);
        assert_eq!(Charset::Utf8.encode("é"), "é".as_bytes().to_vec());
    }

    #[test]
    fn status_code_round_trips_through_u16() {
        assert_eq!(StatusCode::from_u16(503), Some(StatusCode::ServiceUnavailable));
        assert_eq!(StatusCode::from_u16(299), None);
    }

    #[test]
    fn unbound_finish_still_marks_finished() {
        let mut response = Response::new();
        response.write(b"dropped").unwrap();
        response.finish().unwrap();

        assert!(response.is_finished());
        assert_eq!(response.finish(), Err(ResponseError::AlreadyFinished));
    }
}
