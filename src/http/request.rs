use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

use crate::http::headers::Headers;

/// HTTP request methods.
///
/// Represents the HTTP method/verb of a request. Routing is method-agnostic;
/// handlers inspect the method themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use harbor::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP protocol version of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// A decoded inbound request, as delivered by the transport layer.
#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub method: Method,
    /// Request target as sent by the client (path plus optional query).
    pub uri: String,
    pub version: Version,
    pub headers: Headers,
    pub body: Bytes,
}

type Attribute = Box<dyn Any + Send + Sync>;

/// An inbound HTTP request bound to a connection slot.
///
/// Instances are pooled: the engine calls [`Request::reset`] before a request
/// object is reused for the next message on the same connection, so nothing a
/// handler observes ever leaks from one request into the next.
pub struct Request {
    method: Method,
    uri: String,
    version: Version,
    headers: Headers,
    body: BytesMut,
    params: HashMap<String, Vec<String>>,
    attributes: HashMap<String, Attribute>,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            uri: String::from("/"),
            version: Version::Http11,
            headers: Headers::new(),
            body: BytesMut::new(),
            params: HashMap::new(),
            attributes: HashMap::new(),
            remote_addr: None,
        }
    }

    /// Clears every per-request field back to its default.
    ///
    /// Buffers keep their capacity so a recycled request does not reallocate.
    pub fn reset(&mut self) {
        self.method = Method::GET;
        self.uri.clear();
        self.uri.push('/');
        self.version = Version::Http11;
        self.headers.clear();
        self.body.clear();
        self.params.clear();
        self.attributes.clear();
        self.remote_addr = None;
    }

    /// Binds a freshly decoded frame to this (reset) request and parses its
    /// query and form parameters.
    pub fn load(&mut self, frame: RequestFrame) {
        self.method = frame.method;
        self.uri = frame.uri;
        self.version = frame.version;
        self.headers = frame.headers;
        self.body.extend_from_slice(&frame.body);

        if let Some(query) = self.query() {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            self.add_params(pairs);
        }

        let is_form = self
            .header("Content-Type")
            .map(|v| v.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        if is_form && !self.body.is_empty() {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(&self.body)
                .into_owned()
                .collect();
            self.add_params(pairs);
        }
    }

    fn add_params(&mut self, pairs: Vec<(String, String)>) {
        for (name, value) in pairs {
            self.params.entry(name).or_default().push(value);
        }
    }

    pub(crate) fn set_remote_addr(&mut self, addr: Option<SocketAddr>) {
        self.remote_addr = addr;
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The full request target, including any query string.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The request target without its query string.
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map(|(p, _)| p).unwrap_or(&self.uri)
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, q)| q)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Retrieves a header value by name, ignoring case.
    ///
    /// # Arguments
    ///
    /// * `key` - Header name to look up
    ///
    /// # Returns
    ///
    /// `Some(&str)` with the header value if present, `None` otherwise.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Retrieves the Content-Length header value and parses it as a usize.
    ///
    /// Returns 0 if the header is missing or not a valid number.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// An explicit `Connection: close` or `Connection: keep-alive` token wins;
    /// otherwise HTTP/1.1 defaults to keep-alive and HTTP/1.0 to close.
    pub fn keep_alive(&self) -> bool {
        if let Some(value) = self.header("Connection") {
            let mut tokens = value.split(',').map(str::trim);
            if tokens.clone().any(|t| t.eq_ignore_ascii_case("close")) {
                return false;
            }
            if tokens.any(|t| t.eq_ignore_ascii_case("keep-alive")) {
                return true;
            }
        }
        self.version == Version::Http11
    }

    /// First value of a query or form parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of a query or form parameter, in the order received.
    pub fn parameters(&self, name: &str) -> &[String] {
        self.params.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parameter_map(&self) -> &HashMap<String, Vec<String>> {
        &self.params
    }

    /// Stores a value for later handlers or the completion hook.
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.attributes.insert(name.into(), Box::new(value));
    }

    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("params", &self.params)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for constructing Request objects outside of a live connection.
pub struct RequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    version: Option<Version>,
    headers: Headers,
    body: Vec<u8>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            uri: None,
            version: None,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn frame(self) -> Result<RequestFrame, &'static str> {
        Ok(RequestFrame {
            method: self.method.ok_or("method missing")?,
            uri: self.uri.ok_or("uri missing")?,
            version: self.version.unwrap_or_default(),
            headers: self.headers,
            body: Bytes::from(self.body),
        })
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let mut request = Request::new();
        request.load(self.frame()?);
        Ok(request)
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
