use crate::{
    errors::ErrorKind,
    http::types::{self, Header, HeaderMap},
    limits::ReqLimits,
    Method, Version,
};
use memchr::memchr;
use std::mem;

/// A parsed HTTP/1.1 request.
///
/// All data is zero-copy referenced from the connection's receive
/// buffer: the URI, header names/values, and body are slices into bytes
/// the provision owns. They stay valid for the whole handler call and
/// are invalidated by the post-response clear.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    pub(crate) url: Url,
    version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<&'static [u8]>,
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count_max),
            body: None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = None;
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 9110](https://datatracker.ietf.org/doc/html/rfc9110#section-5.1)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"user-agent"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the request body if present.
    #[inline(always)]
    pub const fn body(&self) -> Option<&[u8]> {
        self.body
    }
}

// Parsing
impl Request {
    /// Parses a complete head block: the request line through the final
    /// `\r\n\r\n`, inclusive. Header names are lower-cased in place;
    /// every stored slice points back into `head`.
    pub(crate) fn parse(&mut self, head: &mut [u8], limits: &ReqLimits) -> Result<(), ErrorKind> {
        let mut position = self.parse_request_line(head, limits)?;

        loop {
            if head.get(position..position + 2) == Some(b"\r\n") {
                position += 2;
                break;
            }
            position = self.parse_header_line(head, position, limits)?;
        }

        debug_assert_eq!(position, head.len());
        Ok(())
    }

    #[inline]
    fn parse_request_line(
        &mut self,
        head: &mut [u8],
        limits: &ReqLimits,
    ) -> Result<usize, ErrorKind> {
        let (method, mut position) = Method::from_bytes(head)?;
        self.method = method;

        // URI token, bounded: scan one byte past the limit so an overlong
        // URI is told apart from a missing delimiter.
        let window = (limits.request_uri_bytes_max + 1).min(head.len() - position);
        let uri_len = match memchr(b' ', &head[position..position + window]) {
            Some(len) => len,
            None if head.len() - position > window => return Err(ErrorKind::UriTooLong),
            None => return Err(ErrorKind::MalformedRequest),
        };

        if uri_len == 0 || head[position] != b'/' {
            return Err(ErrorKind::MalformedRequest);
        }

        let target = into_static(&head[position..position + uri_len]);
        position += uri_len + 1;

        // "HTTP/1.1\r\n"
        let token = head
            .get(position..position + 8)
            .ok_or(ErrorKind::MalformedRequest)?;
        self.version = Version::from_bytes(token)?;

        if head.get(position + 8..position + 10) != Some(b"\r\n") {
            return Err(ErrorKind::MalformedRequest);
        }

        self.url.split(target);
        Ok(position + 10)
    }

    #[inline]
    fn parse_header_line(
        &mut self,
        head: &mut [u8],
        position: usize,
        limits: &ReqLimits,
    ) -> Result<usize, ErrorKind> {
        let line_end = position
            + memchr(b'\n', &head[position..]).ok_or(ErrorKind::MalformedRequest)?;
        if line_end <= position || head[line_end - 1] != b'\r' {
            return Err(ErrorKind::MalformedRequest);
        }

        let line = &mut head[position..line_end - 1];
        let colon = memchr(b':', line).ok_or(ErrorKind::MalformedRequest)?;
        if colon == 0 {
            return Err(ErrorKind::MalformedRequest);
        }

        let (name_bytes, rest) = line.split_at_mut(colon);
        types::to_lower_case(name_bytes);

        let name = into_static(name_bytes);
        let value = into_static(types::trim(&rest[1..]));

        if name == b"content-length" {
            let length = types::slice_to_usize(value).ok_or(ErrorKind::MalformedRequest)?;
            if length > limits.request_bytes_max {
                return Err(ErrorKind::ContentTooLarge);
            }
            self.headers.content_length = Some(length);
        } else {
            if self.headers.headers.len() >= limits.header_count_max {
                return Err(ErrorKind::TooManyHeaders);
            }
            self.headers.headers.push(Header::new(name, value));
        }

        Ok(line_end + 1)
    }
}

// SAFETY: the engine guarantees these slices point into the provision's
// receive buffer, which outlives every Request/Url that references it
// and is only rewritten after the request has been cleared. The 'static
// lifetime is a loan the clear-between-requests discipline pays back;
// it never escapes the handler call.
#[inline(always)]
fn into_static(src: &[u8]) -> &'static [u8] {
    unsafe { mem::transmute(src) }
}

// Url

/// The request target, split once at parse time.
///
/// # Components
///
/// - **Target**: full path with query string (e.g., `/hi/alice?greeting=Hello`)
/// - **Path**: path without query string (e.g., `/hi/alice`)
/// - **Query**: optional query string including the `?`
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Url {
    pub(crate) target: &'static [u8],
    pub(crate) path: &'static [u8],
    pub(crate) query: Option<&'static [u8]>,
}

impl Url {
    #[inline(always)]
    pub(crate) const fn new() -> Self {
        Self {
            target: b"",
            path: b"",
            query: None,
        }
    }

    #[inline(always)]
    pub(crate) fn clear(&mut self) {
        self.target = b"";
        self.path = b"";
        self.query = None;
    }

    #[inline(always)]
    fn split(&mut self, target: &'static [u8]) {
        self.target = target;
        match memchr(b'?', target) {
            Some(mark) => {
                self.path = &target[..mark];
                self.query = Some(&target[mark..]);
            }
            None => {
                self.path = target;
                self.query = None;
            }
        }
    }
}

// Public API
impl Url {
    /// The raw request target: path plus query string.
    #[inline(always)]
    pub const fn target(&self) -> &[u8] {
        self.target
    }

    /// The path component, query string stripped.
    #[inline(always)]
    pub const fn path(&self) -> &[u8] {
        self.path
    }

    /// The query string including the leading `?`, if present.
    #[inline(always)]
    pub const fn query(&self) -> Option<&[u8]> {
        self.query
    }
}
