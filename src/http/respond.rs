//! Response description, head encoding, and copy-free send assembly.

use crate::{errors::ErrorKind, http::types::StatusCode};

/// What a handler sends back: status, mime, body, extra headers.
///
/// The body is a borrowed slice: static bytes, a slice of the request,
/// or something built in the per-request arena. `Content-Type` and
/// `Content-Length` are derived from `mime` and `body`; `Server: zzz`
/// and `Connection: keep-alive` are appended by the encoder unless an
/// extra header overrides them.
///
/// # Examples
/// ```
/// use zzz_web::{Respond, StatusCode};
///
/// let respond = Respond::new()
///     .status(StatusCode::Ok)
///     .mime("text/html")
///     .body(b"Hello, World!");
/// ```
#[derive(Debug)]
pub struct Respond<'p> {
    pub(crate) status: Option<StatusCode>,
    pub(crate) mime: Option<&'p str>,
    pub(crate) body: &'p [u8],
    pub(crate) headers: Vec<(&'p str, &'p str)>,
}

impl<'p> Respond<'p> {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            status: None,
            mime: None,
            body: b"",
            headers: Vec::new(),
        }
    }

    /// Sets the status line. A `Respond` that reaches the encoder without
    /// a status aborts the connection.
    #[inline(always)]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the `Content-Type`. Absent, the encoder falls back to
    /// `application/octet-stream`.
    #[inline(always)]
    pub fn mime(mut self, mime: &'p str) -> Self {
        self.mime = Some(mime);
        self
    }

    #[inline(always)]
    pub fn body(mut self, body: &'p [u8]) -> Self {
        self.body = body;
        self
    }

    /// Appends an extra response header. Supplying `Server` or
    /// `Connection` here suppresses the encoder's defaults.
    #[inline(always)]
    pub fn header(mut self, name: &'p str, value: &'p str) -> Self {
        self.headers.push((name, value));
        self
    }
}

impl Default for Respond<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// Encoding
impl Respond<'_> {
    /// Writes the response head into `out`:
    /// status line, defaults, extra headers, `Content-Type`,
    /// `Content-Length`, terminating `\r\n`. The body is not copied; it
    /// travels next to the head inside a [`Pseudoslice`].
    pub(crate) fn encode_head(&self, out: &mut Vec<u8>) -> Result<(), ErrorKind> {
        let status = self.status.ok_or(ErrorKind::MissingStatus)?;

        out.clear();
        out.extend_from_slice(status.first_line());

        if !self.overrides("server") {
            out.extend_from_slice(b"Server: zzz\r\n");
        }
        if !self.overrides("connection") {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
        }

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"Content-Type: ");
        out.extend_from_slice(self.mime.unwrap_or("application/octet-stream").as_bytes());
        out.extend_from_slice(b"\r\n");

        out.extend_from_slice(b"Content-Length: ");
        write_usize(self.body.len(), out);
        out.extend_from_slice(b"\r\n\r\n");

        Ok(())
    }

    #[inline]
    fn overrides(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

#[inline]
fn write_usize(mut n: usize, out: &mut Vec<u8>) {
    if n == 0 {
        out.push(b'0');
        return;
    }

    let mut buffer = [b'0'; 20];
    let mut index = buffer.len();

    while n > 0 {
        index -= 1;
        buffer[index] = b'0' + (n % 10) as u8;
        n /= 10;
    }

    out.extend_from_slice(&buffer[index..]);
}

// Pseudoslice

/// Head and body presented as one logically-addressable byte range.
///
/// The body can be large and lives elsewhere (arena, request slice),
/// so the two ranges are never joined. `get` hands out windows for
/// `send_all`: a direct subslice when the window falls inside one
/// range, a copy into the scratch tail when it straddles the seam.
pub(crate) struct Pseudoslice<'a> {
    head: &'a [u8],
    body: &'a [u8],
    scratch: &'a mut [u8],
}

impl<'a> Pseudoslice<'a> {
    #[inline(always)]
    pub(crate) fn new(head: &'a [u8], body: &'a [u8], scratch: &'a mut [u8]) -> Self {
        Self {
            head,
            body,
            scratch,
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.head.len() + self.body.len()
    }

    /// A window of at most `window` bytes starting at `offset`, clamped
    /// to the end of the range. Straddling windows must fit the scratch
    /// tail; the engine never asks for more than its write window.
    #[inline]
    pub(crate) fn get(&mut self, offset: usize, window: usize) -> &[u8] {
        let window = window.min(self.len() - offset);
        let seam = self.head.len();

        if offset + window <= seam {
            return &self.head[offset..offset + window];
        }
        if offset >= seam {
            return &self.body[offset - seam..offset - seam + window];
        }

        debug_assert!(window <= self.scratch.len());

        let from_head = seam - offset;
        self.scratch[..from_head].copy_from_slice(&self.head[offset..]);
        self.scratch[from_head..window].copy_from_slice(&self.body[..window - from_head]);
        &self.scratch[..window]
    }
}

#[cfg(test)]
mod encode_tests {
    use super::*;
    use crate::tools::*;

    fn encoded(respond: Respond<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        respond.encode_head(&mut out).unwrap();
        out
    }

    #[test]
    fn hello_world_head() {
        let head = encoded(
            Respond::new()
                .status(StatusCode::Ok)
                .mime("text/html")
                .body(b"Hello, World!"),
        );

        assert_eq!(
            str_op(&head),
            "HTTP/1.1 200 OK\r\n\
             Server: zzz\r\n\
             Connection: keep-alive\r\n\
             Content-Type: text/html\r\n\
             Content-Length: 13\r\n\r\n"
        );
    }

    #[test]
    fn empty_body_defaults() {
        let head = encoded(Respond::new().status(StatusCode::MethodNotAllowed));

        assert_eq!(
            str_op(&head),
            "HTTP/1.1 405 Method Not Allowed\r\n\
             Server: zzz\r\n\
             Connection: keep-alive\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn extra_headers_in_order() {
        let head = encoded(
            Respond::new()
                .status(StatusCode::Found)
                .header("Location", "/next")
                .header("X-Trace", "abc")
                .mime("text/plain")
                .body(b"moved"),
        );

        assert_eq!(
            str_op(&head),
            "HTTP/1.1 302 Found\r\n\
             Server: zzz\r\n\
             Connection: keep-alive\r\n\
             Location: /next\r\n\
             X-Trace: abc\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 5\r\n\r\n"
        );
    }

    #[test]
    fn override_suppresses_defaults() {
        let head = encoded(
            Respond::new()
                .status(StatusCode::Ok)
                .header("connection", "close")
                .header("SERVER", "other"),
        );
        let text = str_op(&head);

        assert!(text.contains("connection: close\r\n"));
        assert!(text.contains("SERVER: other\r\n"));
        assert!(!text.contains("Server: zzz"));
        assert!(!text.contains("Connection: keep-alive"));
    }

    #[test]
    fn missing_status() {
        let mut out = Vec::new();
        assert_eq!(
            Respond::new().body(b"x").encode_head(&mut out),
            Err(ErrorKind::MissingStatus)
        );
    }

    #[test]
    fn content_length_digits() {
        let body = vec![b'x'; 1048576];
        let head = encoded(Respond::new().status(StatusCode::Ok).body(&body));

        assert!(str_op(&head).contains("Content-Length: 1048576\r\n"));
    }

    #[test]
    fn reencode_clears_previous() {
        let mut out = Vec::new();
        Respond::new()
            .status(StatusCode::Ok)
            .encode_head(&mut out)
            .unwrap();

        Respond::new()
            .status(StatusCode::NotFound)
            .encode_head(&mut out)
            .unwrap();

        assert!(str_op(&out).starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(!str_op(&out).contains("200 OK"));
    }
}
